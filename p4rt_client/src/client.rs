/*
Copyright (c) 2022 VMware, Inc.
SPDX-License-Identifier: MIT
Permission is hereby granted, free of charge, to any person obtaining a copy
of this software and associated documentation files (the "Software"), to deal
in the Software without restriction, including without limitation the rights
to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
copies of the Software, and to permit persons to whom the Software is
furnished to do so, subject to the following conditions:
The above copyright notice and this permission notice shall be included in all
copies or substantial portions of the Software.
THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
SOFTWARE.
*/

//! The P4Runtime client: connection setup, the unary RPCs and access to
//! the stream session.
//!
//! The API is blocking.  The client owns a tokio runtime and blocks the
//! calling thread on it for each call, so it must not be used from within
//! an async context.

use proto::p4info::P4Info;
use proto::p4runtime::{
    CapabilitiesRequest, DigestListAck, Entity, ForwardingPipelineConfig,
    GetForwardingPipelineConfigRequest, GetForwardingPipelineConfigRequest_ResponseType,
    PacketOut, ReadRequest, ReadResponse, SetForwardingPipelineConfigRequest,
    SetForwardingPipelineConfigRequest_Action, StreamMessageRequest, Uint128, Update,
    WriteRequest,
};
use proto::p4runtime_grpc::P4RuntimeClient;

use protobuf::RepeatedField;

use std::fmt::{self, Display};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use tokio::runtime::{self, Runtime};

use tonic::codec::Streaming;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint, Identity};

use tracing::{debug, info};

use crate::context::load_p4info;
use crate::error::{write_error, Error, Result};
use crate::stream::{arbitration_request, SessionState, StreamEnvelope, StreamKind, StreamSession};

/// The 128-bit election id used in arbitration.  Higher ids win.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ElectionId {
    pub high: u64,
    pub low: u64,
}

impl Default for ElectionId {
    fn default() -> Self {
        ElectionId { high: 1, low: 0 }
    }
}

impl From<u128> for ElectionId {
    fn from(x: u128) -> Self {
        ElectionId {
            high: (x >> 64) as u64,
            low: x as u64,
        }
    }
}

impl From<ElectionId> for Uint128 {
    fn from(id: ElectionId) -> Self {
        let mut uint128 = Uint128::new();
        uint128.set_high(id.high);
        uint128.set_low(id.low);
        uint128
    }
}

/// Accepts `<high>,<low>` or a single 128-bit integer.
impl FromStr for ElectionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::Format(format!("Invalid election id '{}'", s));
        match s.split_once(',') {
            Some((high, low)) => Ok(ElectionId {
                high: high.trim().parse().map_err(|_| invalid())?,
                low: low.trim().parse().map_err(|_| invalid())?,
            }),
            None => Ok(s.trim().parse::<u128>().map_err(|_| invalid())?.into()),
        }
    }
}

impl Display for ElectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.high, self.low)
    }
}

/// PEM material for a TLS connection.  Without a root CA the platform's
/// native roots are used.
#[derive(Clone, Debug, Default)]
pub struct SslOptions {
    pub root_ca: Option<Vec<u8>>,
    pub cert: Option<Vec<u8>>,
    pub key: Option<Vec<u8>>,
}

fn read_pem_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|source| Error::Io {
        path: path.into(),
        source,
    })
}

impl SslOptions {
    pub fn from_files(root_ca: Option<&Path>, cert: Option<&Path>, key: Option<&Path>) -> Result<Self> {
        Ok(SslOptions {
            root_ca: root_ca.map(read_pem_file).transpose()?,
            cert: cert.map(read_pem_file).transpose()?,
            key: key.map(read_pem_file).transpose()?,
        })
    }

    fn tls_config(&self) -> Result<ClientTlsConfig> {
        let mut tls = ClientTlsConfig::new();
        tls = match &self.root_ca {
            Some(ca) => tls.ca_certificate(Certificate::from_pem(ca)),
            None => tls.with_native_roots(),
        };
        match (&self.cert, &self.key) {
            (Some(cert), Some(key)) => tls = tls.identity(Identity::from_pem(cert, key)),
            (None, None) => (),
            _ => {
                return Err(Error::Validation(
                    "TLS certificate chain and private key must be provided together".into(),
                ))
            }
        }
        Ok(tls)
    }
}

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub device_id: u64,
    pub grpc_addr: String,
    pub election_id: ElectionId,
    pub role_name: Option<String>,
    pub ssl: Option<SslOptions>,
    /// How long to wait for the arbitration reply.
    pub arbitration_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            device_id: 1,
            grpc_addr: "localhost:50051".into(),
            election_id: ElectionId::default(),
            role_name: None,
            ssl: None,
            arbitration_timeout: Duration::from_secs(2),
        }
    }
}

async fn connect_channel(config: &ClientConfig) -> Result<Channel> {
    let connect_error = |source| Error::Connect {
        addr: config.grpc_addr.clone(),
        source,
    };
    let scheme = if config.ssl.is_some() { "https" } else { "http" };
    let mut endpoint = Endpoint::from_shared(format!("{}://{}", scheme, config.grpc_addr))
        .map_err(connect_error)?;
    if let Some(ssl) = &config.ssl {
        endpoint = endpoint.tls_config(ssl.tls_config()?).map_err(connect_error)?;
    }
    endpoint.connect().await.map_err(connect_error)
}

/// A connected client with an established stream session.
pub struct RpcClient {
    // Dropped in declaration order: the session must go before the
    // runtime that drives it.
    session: StreamSession,
    stub: P4RuntimeClient<Channel>,
    config: ClientConfig,
    runtime: Runtime,
}

impl RpcClient {
    /// Connects and performs arbitration.  No client is returned unless
    /// the server answered the arbitration request.
    pub fn connect(config: ClientConfig) -> Result<Self> {
        let runtime = runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("p4rt-client")
            .build()
            .map_err(Error::Runtime)?;

        debug!("Connecting to device {} at {}", config.device_id, config.grpc_addr);
        let channel = runtime.block_on(connect_channel(&config))?;
        let stub = P4RuntimeClient::new(channel);

        let arbitration = arbitration_request(
            config.device_id,
            config.election_id.into(),
            config.role_name.as_deref(),
        );
        let session = StreamSession::open(
            runtime.handle(),
            stub.clone(),
            arbitration,
            config.arbitration_timeout,
        )?;
        info!(
            "Connected to device {} at {} as {}",
            config.device_id,
            config.grpc_addr,
            if session.is_primary() { "primary" } else { "backup" }
        );

        Ok(RpcClient {
            session,
            stub,
            config,
            runtime,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    pub fn is_primary(&self) -> bool {
        self.session.is_primary()
    }

    fn stub(&self) -> Result<P4RuntimeClient<Channel>> {
        if self.session.is_closed() {
            return Err(Error::SessionClosed);
        }
        Ok(self.stub.clone())
    }

    fn election_id(&self) -> Uint128 {
        self.config.election_id.into()
    }

    pub fn get_fwd_pipe_config(
        &self,
        response_type: GetForwardingPipelineConfigRequest_ResponseType,
    ) -> Result<ForwardingPipelineConfig> {
        let mut stub = self.stub()?;
        let mut req = GetForwardingPipelineConfigRequest::new();
        req.set_device_id(self.config.device_id);
        req.set_response_type(response_type);
        let mut response = self
            .runtime
            .block_on(stub.get_forwarding_pipeline_config(req))?
            .into_inner();
        Ok(response.take_config())
    }

    pub fn get_p4info(&self) -> Result<P4Info> {
        debug!("Retrieving P4Info file");
        let mut config = self.get_fwd_pipe_config(
            GetForwardingPipelineConfigRequest_ResponseType::P4INFO_AND_COOKIE,
        )?;
        Ok(config.take_p4info())
    }

    /// Pushes a new pipeline: the P4Info at `p4info_path` (text format
    /// unless the extension is `.bin` or `.pb`) and the opaque device
    /// configuration at `bin_path`.  The device verifies and commits it.
    pub fn set_fwd_pipe_config<P, Q>(&self, p4info_path: P, bin_path: Q) -> Result<()>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        debug!("Setting forwarding pipeline config");
        let mut stub = self.stub()?;
        let p4info = load_p4info(p4info_path.as_ref())?;
        let bin_path = bin_path.as_ref();
        let device_config = fs::read(bin_path).map_err(|source| Error::Io {
            path: bin_path.into(),
            source,
        })?;

        let mut config = ForwardingPipelineConfig::new();
        config.set_p4info(p4info);
        config.set_p4_device_config(device_config);

        let mut req = SetForwardingPipelineConfigRequest::new();
        req.set_device_id(self.config.device_id);
        req.set_election_id(self.election_id());
        if let Some(role) = &self.config.role_name {
            req.set_role(role.clone());
        }
        req.set_action(SetForwardingPipelineConfigRequest_Action::VERIFY_AND_COMMIT);
        req.set_config(config);
        self.runtime
            .block_on(stub.set_forwarding_pipeline_config(req))?;
        Ok(())
    }

    /// Sends a write batch.  The device id, election id and role of the
    /// client replace whatever `req` carries.
    pub fn write(&self, mut req: WriteRequest) -> Result<()> {
        let mut stub = self.stub()?;
        req.set_device_id(self.config.device_id);
        req.set_election_id(self.election_id());
        if let Some(role) = &self.config.role_name {
            req.set_role(role.clone());
        }
        self.runtime
            .block_on(stub.write(req))
            .map_err(write_error)?;
        Ok(())
    }

    pub fn write_update(&self, update: Update) -> Result<()> {
        let mut req = WriteRequest::new();
        req.set_updates(RepeatedField::from_vec(vec![update]));
        self.write(req)
    }

    /// Sends a write batch read from a text-format WriteRequest file.
    pub fn write_from_text<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.into(),
            source,
        })?;
        let req = proto::text_format::parse_from_str::<WriteRequest>(&text).map_err(|e| {
            Error::Parse {
                path: path.into(),
                what: "WriteRequest",
                message: e.to_string(),
            }
        })?;
        self.write(req)
    }

    /// Issues a Read for a single entity, which may be a wildcard.  Reply
    /// pages are fetched as the returned stream is iterated.
    pub fn read_one(&self, entity: Entity) -> Result<ReadStream<'_>> {
        let mut stub = self.stub()?;
        let mut req = ReadRequest::new();
        req.set_device_id(self.config.device_id);
        if let Some(role) = &self.config.role_name {
            req.set_role(role.clone());
        }
        req.set_entities(RepeatedField::from_vec(vec![entity]));
        let inner = self.runtime.block_on(stub.read(req))?.into_inner();
        Ok(ReadStream {
            client: self,
            inner,
        })
    }

    pub fn api_version(&self) -> Result<String> {
        let mut stub = self.stub()?;
        let mut response = self
            .runtime
            .block_on(stub.capabilities(CapabilitiesRequest::new()))?
            .into_inner();
        Ok(response.take_p4runtime_api_version())
    }

    /// Pops the next stream message of `kind`, waiting at most `timeout`
    /// (forever if `None`).  `Ok(None)` means the wait timed out.
    pub fn get_stream_packet(
        &self,
        kind: StreamKind,
        timeout: Option<Duration>,
    ) -> Result<Option<StreamEnvelope>> {
        if self.session.is_closed() {
            return Err(Error::SessionClosed);
        }
        self.session.get(kind, timeout)
    }

    pub fn send_stream_message(&self, msg: StreamMessageRequest) -> Result<()> {
        self.session.send(msg)
    }

    pub fn send_packet_out(&self, packet: PacketOut) -> Result<()> {
        let mut msg = StreamMessageRequest::new();
        msg.set_packet(packet);
        self.send_stream_message(msg)
    }

    pub fn ack_digest_list(&self, digest_id: u32, list_id: u64) -> Result<()> {
        let mut ack = DigestListAck::new();
        ack.set_digest_id(digest_id);
        ack.set_list_id(list_id);
        let mut msg = StreamMessageRequest::new();
        msg.set_digest_ack(ack);
        self.send_stream_message(msg)
    }

    /// Closes the stream session.  Any later call fails with
    /// [`Error::SessionClosed`].
    pub fn tear_down(&self) {
        self.session.tear_down();
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.tear_down();
    }
}

/// The pages of a Read response, fetched lazily.
pub struct ReadStream<'a> {
    client: &'a RpcClient,
    inner: Streaming<ReadResponse>,
}

impl Iterator for ReadStream<'_> {
    type Item = Result<ReadResponse>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.client.runtime.block_on(self.inner.message()) {
            Ok(Some(response)) => Some(Ok(response)),
            Ok(None) => None,
            Err(status) => Some(Err(status.into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn election_id_forms() {
        assert_eq!(
            "1,0".parse::<ElectionId>().unwrap(),
            ElectionId { high: 1, low: 0 }
        );
        assert_eq!(
            " 0 , 7 ".parse::<ElectionId>().unwrap(),
            ElectionId { high: 0, low: 7 }
        );
        let big = (3u128 << 64) | 5;
        assert_eq!(
            big.to_string().parse::<ElectionId>().unwrap(),
            ElectionId { high: 3, low: 5 }
        );
        assert!(matches!(
            "1,x".parse::<ElectionId>(),
            Err(Error::Format(_))
        ));

        let uint128: Uint128 = ElectionId { high: 3, low: 5 }.into();
        assert_eq!((uint128.get_high(), uint128.get_low()), (3, 5));
    }

    #[test]
    fn default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.device_id, 1);
        assert_eq!(config.grpc_addr, "localhost:50051");
        assert_eq!(config.election_id, ElectionId { high: 1, low: 0 });
        assert_eq!(config.arbitration_timeout, Duration::from_secs(2));
    }

    #[test]
    fn ssl_key_without_cert_is_rejected() {
        let ssl = SslOptions {
            key: Some(b"key".to_vec()),
            ..Default::default()
        };
        assert!(matches!(ssl.tls_config(), Err(Error::Validation(_))));
    }

    #[test]
    fn ssl_from_missing_file() {
        let err = SslOptions::from_files(Some(Path::new("/nonexistent/ca.pem")), None, None)
            .unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn connection_refused() {
        // Bind and drop a listener to find a port nobody listens on.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let config = ClientConfig {
            grpc_addr: format!("127.0.0.1:{}", port),
            ..Default::default()
        };
        assert!(matches!(
            RpcClient::connect(config),
            Err(Error::Connect { .. })
        ));
    }
}
