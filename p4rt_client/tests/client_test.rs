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

//! Runs the client against an in-process P4Runtime server.

use anyhow::Result;

use proto::code::Code;
use proto::p4info::P4Info;
use proto::p4runtime::{
    CapabilitiesRequest, CapabilitiesResponse, DigestList, DigestListAck, Entity,
    ForwardingPipelineConfig, GetForwardingPipelineConfigRequest,
    GetForwardingPipelineConfigResponse, MasterArbitrationUpdate, PacketIn, PacketMetadata,
    PacketOut, ReadRequest, ReadResponse, SetForwardingPipelineConfigRequest,
    SetForwardingPipelineConfigResponse, StreamMessageRequest, StreamMessageResponse,
    WriteRequest, WriteResponse,
};
use proto::p4runtime_grpc::{P4Runtime, P4RuntimeServer};
use proto::status;

use protobuf::well_known_types::Any;
use protobuf::{Message, ProtobufEnum, RepeatedField};

use p4rt_client::{
    Action, ClientConfig, Context, ElectionId, Error, P4Entity, RpcClient, SessionState,
    StreamEnvelope, StreamKind, TableEntry,
};

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tokio_stream::StreamExt;

use tonic::transport::Server;
use tonic::{Request, Response, Status, Streaming};

const P4INFO: &str = include_str!("testdata/unittest.p4info.txt");

type StreamSender = mpsc::Sender<Result<StreamMessageResponse, Status>>;

#[derive(Default)]
struct DeviceState {
    backup: bool,
    silent: bool,
    // Pushed to the client right after the arbitration reply.
    pending: Vec<StreamMessageResponse>,
    write_error: Option<Status>,
    read_pages: Vec<ReadResponse>,

    writes: Vec<WriteRequest>,
    reads: Vec<ReadRequest>,
    config: Option<ForwardingPipelineConfig>,
    arbitrations: Vec<MasterArbitrationUpdate>,
    packet_outs: Vec<PacketOut>,
    digest_acks: Vec<DigestListAck>,
}

#[derive(Clone)]
struct MockDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl MockDevice {
    async fn serve_stream(self, mut inbound: Streaming<StreamMessageRequest>, tx: StreamSender) {
        while let Some(Ok(mut msg)) = inbound.next().await {
            if msg.has_arbitration() {
                let arbitration = msg.take_arbitration();
                let (reply, pending) = {
                    let mut state = self.state.lock().unwrap();
                    state.arbitrations.push(arbitration.clone());
                    if state.silent {
                        continue;
                    }
                    let code = if state.backup {
                        Code::ALREADY_EXISTS
                    } else {
                        Code::OK
                    };
                    let mut reply = arbitration;
                    reply.mut_status().set_code(code.value());
                    (reply, std::mem::take(&mut state.pending))
                };
                let mut response = StreamMessageResponse::new();
                response.set_arbitration(reply);
                if tx.send(Ok(response)).await.is_err() {
                    return;
                }
                for response in pending {
                    if tx.send(Ok(response)).await.is_err() {
                        return;
                    }
                }
            } else if msg.has_packet() {
                self.state.lock().unwrap().packet_outs.push(msg.take_packet());
            } else if msg.has_digest_ack() {
                self.state.lock().unwrap().digest_acks.push(msg.take_digest_ack());
            }
        }
    }
}

#[tonic::async_trait]
impl P4Runtime for MockDevice {
    async fn write(&self, request: Request<WriteRequest>) -> Result<Response<WriteResponse>, Status> {
        let mut state = self.state.lock().unwrap();
        state.writes.push(request.into_inner());
        match state.write_error.take() {
            Some(status) => Err(status),
            None => Ok(Response::new(WriteResponse::new())),
        }
    }

    type ReadStream = tokio_stream::Iter<std::vec::IntoIter<Result<ReadResponse, Status>>>;

    async fn read(&self, request: Request<ReadRequest>) -> Result<Response<Self::ReadStream>, Status> {
        let mut state = self.state.lock().unwrap();
        state.reads.push(request.into_inner());
        let pages: Vec<_> = state.read_pages.iter().cloned().map(Ok).collect();
        Ok(Response::new(tokio_stream::iter(pages)))
    }

    async fn set_forwarding_pipeline_config(
        &self,
        request: Request<SetForwardingPipelineConfigRequest>,
    ) -> Result<Response<SetForwardingPipelineConfigResponse>, Status> {
        let mut request = request.into_inner();
        self.state.lock().unwrap().config = Some(request.take_config());
        Ok(Response::new(SetForwardingPipelineConfigResponse::new()))
    }

    async fn get_forwarding_pipeline_config(
        &self,
        _request: Request<GetForwardingPipelineConfigRequest>,
    ) -> Result<Response<GetForwardingPipelineConfigResponse>, Status> {
        let state = self.state.lock().unwrap();
        let config = state
            .config
            .clone()
            .ok_or_else(|| Status::failed_precondition("No forwarding pipeline config set"))?;
        let mut response = GetForwardingPipelineConfigResponse::new();
        response.set_config(config);
        Ok(Response::new(response))
    }

    type StreamChannelStream = ReceiverStream<Result<StreamMessageResponse, Status>>;

    async fn stream_channel(
        &self,
        request: Request<Streaming<StreamMessageRequest>>,
    ) -> Result<Response<Self::StreamChannelStream>, Status> {
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(self.clone().serve_stream(request.into_inner(), tx));
        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn capabilities(
        &self,
        _request: Request<CapabilitiesRequest>,
    ) -> Result<Response<CapabilitiesResponse>, Status> {
        let mut response = CapabilitiesResponse::new();
        response.set_p4runtime_api_version("1.3.0".into());
        Ok(Response::new(response))
    }
}

struct TestServer {
    addr: SocketAddr,
    state: Arc<Mutex<DeviceState>>,
    _runtime: Runtime,
}

impl TestServer {
    fn start(state: DeviceState) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        let listener = runtime.block_on(tokio::net::TcpListener::bind("127.0.0.1:0"))?;
        let addr = listener.local_addr()?;
        let state = Arc::new(Mutex::new(state));
        let device = MockDevice {
            state: state.clone(),
        };
        runtime.spawn(
            Server::builder()
                .add_service(P4RuntimeServer::new(device))
                .serve_with_incoming(TcpListenerStream::new(listener)),
        );
        Ok(TestServer {
            addr,
            state,
            _runtime: runtime,
        })
    }

    fn config(&self) -> ClientConfig {
        ClientConfig {
            grpc_addr: self.addr.to_string(),
            election_id: ElectionId { high: 0, low: 10 },
            ..Default::default()
        }
    }

    fn connect(&self) -> Result<RpcClient> {
        Ok(RpcClient::connect(self.config())?)
    }

    fn state(&self) -> std::sync::MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap()
    }
}

fn context() -> Result<Context> {
    let p4info: P4Info = proto::text_format::parse_from_str(P4INFO)?;
    Ok(Context::from_p4info(&p4info))
}

/// Polls `cond` until it holds or two seconds have passed.
fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}

#[test]
fn primary_arbitration() -> Result<()> {
    let server = TestServer::start(DeviceState::default())?;
    let client = server.connect()?;
    assert!(client.is_primary());
    assert_eq!(client.session_state(), SessionState::Primary);

    let arbitration = server.state().arbitrations[0].clone();
    assert_eq!(arbitration.get_device_id(), 1);
    assert_eq!(arbitration.get_election_id().get_low(), 10);
    assert!(!arbitration.has_role());
    Ok(())
}

#[test]
fn backup_arbitration() -> Result<()> {
    let server = TestServer::start(DeviceState {
        backup: true,
        ..Default::default()
    })?;
    let client = server.connect()?;
    assert!(!client.is_primary());
    assert_eq!(client.session_state(), SessionState::Backup);
    Ok(())
}

#[test]
fn arbitration_times_out() -> Result<()> {
    let server = TestServer::start(DeviceState {
        silent: true,
        ..Default::default()
    })?;
    let config = ClientConfig {
        arbitration_timeout: Duration::from_millis(200),
        ..server.config()
    };
    match RpcClient::connect(config) {
        Err(Error::ArbitrationTimeout { device_id, .. }) => assert_eq!(device_id, 1),
        Err(e) => panic!("unexpected error {}", e),
        Ok(_) => panic!("connected without an arbitration reply"),
    }
    Ok(())
}

#[test]
fn role_is_sent() -> Result<()> {
    let server = TestServer::start(DeviceState::default())?;
    let config = ClientConfig {
        role_name: Some("sdn".into()),
        ..server.config()
    };
    let _client = RpcClient::connect(config)?;
    assert_eq!(server.state().arbitrations[0].get_role().get_name(), "sdn");
    Ok(())
}

#[test]
fn writes_are_stamped() -> Result<()> {
    let server = TestServer::start(DeviceState::default())?;
    let client = server.connect()?;
    let ctx = context()?;

    TableEntry::new(&ctx, "ExactOne")?
        .with_match("header_test.field32", "10.0.0.1")?
        .with_action(Action::new(&ctx, "actionA")?.with("param", "00:11:22:33:44:55")?)?
        .insert(&client)?;

    let state = server.state();
    assert_eq!(state.writes.len(), 1);
    let req = &state.writes[0];
    assert_eq!(req.get_device_id(), 1);
    assert_eq!(req.get_election_id().get_low(), 10);
    assert_eq!(req.get_updates().len(), 1);
    let te = req.get_updates()[0].get_entity().get_table_entry();
    assert_eq!(te.get_table_id(), 33582705);
    assert_eq!(te.get_field_match()[0].get_exact().get_value(), &[10, 0, 0, 1]);
    Ok(())
}

#[test]
fn write_request_from_text_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("insert.txt");
    std::fs::write(
        &path,
        r#"
        updates {
          type: INSERT
          entity {
            table_entry {
              table_id: 33582705
              match { field_id: 1 exact { value: "\n\000\000\002" } }
              action { action { action_id: 16800567 } }
            }
          }
        }
        "#,
    )?;

    let server = TestServer::start(DeviceState::default())?;
    let client = server.connect()?;
    client.write_from_text(&path)?;
    {
        let state = server.state();
        let req = &state.writes[0];
        assert_eq!(req.get_device_id(), 1);
        assert_eq!(req.get_election_id().get_low(), 10);
        let te = req.get_updates()[0].get_entity().get_table_entry();
        assert_eq!(te.get_table_id(), 33582705);
        assert_eq!(te.get_field_match()[0].get_exact().get_value(), &[10, 0, 0, 2]);
    }

    let bad = dir.path().join("bad.txt");
    std::fs::write(&bad, "updates { type: SOMETIMES }")?;
    assert!(matches!(
        client.write_from_text(&bad),
        Err(Error::Parse { what: "WriteRequest", .. })
    ));
    assert_eq!(server.state().writes.len(), 1);
    Ok(())
}

fn p4_error(code: Code, message: &str) -> Result<Any> {
    let mut error = proto::p4runtime::Error::new();
    error.set_canonical_code(code.value());
    error.set_message(message.into());
    Ok(Any::pack(&error)?)
}

#[test]
fn batch_write_errors() -> Result<()> {
    let mut rpc_status = status::Status::new();
    rpc_status.set_code(Code::UNKNOWN.value());
    rpc_status.set_details(RepeatedField::from_vec(vec![
        p4_error(Code::OK, "")?,
        p4_error(Code::ALREADY_EXISTS, "Match entry exists, use MODIFY if you wish to change action")?,
    ]));
    let server = TestServer::start(DeviceState {
        write_error: Some(Status::with_details(
            tonic::Code::Unknown,
            "Write failure",
            rpc_status.write_to_bytes()?.into(),
        )),
        ..Default::default()
    })?;
    let client = server.connect()?;
    let ctx = context()?;

    let entry = TableEntry::new(&ctx, "ExactOne")?
        .with_match("field32", "1")?
        .with_action(Action::new(&ctx, "actionB")?.with("param", "2")?)?;
    match entry.insert(&client) {
        Err(Error::BatchWrite(errors)) => {
            assert_eq!(errors.len(), 1);
            let failure = &errors.0[0];
            assert_eq!(failure.index, 1);
            assert_eq!(failure.canonical_code, Code::ALREADY_EXISTS.value());
            assert!(errors.to_string().contains("ALREADY_EXISTS"));
        }
        other => panic!("unexpected result {:?}", other.err()),
    }

    // The failure was one-shot.
    entry.insert(&client)?;
    Ok(())
}

#[test]
fn read_spans_pages() -> Result<()> {
    let ctx = context()?;
    let mut pages = Vec::new();
    for (addr, param) in [("10.0.0.1", "1"), ("10.0.0.2", "2")] {
        let entity: Entity = TableEntry::new(&ctx, "ExactOne")?
            .with_match("field32", addr)?
            .with_action(Action::new(&ctx, "actionB")?.with("param", param)?)?
            .entity()?;
        let mut page = ReadResponse::new();
        page.set_entities(RepeatedField::from_vec(vec![entity]));
        pages.push(page);
    }
    let server = TestServer::start(DeviceState {
        read_pages: pages,
        ..Default::default()
    })?;
    let client = server.connect()?;

    let template = TableEntry::new(&ctx, "ExactOne")?;
    let entries = template.read(&client)?.collect::<Result<Vec<_>, _>>()?;
    assert_eq!(entries.len(), 2);
    assert_eq!(
        entries[1].to_string(),
        TableEntry::new(&ctx, "ExactOne")?
            .with_match("field32", "10.0.0.2")?
            .with_action(Action::new(&ctx, "actionB")?.with("param", "2")?)?
            .to_string()
    );

    let state = server.state();
    let req = &state.reads[0];
    assert_eq!(req.get_device_id(), 1);
    assert_eq!(req.get_entities()[0].get_table_entry().get_table_id(), 33582705);
    assert!(req.get_entities()[0].get_table_entry().get_field_match().is_empty());
    Ok(())
}

#[test]
fn pipeline_config_round_trip() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let p4info_path = dir.path().join("unittest.p4info.txt");
    let bin_path = dir.path().join("unittest.json");
    std::fs::write(&p4info_path, P4INFO)?;
    std::fs::write(&bin_path, b"{}")?;

    let server = TestServer::start(DeviceState::default())?;
    let client = server.connect()?;
    assert!(matches!(client.get_p4info(), Err(Error::Rpc { .. })));

    client.set_fwd_pipe_config(&p4info_path, &bin_path)?;
    assert_eq!(
        server.state().config.as_ref().map(|c| c.get_p4_device_config().to_vec()),
        Some(b"{}".to_vec())
    );

    let p4info = client.get_p4info()?;
    assert_eq!(p4info.get_tables().len(), 8);
    let ctx = Context::from_p4info(&p4info);
    assert!(ctx.schema().table("ActSelTable")?.has_selector());

    assert!(matches!(
        client.set_fwd_pipe_config(dir.path().join("missing.txt"), &bin_path),
        Err(Error::Io { .. })
    ));
    Ok(())
}

#[test]
fn api_version() -> Result<()> {
    let server = TestServer::start(DeviceState::default())?;
    let client = server.connect()?;
    assert_eq!(client.api_version()?, "1.3.0");
    Ok(())
}

#[test]
fn packet_in_and_digest_are_queued() -> Result<()> {
    let mut packet = PacketIn::new();
    packet.set_payload(vec![0xde, 0xad]);
    let mut metadata = PacketMetadata::new();
    metadata.set_metadata_id(1);
    metadata.set_value(vec![0x00, 0x05]);
    packet.mut_metadata().push(metadata);
    let mut packet_msg = StreamMessageResponse::new();
    packet_msg.set_packet(packet);

    let mut digest = DigestList::new();
    digest.set_digest_id(401776493);
    digest.set_list_id(7);
    let mut digest_msg = StreamMessageResponse::new();
    digest_msg.set_digest(digest);

    let server = TestServer::start(DeviceState {
        pending: vec![digest_msg, packet_msg],
        ..Default::default()
    })?;
    let client = server.connect()?;
    let ctx = context()?;

    // Each kind has its own queue, so the digest does not hold up the
    // packet.
    match client.get_stream_packet(StreamKind::Packet, Some(Duration::from_secs(2)))? {
        Some(StreamEnvelope::Packet(msg)) => {
            let packet = p4rt_client::PacketIn::decode(&ctx, &msg)?;
            assert_eq!(packet.payload, vec![0xde, 0xad]);
            assert_eq!(packet.metadata_u128("ingress_port"), Some(5));
        }
        other => panic!("unexpected message {:?}", other),
    }
    let list = match client.get_stream_packet(StreamKind::Digest, Some(Duration::from_secs(2)))? {
        Some(StreamEnvelope::Digest(list)) => list,
        other => panic!("unexpected message {:?}", other),
    };
    assert_eq!(list.get_list_id(), 7);
    assert!(client
        .get_stream_packet(StreamKind::Packet, Some(Duration::from_millis(50)))?
        .is_none());

    client.ack_digest_list(list.get_digest_id(), list.get_list_id())?;
    assert!(wait_for(|| !server.state().digest_acks.is_empty()));
    assert_eq!(server.state().digest_acks[0].get_list_id(), 7);
    Ok(())
}

#[test]
fn packet_out_is_sent() -> Result<()> {
    let server = TestServer::start(DeviceState::default())?;
    let client = server.connect()?;
    let ctx = context()?;

    let mut packet = p4rt_client::PacketOut::new(&ctx)?.with_metadata("egress_port", "3")?;
    packet.set_payload(b"hello".to_vec());
    packet.send(&client)?;

    assert!(wait_for(|| !server.state().packet_outs.is_empty()));
    let state = server.state();
    let sent = &state.packet_outs[0];
    assert_eq!(sent.get_payload(), b"hello");
    assert_eq!(sent.get_metadata()[0].get_value(), &[3]);
    Ok(())
}

#[test]
fn calls_fail_after_tear_down() -> Result<()> {
    let server = TestServer::start(DeviceState::default())?;
    let client = server.connect()?;
    client.tear_down();
    client.tear_down();

    assert_eq!(client.session_state(), SessionState::Closed);
    assert!(matches!(client.api_version(), Err(Error::SessionClosed)));
    assert!(matches!(
        client.get_stream_packet(StreamKind::Packet, Some(Duration::from_millis(10))),
        Err(Error::SessionClosed)
    ));
    assert!(matches!(
        client.ack_digest_list(1, 1),
        Err(Error::SessionClosed)
    ));
    Ok(())
}
