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

//! The StreamChannel session.
//!
//! One background thread drives the bidirectional stream: it issues the
//! StreamChannel call, feeds it from an outbound queue and sorts every
//! inbound message into one queue per [`StreamKind`].  When the stream ends
//! every queue receives a single end-of-stream marker, so that consumers
//! blocked on [`StreamQueues::get`] wake up with [`Error::StreamClosed`].

use futures::stream;

use proto::code::Code;
use proto::p4runtime::{
    DigestList, IdleTimeoutNotification, MasterArbitrationUpdate, PacketIn,
    StreamMessageRequest, StreamMessageResponse,
};
use proto::p4runtime_grpc::P4RuntimeClient;

use protobuf::ProtobufEnum;

use std::fmt::{self, Display};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tonic::transport::Channel;

use tracing::{debug, error, warn};

use crate::error::{Error, Result};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The classes of messages the server pushes on the stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Arbitration,
    Packet,
    Digest,
    IdleTimeoutNotification,
    Unknown,
}

impl StreamKind {
    pub const ALL: [StreamKind; 5] = [
        StreamKind::Arbitration,
        StreamKind::Packet,
        StreamKind::Digest,
        StreamKind::IdleTimeoutNotification,
        StreamKind::Unknown,
    ];

    pub fn name(self) -> &'static str {
        match self {
            StreamKind::Arbitration => "arbitration",
            StreamKind::Packet => "packet",
            StreamKind::Digest => "digest",
            StreamKind::IdleTimeoutNotification => "idle_timeout_notification",
            StreamKind::Unknown => "unknown",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for StreamKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        StreamKind::ALL
            .iter()
            .find(|k| k.name() == s)
            .copied()
            .ok_or_else(|| Error::UnknownStreamKind(s.to_string()))
    }
}

/// One classified inbound stream message.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEnvelope {
    Arbitration(MasterArbitrationUpdate),
    Packet(PacketIn),
    Digest(DigestList),
    IdleTimeoutNotification(IdleTimeoutNotification),
    /// Stream errors and anything else the client does not interpret.
    Unknown(StreamMessageResponse),
}

impl StreamEnvelope {
    pub fn kind(&self) -> StreamKind {
        match self {
            StreamEnvelope::Arbitration(_) => StreamKind::Arbitration,
            StreamEnvelope::Packet(_) => StreamKind::Packet,
            StreamEnvelope::Digest(_) => StreamKind::Digest,
            StreamEnvelope::IdleTimeoutNotification(_) => StreamKind::IdleTimeoutNotification,
            StreamEnvelope::Unknown(_) => StreamKind::Unknown,
        }
    }
}

impl From<StreamMessageResponse> for StreamEnvelope {
    fn from(mut msg: StreamMessageResponse) -> Self {
        if msg.has_arbitration() {
            StreamEnvelope::Arbitration(msg.take_arbitration())
        } else if msg.has_packet() {
            StreamEnvelope::Packet(msg.take_packet())
        } else if msg.has_digest() {
            StreamEnvelope::Digest(msg.take_digest())
        } else if msg.has_idle_timeout_notification() {
            StreamEnvelope::IdleTimeoutNotification(msg.take_idle_timeout_notification())
        } else {
            StreamEnvelope::Unknown(msg)
        }
    }
}

/// `None` marks the end of the stream.
type Slot = Option<StreamEnvelope>;

#[derive(Default)]
struct QueueState {
    slots: VecDeque<Slot>,
    closed: bool,
}

/// The lock is released while a consumer waits, so one blocked `get` never
/// stalls another consumer of the same kind.
#[derive(Default)]
struct Queue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl Queue {
    fn push(&self, envelope: StreamEnvelope) {
        let mut state = lock(&self.state);
        if state.closed {
            return;
        }
        state.slots.push_back(Some(envelope));
        self.ready.notify_one();
    }

    fn close(&self) {
        let mut state = lock(&self.state);
        state.closed = true;
        state.slots.push_back(None);
        self.ready.notify_all();
    }

    fn get(&self, timeout: Option<Duration>) -> Result<Option<StreamEnvelope>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = lock(&self.state);
        loop {
            match state.slots.pop_front() {
                Some(Some(envelope)) => return Ok(Some(envelope)),
                Some(None) => {
                    self.ready.notify_all();
                    return Err(Error::StreamClosed);
                }
                None if state.closed => return Err(Error::StreamClosed),
                None => {}
            }
            state = match deadline {
                None => self
                    .ready
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    self.ready
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }
}

/// Unbounded per-kind queues between the receiver thread and consumers.
#[derive(Default)]
pub struct StreamQueues {
    queues: [Queue; 5],
    closed: AtomicBool,
}

impl StreamQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `envelope` to the queue of its kind.  Ignored once closed.
    pub fn push(&self, envelope: StreamEnvelope) {
        self.queues[envelope.kind().index()].push(envelope);
    }

    /// Queues the end-of-stream marker on every queue.  Only the first call
    /// has an effect.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for queue in &self.queues {
            queue.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Pops the next message of `kind`, waiting at most `timeout` (forever
    /// if `None`).  Returns `Ok(None)` on timeout and
    /// [`Error::StreamClosed`] once the stream has ended and the queue is
    /// drained.
    pub fn get(&self, kind: StreamKind, timeout: Option<Duration>) -> Result<Option<StreamEnvelope>> {
        self.queues[kind.index()].get(timeout)
    }

    #[cfg(test)]
    fn drain(&self, kind: StreamKind) -> Vec<Slot> {
        lock(&self.queues[kind.index()].state).slots.drain(..).collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// The stream ended after the session was established.
    Disconnected,
    Connecting,
    AwaitingArbitration,
    Primary,
    Backup,
    Closed,
}

/// Builds the arbitration request that opens a session.
pub fn arbitration_request(
    device_id: u64,
    election_id: proto::p4runtime::Uint128,
    role_name: Option<&str>,
) -> MasterArbitrationUpdate {
    let mut arbitration = MasterArbitrationUpdate::new();
    arbitration.set_device_id(device_id);
    arbitration.set_election_id(election_id);
    if let Some(name) = role_name {
        arbitration.mut_role().set_name(name.to_string());
    }
    arbitration
}

async fn receive(
    stub: &mut P4RuntimeClient<Channel>,
    outbound: mpsc::UnboundedReceiver<Option<StreamMessageRequest>>,
    queues: &StreamQueues,
) -> std::result::Result<(), tonic::Status> {
    // The request stream ends at the first `None`.
    let requests = stream::unfold(outbound, |mut rx| async move {
        match rx.recv().await {
            Some(Some(msg)) => Some((msg, rx)),
            _ => None,
        }
    });
    let mut inbound = stub.stream_channel(requests).await?.into_inner();
    while let Some(msg) = inbound.message().await? {
        queues.push(msg.into());
    }
    Ok(())
}

fn spawn_receiver(
    handle: Handle,
    mut stub: P4RuntimeClient<Channel>,
    outbound: mpsc::UnboundedReceiver<Option<StreamMessageRequest>>,
    queues: Arc<StreamQueues>,
    failure: Arc<Mutex<Option<tonic::Status>>>,
    cancel: CancellationToken,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("p4rt-stream".into())
        .spawn(move || {
            handle.block_on(async move {
                tokio::select! {
                    _ = cancel.cancelled() => debug!("Stream receiver cancelled"),
                    result = receive(&mut stub, outbound, &queues) => match result {
                        Ok(()) => debug!("StreamChannel closed by server"),
                        Err(status) => {
                            error!("StreamChannel error, closing stream: {}", status);
                            *lock(&failure) = Some(status);
                        }
                    },
                }
                queues.close();
            })
        })
}

/// The client's StreamChannel: arbitration, then packet I/O and
/// notifications until torn down.
pub struct StreamSession {
    state: Mutex<SessionState>,
    queues: Arc<StreamQueues>,
    outbound: mpsc::UnboundedSender<Option<StreamMessageRequest>>,
    cancel: CancellationToken,
    receiver: Mutex<Option<JoinHandle<()>>>,
    failure: Arc<Mutex<Option<tonic::Status>>>,
}

impl StreamSession {
    /// Opens the stream and performs arbitration, waiting up to `timeout`
    /// for the server's reply.  A session that does not get one is torn
    /// down before returning.
    pub fn open(
        handle: &Handle,
        stub: P4RuntimeClient<Channel>,
        arbitration: MasterArbitrationUpdate,
        timeout: Duration,
    ) -> Result<Self> {
        let device_id = arbitration.get_device_id();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let queues = Arc::new(StreamQueues::new());
        let cancel = CancellationToken::new();
        let failure = Arc::new(Mutex::new(None));
        let receiver = spawn_receiver(
            handle.clone(),
            stub,
            outbound_rx,
            queues.clone(),
            failure.clone(),
            cancel.clone(),
        )
        .map_err(Error::Runtime)?;

        let session = StreamSession {
            state: Mutex::new(SessionState::Connecting),
            queues,
            outbound,
            cancel,
            receiver: Mutex::new(Some(receiver)),
            failure,
        };

        let mut request = StreamMessageRequest::new();
        request.set_arbitration(arbitration);
        session.send(request)?;
        *lock(&session.state) = SessionState::AwaitingArbitration;

        match session.queues.get(StreamKind::Arbitration, Some(timeout)) {
            Ok(Some(StreamEnvelope::Arbitration(reply))) => {
                let primary = reply.get_status().get_code() == Code::OK.value();
                if primary {
                    debug!("Session established, client is 'primary'");
                    *lock(&session.state) = SessionState::Primary;
                } else {
                    debug!("Session established, client is 'backup'");
                    warn!("You are not the primary client, you only have read access to the server");
                    *lock(&session.state) = SessionState::Backup;
                }
                Ok(session)
            }
            Ok(Some(envelope)) => {
                session.tear_down();
                Err(Error::ProtocolDecode(format!(
                    "expected an arbitration reply, got a {} message",
                    envelope.kind()
                )))
            }
            Ok(None) => {
                error!("Failed to establish session with server");
                session.tear_down();
                Err(Error::ArbitrationTimeout { device_id, timeout })
            }
            Err(_) => {
                session.tear_down();
                match lock(&session.failure).take() {
                    Some(status) => Err(status.into()),
                    None => Err(Error::StreamClosed),
                }
            }
        }
    }

    pub fn state(&self) -> SessionState {
        let state = *lock(&self.state);
        match state {
            SessionState::Primary | SessionState::Backup if self.queues.is_closed() => {
                SessionState::Disconnected
            }
            state => state,
        }
    }

    pub fn is_primary(&self) -> bool {
        self.state() == SessionState::Primary
    }

    pub fn is_closed(&self) -> bool {
        *lock(&self.state) == SessionState::Closed
    }

    /// Queues a message on the stream.  Messages are sent in the order
    /// they are queued.
    pub fn send(&self, msg: StreamMessageRequest) -> Result<()> {
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }
        if self.queues.is_closed() {
            return Err(Error::StreamClosed);
        }
        self.outbound.send(Some(msg)).map_err(|_| Error::StreamClosed)
    }

    pub fn get(&self, kind: StreamKind, timeout: Option<Duration>) -> Result<Option<StreamEnvelope>> {
        self.queues.get(kind, timeout)
    }

    /// Ends the stream and joins the receiver thread.  Later calls do
    /// nothing.
    pub fn tear_down(&self) {
        {
            let mut state = lock(&self.state);
            if *state == SessionState::Closed {
                return;
            }
            *state = SessionState::Closed;
        }
        debug!("Cleaning up stream");
        let _ = self.outbound.send(None);
        self.queues.close();
        self.cancel.cancel();
        if let Some(receiver) = lock(&self.receiver).take() {
            if receiver.join().is_err() {
                error!("Stream receiver thread panicked");
            }
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.tear_down();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proto::p4runtime::StreamError;

    fn packet(payload: &[u8]) -> StreamMessageResponse {
        let mut msg = StreamMessageResponse::new();
        msg.mut_packet().set_payload(payload.to_vec());
        msg
    }

    #[test]
    fn kind_names() {
        assert_eq!(
            "idle_timeout_notification".parse::<StreamKind>().unwrap(),
            StreamKind::IdleTimeoutNotification
        );
        assert_eq!("packet".parse::<StreamKind>().unwrap(), StreamKind::Packet);
        assert!(matches!(
            "packets".parse::<StreamKind>(),
            Err(Error::UnknownStreamKind(_))
        ));
    }

    #[test]
    fn classification() {
        let env: StreamEnvelope = packet(b"x").into();
        assert_eq!(env.kind(), StreamKind::Packet);

        let mut msg = StreamMessageResponse::new();
        msg.mut_digest().set_list_id(3);
        assert_eq!(StreamEnvelope::from(msg).kind(), StreamKind::Digest);

        let mut msg = StreamMessageResponse::new();
        msg.set_error(StreamError::new());
        assert_eq!(StreamEnvelope::from(msg).kind(), StreamKind::Unknown);

        assert_eq!(
            StreamEnvelope::from(StreamMessageResponse::new()).kind(),
            StreamKind::Unknown
        );
    }

    #[test]
    fn per_kind_fifo() {
        let queues = StreamQueues::new();
        queues.push(packet(b"1").into());
        let mut msg = StreamMessageResponse::new();
        msg.mut_digest().set_list_id(7);
        queues.push(msg.into());
        queues.push(packet(b"2").into());

        let first = queues.get(StreamKind::Packet, Some(Duration::ZERO)).unwrap();
        assert!(matches!(first, Some(StreamEnvelope::Packet(p)) if p.get_payload() == b"1"));
        let second = queues.get(StreamKind::Packet, Some(Duration::ZERO)).unwrap();
        assert!(matches!(second, Some(StreamEnvelope::Packet(p)) if p.get_payload() == b"2"));
        assert!(queues.get(StreamKind::Packet, Some(Duration::ZERO)).unwrap().is_none());
        assert!(queues.get(StreamKind::Digest, None).unwrap().is_some());
    }

    #[test]
    fn timeout_returns_none() {
        let queues = StreamQueues::new();
        let start = Instant::now();
        let got = queues
            .get(StreamKind::Arbitration, Some(Duration::from_millis(50)))
            .unwrap();
        assert!(got.is_none());
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn close_queues_one_marker_per_kind() {
        let queues = StreamQueues::new();
        queues.push(packet(b"late").into());
        queues.close();
        queues.close();
        queues.push(packet(b"ignored").into());
        assert!(queues.is_closed());

        for kind in StreamKind::ALL.iter().copied() {
            let slots = queues.drain(kind);
            let markers = slots.iter().filter(|s| s.is_none()).count();
            assert_eq!(markers, 1, "kind {}", kind);
            if kind == StreamKind::Packet {
                assert_eq!(slots.len(), 2);
            } else {
                assert_eq!(slots.len(), 1);
            }
            // Closure is sticky once the marker has been consumed.
            assert!(matches!(queues.get(kind, None), Err(Error::StreamClosed)));
        }
    }

    #[test]
    fn close_wakes_blocked_consumer() {
        let queues = Arc::new(StreamQueues::new());
        let consumer = {
            let queues = queues.clone();
            thread::spawn(move || queues.get(StreamKind::Packet, None))
        };
        thread::sleep(Duration::from_millis(20));
        queues.close();
        let result = consumer.join().unwrap();
        assert!(matches!(result, Err(Error::StreamClosed)));
    }

    #[test]
    fn blocked_consumer_does_not_stall_timed_get() {
        let queues = Arc::new(StreamQueues::new());
        let blocked = {
            let queues = queues.clone();
            thread::spawn(move || queues.get(StreamKind::Packet, None))
        };
        thread::sleep(Duration::from_millis(20));

        let start = Instant::now();
        let got = queues
            .get(StreamKind::Packet, Some(Duration::from_millis(100)))
            .unwrap();
        assert!(got.is_none());
        assert!(start.elapsed() < Duration::from_secs(1));

        queues.push(packet(b"one").into());
        let delivered = blocked.join().unwrap().unwrap();
        assert!(matches!(delivered, Some(StreamEnvelope::Packet(p)) if p.get_payload() == b"one"));

        let waiters: Vec<_> = (0..2)
            .map(|_| {
                let queues = queues.clone();
                thread::spawn(move || queues.get(StreamKind::Packet, None))
            })
            .collect();
        thread::sleep(Duration::from_millis(20));
        queues.close();
        for waiter in waiters {
            assert!(matches!(waiter.join().unwrap(), Err(Error::StreamClosed)));
        }
    }
}
