//! Instrumented reactor stubs: scripted connects and accepts, delayed or
//! failing completions, and an operation log per connection.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use keel_transport::{
    ConnectionError, LengthPrefixedCodec, Listener, Message, MessageParser, MessageSerializer,
    NetworkError, NetworkProvider, Reactor, Result, SessionIo, TransportConfig, TransportHandler,
    WireCodec,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;

/// What a stubbed connection records, in call order.
#[derive(Debug, Clone)]
pub enum IoOp {
    /// A receive was issued (before its completion was delivered).
    RecvArmed,
    /// A send carried these bytes (all buffers concatenated).
    Send(Bytes),
    /// The connection was closed.
    Closed,
}

/// Scripted connection endpoint with an operation log.
///
/// Receive completions are driven by the paired [`StubFeeder`]: nothing fed
/// means the completion stays delayed, which is how tests hold an operation
/// in flight.
pub struct StubIo {
    peer: SocketAddr,
    chunks: tokio::sync::Mutex<mpsc::UnboundedReceiver<io::Result<Bytes>>>,
    ops: Mutex<Vec<IoOp>>,
    fail_sends: AtomicBool,
    closed: CancellationToken,
}

/// Drives the receive side of a [`StubIo`].
pub struct StubFeeder {
    tx: mpsc::UnboundedSender<io::Result<Bytes>>,
}

impl StubFeeder {
    /// Complete the pending (or next) receive with `bytes`.
    pub fn feed_bytes(&self, bytes: &[u8]) {
        let _ = self.tx.send(Ok(Bytes::copy_from_slice(bytes)));
    }

    /// Complete the pending (or next) receive with an error.
    pub fn feed_error(&self, kind: io::ErrorKind) {
        let _ = self.tx.send(Err(kind.into()));
    }

    /// Complete the pending (or next) receive with end-of-stream.
    pub fn feed_eof(&self) {
        let _ = self.tx.send(Ok(Bytes::new()));
    }
}

impl StubIo {
    pub fn new(peer: SocketAddr) -> (Arc<Self>, StubFeeder) {
        let (tx, rx) = mpsc::unbounded_channel();
        let io = Arc::new(Self {
            peer,
            chunks: tokio::sync::Mutex::new(rx),
            ops: Mutex::new(Vec::new()),
            fail_sends: AtomicBool::new(false),
            closed: CancellationToken::new(),
        });
        (io, StubFeeder { tx })
    }

    /// Make every subsequent send fail.
    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    pub fn ops(&self) -> Vec<IoOp> {
        self.ops.lock().clone()
    }

    /// Bytes of every completed send, in order.
    pub fn sent(&self) -> Vec<Bytes> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                IoOp::Send(bytes) => Some(bytes),
                _ => None,
            })
            .collect()
    }

    pub fn recv_armed_count(&self) -> usize {
        self.ops()
            .iter()
            .filter(|op| matches!(op, IoOp::RecvArmed))
            .count()
    }

    pub fn was_closed(&self) -> bool {
        self.ops().iter().any(|op| matches!(op, IoOp::Closed))
    }
}

#[async_trait]
impl SessionIo for StubIo {
    async fn recv(&self, buf: &mut BytesMut) -> io::Result<usize> {
        self.ops.lock().push(IoOp::RecvArmed);
        let mut chunks = self.chunks.lock().await;
        tokio::select! {
            () = self.closed.cancelled() => Err(io::ErrorKind::ConnectionAborted.into()),
            chunk = chunks.recv() => match chunk {
                Some(Ok(bytes)) if bytes.is_empty() => Ok(0),
                Some(Ok(bytes)) => {
                    buf.extend_from_slice(&bytes);
                    Ok(bytes.len())
                }
                Some(Err(e)) => Err(e),
                None => Ok(0),
            },
        }
    }

    async fn send(&self, bufs: Vec<Bytes>) -> io::Result<()> {
        if self.closed.is_cancelled() {
            return Err(io::ErrorKind::ConnectionAborted.into());
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        let mut joined = BytesMut::new();
        for buf in &bufs {
            joined.extend_from_slice(buf);
        }
        self.ops.lock().push(IoOp::Send(joined.freeze()));
        Ok(())
    }

    async fn close(&self) {
        self.closed.cancel();
        self.ops.lock().push(IoOp::Closed);
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        Some(self.peer)
    }
}

/// One scripted outcome for `Reactor::connect`.
pub enum ConnectScript {
    /// Resolve immediately with this connection.
    Succeed(Arc<StubIo>),
    /// Resolve once the gate is notified, then succeed.
    Gated(Arc<Notify>, Arc<StubIo>),
    /// Fail with this error kind.
    Fail(io::ErrorKind),
    /// Never resolve.
    Hang,
}

/// One scripted outcome for `Listener::accept`.
pub enum AcceptScript {
    Succeed(Arc<StubIo>, SocketAddr),
    Fail(io::ErrorKind),
}

pub struct StubListener {
    accepts: Mutex<VecDeque<AcceptScript>>,
    local: SocketAddr,
}

impl StubListener {
    pub fn new(local: SocketAddr, accepts: Vec<AcceptScript>) -> Self {
        Self {
            accepts: Mutex::new(accepts.into()),
            local,
        }
    }
}

#[async_trait]
impl Listener for StubListener {
    async fn accept(&self) -> Result<(Arc<dyn SessionIo>, SocketAddr)> {
        let script = self.accepts.lock().pop_front();
        match script {
            Some(AcceptScript::Succeed(io, addr)) => Ok((io, addr)),
            Some(AcceptScript::Fail(kind)) => Err(NetworkError::AcceptFailed(kind.into()).into()),
            None => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.local)
    }
}

/// Scripted reactor. Unscripted connects and accepts stay pending forever,
/// so a test observes exactly the operations it scripted.
#[derive(Default)]
pub struct StubReactor {
    connects: Mutex<VecDeque<ConnectScript>>,
    listeners: Mutex<VecDeque<StubListener>>,
    attempts: AtomicUsize,
}

impl StubReactor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script_connect(&self, script: ConnectScript) {
        self.connects.lock().push_back(script);
    }

    pub fn script_listener(&self, listener: StubListener) {
        self.listeners.lock().push_back(listener);
    }

    /// How many connect attempts were issued so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Reactor for StubReactor {
    async fn connect(&self, remote: SocketAddr) -> Result<Arc<dyn SessionIo>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let script = self.connects.lock().pop_front();
        match script {
            Some(ConnectScript::Succeed(io)) => Ok(io),
            Some(ConnectScript::Gated(gate, io)) => {
                gate.notified().await;
                Ok(io)
            }
            Some(ConnectScript::Fail(kind)) => Err(ConnectionError::ConnectFailed {
                addr: remote,
                source: kind.into(),
            }
            .into()),
            Some(ConnectScript::Hang) | None => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }

    async fn listen(&self, _local: SocketAddr) -> Result<Box<dyn Listener>> {
        let listener = self
            .listeners
            .lock()
            .pop_front()
            .unwrap_or_else(|| StubListener::new(test_addr(0), Vec::new()));
        Ok(Box::new(listener))
    }
}

/// Handler that records every notification.
#[derive(Default)]
pub struct RecordingHandler {
    pub messages: Mutex<Vec<(SocketAddr, Message)>>,
    pub accepted: Mutex<Vec<Arc<keel_transport::ServerSession>>>,
    pub disconnected: Mutex<Vec<SocketAddr>>,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn message_count(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn accepted_count(&self) -> usize {
        self.accepted.lock().len()
    }

    pub fn disconnected_count(&self) -> usize {
        self.disconnected.lock().len()
    }
}

impl TransportHandler for RecordingHandler {
    fn on_message_received(&self, remote: SocketAddr, message: Message) {
        self.messages.lock().push((remote, message));
    }

    fn on_session_accepted(&self, session: &Arc<keel_transport::ServerSession>) {
        self.accepted.lock().push(Arc::clone(session));
    }

    fn on_session_disconnected(&self, remote: SocketAddr) {
        self.disconnected.lock().push(remote);
    }
}

/// A provider wired to stubs.
pub fn stub_provider(reactor: Arc<StubReactor>, handler: Arc<RecordingHandler>) -> NetworkProvider {
    NetworkProvider::new(
        reactor,
        Arc::new(LengthPrefixedCodec::new()),
        handler,
        TransportConfig::default(),
    )
}

pub fn test_addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

/// Serialize `messages` into one contiguous wire blob.
pub fn wire_blob(messages: &[Message]) -> Vec<u8> {
    let codec = LengthPrefixedCodec::new();
    let serializer = codec.serializer();
    let mut wire = Vec::new();
    for message in messages {
        for buf in serializer.serialize_for_send(message) {
            wire.extend_from_slice(&buf);
        }
    }
    wire
}

/// Decode every message in `wire` with the default codec.
pub fn decode_all(wire: &[u8]) -> Vec<Message> {
    let codec = LengthPrefixedCodec::new();
    let mut parser = codec.new_parser();
    parser.read_buffer(0).extend_from_slice(wire);

    let mut out = Vec::new();
    let mut count = wire.len();
    loop {
        match parser.on_bytes_received(count).unwrap() {
            (Some(message), _) => {
                out.push(message);
                count = 0;
            }
            (None, _) => break,
        }
    }
    out
}

/// Poll `condition` until it holds or a five second deadline passes.
pub async fn wait_for(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
