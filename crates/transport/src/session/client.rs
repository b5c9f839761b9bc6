//! Active sessions: connect, bounded reconnect, queued sends.

use super::{SessionCore, drive_receive};
use crate::config::ReconnectPolicy;
use crate::error::ConnectionError;
use crate::events::TransportHandler;
use crate::matcher::RequestMatcher;
use crate::protocol::message::{Message, MessageKind};
use crate::protocol::parser::WireCodec;
use crate::reactor::{Reactor, SessionIo};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Connection state of a client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// No live socket. The initial state, and where failures land before a
    /// reconnect.
    Closed = 0,
    /// A connect attempt is in flight.
    Connecting = 1,
    /// Established; reads and writes flow.
    Connected = 2,
}

impl SessionState {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Connected,
            _ => Self::Closed,
        }
    }
}

/// Atomic state tag with transition helpers that report whether the
/// transition happened.
struct StateCell(AtomicU8);

impl StateCell {
    const fn new(state: SessionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    fn load(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::SeqCst))
    }

    fn set(&self, state: SessionState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    /// Move `from` to `to`. Only one caller can win a given transition.
    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// One outbound connection, keyed by its remote address.
///
/// Created `Closed`; `connect` (or the first `write`) brings it up.
/// Connect, read and write failures all funnel into a bounded reconnect
/// loop. Once the budget is spent the session is abandoned for good: the
/// socket closes, pending requests fail, the engine hears
/// `on_session_disconnected`, and no further connects are attempted until
/// the engine asks the provider for a new session.
pub struct ClientSession {
    // Handed to every spawned operation so in-flight work owns the session.
    weak: Weak<Self>,
    reactor: Arc<dyn Reactor>,
    codec: Arc<dyn WireCodec>,
    handler: Arc<dyn TransportHandler>,
    matcher: Arc<RequestMatcher>,
    policy: ReconnectPolicy,
    core: SessionCore,
    state: StateCell,
    reconnect_attempts: AtomicU32,
    io: RwLock<Option<Arc<dyn SessionIo>>>,
    pending: Mutex<VecDeque<Message>>,
}

impl ClientSession {
    pub(crate) fn new(
        remote: SocketAddr,
        reactor: Arc<dyn Reactor>,
        codec: Arc<dyn WireCodec>,
        handler: Arc<dyn TransportHandler>,
        matcher: Arc<RequestMatcher>,
        policy: ReconnectPolicy,
    ) -> Arc<Self> {
        let serializer = codec.serializer();
        Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            reactor,
            codec,
            handler,
            matcher,
            policy,
            core: SessionCore::new(serializer, remote),
            state: StateCell::new(SessionState::Closed),
            reconnect_attempts: AtomicU32::new(0),
            io: RwLock::new(None),
            pending: Mutex::new(VecDeque::new()),
        })
    }

    /// Remote endpoint this session targets.
    #[must_use]
    pub fn remote(&self) -> SocketAddr {
        self.core.remote()
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state.load()
    }

    /// The matcher correlating this session's responses.
    #[must_use]
    pub fn matcher(&self) -> &Arc<RequestMatcher> {
        &self.matcher
    }

    /// Consecutive failures since the last successful connect.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Whether the session has been abandoned or explicitly closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    /// Start connecting if the session is `Closed`.
    ///
    /// A no-op while `Connecting` or `Connected` (only one path can win the
    /// `Closed -> Connecting` transition), and permanently a no-op once the
    /// session has been abandoned.
    pub fn connect(&self) {
        if self.core.is_closed() {
            return;
        }
        if !self
            .state
            .transition(SessionState::Closed, SessionState::Connecting)
        {
            return;
        }

        // The attempt owns a strong handle for its whole lifetime, read
        // loop included.
        let Some(this) = self.weak.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            this.run_connect().await;
        });
    }

    async fn run_connect(self: Arc<Self>) {
        if !self.policy.retry_delay.is_zero()
            && self.reconnect_attempts.load(Ordering::SeqCst) > 0
        {
            tokio::time::sleep(self.policy.retry_delay).await;
        }

        match self.reactor.connect(self.remote()).await {
            Ok(io) => {
                if self.core.is_closed() {
                    io.close().await;
                    return;
                }

                *self.io.write() = Some(Arc::clone(&io));
                self.reconnect_attempts.store(0, Ordering::SeqCst);
                self.state.set(SessionState::Connected);
                info!("client session {} connected", self.remote());

                // Drain messages queued while disconnected before arming the
                // first read, so responses cannot race ahead of still-unsent
                // requests.
                if let Err(e) = self.flush_pending(&io).await {
                    warn!("client session {} flush failed: {}", self.remote(), e);
                    self.on_failure().await;
                    return;
                }

                self.read_loop(&io).await;
            }
            Err(e) => {
                warn!("client session {} connect failed: {}", self.remote(), e);
                self.on_failure().await;
            }
        }
    }

    /// Send queued messages in enqueue order.
    async fn flush_pending(&self, io: &Arc<dyn SessionIo>) -> Result<(), ConnectionError> {
        loop {
            let message = self.pending.lock().pop_front();
            let Some(message) = message else {
                return Ok(());
            };
            self.core.send(io.as_ref(), &message).await?;
        }
    }

    async fn read_loop(&self, io: &Arc<dyn SessionIo>) {
        let mut parser = self.codec.new_parser();
        let matcher = Arc::clone(&self.matcher);
        let handler = Arc::clone(&self.handler);
        let remote = self.remote();

        let error = drive_receive(io.as_ref(), parser.as_mut(), |message| {
            if message.header.kind == MessageKind::Response {
                matcher.dispatch(message);
            } else {
                handler.on_message_received(remote, message);
            }
        })
        .await;

        if self.core.is_closed() {
            return;
        }
        debug!("client session {} read failed: {}", remote, error);
        self.on_failure().await;
    }

    /// Route any connect/read/write failure: fall back to `Closed`, then
    /// reconnect, or abandon the session once the budget is spent.
    async fn on_failure(&self) {
        self.state.set(SessionState::Closed);
        let io = self.io.write().take();
        if let Some(io) = io {
            io.close().await;
        }

        let attempts = self.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempts > self.policy.max_attempts {
            self.abandon(attempts);
            return;
        }

        self.connect();
    }

    fn abandon(&self, attempts: u32) {
        if !self.core.mark_closed() {
            return;
        }
        warn!(
            "client session {} abandoned: {}",
            self.remote(),
            ConnectionError::ReconnectExhausted { attempts }
        );
        self.matcher.clear();
        self.handler.on_session_disconnected(self.remote());
    }

    /// Hand `message` to the session for transmission.
    ///
    /// When connected with nothing queued ahead of it, this issues an
    /// independent asynchronous send. Otherwise the message is queued, to be
    /// drained in order once a connection is up, and a connect is kicked off
    /// if none is in flight. Messages handed to an abandoned session are
    /// dropped with a warning.
    pub fn write(&self, message: Message) {
        if self.core.is_closed() {
            warn!(
                "client session {} is abandoned, dropping message {}",
                self.remote(),
                message.header.id
            );
            return;
        }

        // Decide under the queue lock so a connect completing concurrently
        // cannot slip between the state check and the enqueue.
        let direct = {
            let mut pending = self.pending.lock();
            if self.state.load() == SessionState::Connected && pending.is_empty() {
                Some(message)
            } else {
                pending.push_back(message);
                None
            }
        };

        if let Some(message) = direct {
            let io = self.io.read().clone();
            if let (Some(io), Some(this)) = (io, self.weak.upgrade()) {
                tokio::spawn(async move {
                    if let Err(e) = this.core.send(io.as_ref(), &message).await {
                        warn!("client session {} send failed: {}", this.remote(), e);
                        this.on_failure().await;
                    }
                });
                return;
            }
            // The connection vanished between the check and here; queue the
            // message for the reconnect instead.
            self.pending.lock().push_back(message);
        }

        self.connect();
    }

    /// Send a request and obtain the receiver its response arrives on.
    ///
    /// The id comes from this session's matcher; the receiver resolves with
    /// an error if the session is abandoned or closed first.
    pub fn send_request(&self, payload: Bytes) -> oneshot::Receiver<Message> {
        let id = self.matcher.next_id();
        let receiver = self.matcher.register(id);
        self.write(Message::request(id, payload));
        receiver
    }

    /// Tear the session down for good: close the socket and notify the
    /// engine. Queued messages and pending requests are dropped.
    pub async fn close(&self) {
        if !self.core.mark_closed() {
            return;
        }
        self.state.set(SessionState::Closed);
        let io = self.io.write().take();
        if let Some(io) = io {
            io.close().await;
        }
        self.pending.lock().clear();
        self.matcher.clear();
        debug!("client session {} closed", self.remote());
        self.handler.on_session_disconnected(self.remote());
    }
}
