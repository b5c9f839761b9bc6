//! The network provider: listener ownership and session creation.

use crate::addr::{Address, resolve_local_address};
use crate::config::{ChannelKind, TransportConfig};
use crate::error::{NetworkError, Result};
use crate::events::TransportHandler;
use crate::matcher::RequestMatcher;
use crate::protocol::parser::{LengthPrefixedCodec, WireCodec};
use crate::reactor::{Listener, Reactor, TcpReactor};
use crate::session::{ClientSession, ServerSession};
use parking_lot::{Mutex, RwLock};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

struct ListenerState {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns the listening endpoint and turns inbound and outbound connections
/// into sessions.
pub struct NetworkProvider {
    reactor: Arc<dyn Reactor>,
    codec: Arc<dyn WireCodec>,
    handler: Arc<dyn TransportHandler>,
    config: TransportConfig,
    listener: Mutex<Option<ListenerState>>,
    address: RwLock<Option<Address>>,
}

impl NetworkProvider {
    /// Create a provider over an explicit reactor and codec.
    pub fn new(
        reactor: Arc<dyn Reactor>,
        codec: Arc<dyn WireCodec>,
        handler: Arc<dyn TransportHandler>,
        config: TransportConfig,
    ) -> Self {
        Self {
            reactor,
            codec,
            handler,
            config,
            listener: Mutex::new(None),
            address: RwLock::new(None),
        }
    }

    /// Create a provider on the production TCP reactor and the default
    /// length-prefixed codec.
    pub fn tcp(handler: Arc<dyn TransportHandler>, config: TransportConfig) -> Self {
        let reactor = Arc::new(TcpReactor::new(config.socket.clone()));
        Self::new(
            reactor,
            Arc::new(LengthPrefixedCodec::new()),
            handler,
            config,
        )
    }

    /// Start the provider on `port`.
    ///
    /// Resolves the local address from the host's own name. Unless
    /// `client_only`, it also brings up a listening socket on all interfaces
    /// and begins accepting connections.
    ///
    /// # Errors
    ///
    /// [`NetworkError::AlreadyRunning`] while a listening socket exists,
    /// [`NetworkError::InvalidChannel`] for a channel this provider does not
    /// serve, and socket factory / listen errors from bringing the listener
    /// up.
    pub async fn start(&self, channel: ChannelKind, port: u16, client_only: bool) -> Result<()> {
        if self.listener.lock().is_some() {
            return Err(NetworkError::AlreadyRunning.into());
        }
        if channel != ChannelKind::Stream {
            return Err(NetworkError::InvalidChannel(channel).into());
        }

        let address = resolve_local_address(port).await;
        debug!("local address resolved to {}", address);
        *self.address.write() = Some(address);

        if client_only {
            return Ok(());
        }

        let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
        let listener = self.reactor.listen(bind_addr).await?;
        let local_addr = listener.local_addr()?;

        let cancel = CancellationToken::new();
        let task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&self.codec),
            Arc::clone(&self.handler),
            cancel.clone(),
        ));

        let mut slot = self.listener.lock();
        if slot.is_some() {
            // Lost a start/start race; back our listener out.
            cancel.cancel();
            task.abort();
            return Err(NetworkError::AlreadyRunning.into());
        }
        *slot = Some(ListenerState {
            local_addr,
            cancel,
            task,
        });
        info!("listening on {}", local_addr);

        Ok(())
    }

    /// The resolved host address, once `start` has run.
    #[must_use]
    pub fn address(&self) -> Option<Address> {
        self.address.read().clone()
    }

    /// The bound listen address, while a listener is up.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.lock().as_ref().map(|state| state.local_addr)
    }

    /// Whether a listening socket currently exists.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.listener.lock().is_some()
    }

    /// Create a client session for `remote`, wired to a fresh parser and
    /// request matcher.
    ///
    /// The session starts `Closed` and must be connected explicitly (or by
    /// its first write).
    #[must_use]
    pub fn create_client_session(&self, remote: SocketAddr) -> Arc<ClientSession> {
        let matcher = Arc::new(RequestMatcher::new());
        ClientSession::new(
            remote,
            Arc::clone(&self.reactor),
            Arc::clone(&self.codec),
            Arc::clone(&self.handler),
            matcher,
            self.config.reconnect.clone(),
        )
    }

    /// Stop accepting and drop the listening socket.
    ///
    /// Established sessions are not touched; `start` may be called again
    /// afterwards.
    pub fn shutdown(&self) {
        if let Some(state) = self.listener.lock().take() {
            state.cancel.cancel();
            state.task.abort();
            info!("listener on {} shut down", state.local_addr);
        }
    }
}

/// Accept inbound connections until cancelled.
///
/// Accept failures are logged and never tear the listener down: the next
/// readiness event accepts again.
async fn accept_loop(
    listener: Box<dyn Listener>,
    codec: Arc<dyn WireCodec>,
    handler: Arc<dyn TransportHandler>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!("listener shutting down");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((io, peer)) => {
                    debug!("accepted connection from {}", peer);
                    let parser = codec.new_parser();
                    let session =
                        ServerSession::spawn(io, codec.serializer(), parser, peer, Arc::clone(&handler));
                    handler.on_session_accepted(&session);
                }
                Err(e) => {
                    error!("{}", e);
                }
            }
        }
    }
}
