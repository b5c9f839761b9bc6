//! The asynchronous I/O seam between sessions and the runtime.
//!
//! Sessions never touch sockets directly: they issue connects, accepts,
//! receives and sends through these traits and resume when the operation
//! completes. Each issued operation completes exactly once. [`TcpReactor`]
//! is the production implementation on tokio's readiness I/O; tests
//! substitute instrumented stubs that delay or fail completions.

use crate::config::SocketOptions;
use crate::error::{ConnectionError, Error, NetworkError, Result};
use crate::socket::create_tcp_socket;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// One end of an established connection.
#[async_trait]
pub trait SessionIo: Send + Sync + 'static {
    /// Receive bytes, appending them to `buf`.
    ///
    /// Resolves with the number of bytes appended; zero means the peer
    /// closed the connection.
    async fn recv(&self, buf: &mut BytesMut) -> io::Result<usize>;

    /// Transmit every buffer in `bufs`, in order, as one operation.
    ///
    /// Concurrent calls are serialized internally; buffers of distinct calls
    /// never interleave on the wire.
    async fn send(&self, bufs: Vec<Bytes>) -> io::Result<()>;

    /// Close the connection. In-flight operations complete with an error.
    async fn close(&self);

    /// Remote endpoint of the connection, when known.
    fn peer_addr(&self) -> Option<SocketAddr>;
}

/// A bound, listening socket.
#[async_trait]
pub trait Listener: Send + Sync + 'static {
    /// Wait for one inbound connection.
    ///
    /// # Errors
    ///
    /// Accept errors are transient: the listener remains usable afterwards.
    async fn accept(&self) -> Result<(Arc<dyn SessionIo>, SocketAddr)>;

    /// The locally bound address.
    ///
    /// # Errors
    ///
    /// Fails when the socket is gone.
    fn local_addr(&self) -> Result<SocketAddr>;
}

/// Factory for the asynchronous primitives sessions run on.
#[async_trait]
pub trait Reactor: Send + Sync + 'static {
    /// Establish an outbound connection to `remote`.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::ConnectFailed`] when the peer cannot be reached,
    /// or a socket factory error.
    async fn connect(&self, remote: SocketAddr) -> Result<Arc<dyn SessionIo>>;

    /// Open a listening socket on `local` with the platform's maximum
    /// backlog.
    ///
    /// # Errors
    ///
    /// Socket factory errors, or [`NetworkError::StartFailed`] when the
    /// bound socket cannot start listening.
    async fn listen(&self, local: SocketAddr) -> Result<Box<dyn Listener>>;
}

/// Production reactor: tokio readiness I/O over tuned TCP sockets.
pub struct TcpReactor {
    options: SocketOptions,
}

impl TcpReactor {
    /// Create a reactor applying `options` to every socket it opens.
    #[must_use]
    pub const fn new(options: SocketOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Reactor for TcpReactor {
    async fn connect(&self, remote: SocketAddr) -> Result<Arc<dyn SessionIo>> {
        // Bind the unspecified endpoint of the matching family; the OS picks
        // the local port.
        let local: SocketAddr = if remote.is_ipv6() {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        };
        let socket = create_tcp_socket(Some(local), &self.options)?;

        let stream = socket
            .connect(remote)
            .await
            .map_err(|source| ConnectionError::ConnectFailed {
                addr: remote,
                source,
            })?;

        Ok(Arc::new(TcpIo::new(stream)))
    }

    async fn listen(&self, local: SocketAddr) -> Result<Box<dyn Listener>> {
        let mut options = self.options.clone();
        options.reuse_addr = true;
        let socket = create_tcp_socket(Some(local), &options)?;

        #[allow(clippy::cast_sign_loss)]
        let listener = socket
            .listen(libc::SOMAXCONN as u32)
            .map_err(|source| NetworkError::StartFailed {
                addr: local,
                source,
            })?;

        Ok(Box::new(TcpListenerIo { listener }))
    }
}

struct TcpListenerIo {
    listener: TcpListener,
}

#[async_trait]
impl Listener for TcpListenerIo {
    async fn accept(&self) -> Result<(Arc<dyn SessionIo>, SocketAddr)> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(NetworkError::AcceptFailed)?;

        if let Err(e) = stream.set_nodelay(true) {
            debug!("setsockopt TCP_NODELAY failed on accepted socket, err = {}", e);
        }

        Ok((Arc::new(TcpIo::new(stream)), peer))
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(Error::Io)
    }
}

/// An established TCP connection driven through readiness I/O.
///
/// The stream lives in a slot so `close` can drop the descriptor while
/// operations observe the cancellation and bail out.
struct TcpIo {
    stream: RwLock<Option<TcpStream>>,
    write_gate: Mutex<()>,
    shutdown: CancellationToken,
    peer: Option<SocketAddr>,
}

impl TcpIo {
    fn new(stream: TcpStream) -> Self {
        let peer = stream.peer_addr().ok();
        Self {
            stream: RwLock::new(Some(stream)),
            write_gate: Mutex::new(()),
            shutdown: CancellationToken::new(),
            peer,
        }
    }
}

#[async_trait]
impl SessionIo for TcpIo {
    async fn recv(&self, buf: &mut BytesMut) -> io::Result<usize> {
        let guard = self.stream.read().await;
        let Some(stream) = guard.as_ref() else {
            return Err(io::ErrorKind::NotConnected.into());
        };

        tokio::select! {
            () = self.shutdown.cancelled() => Err(io::ErrorKind::ConnectionAborted.into()),
            result = async {
                loop {
                    stream.readable().await?;
                    match stream.try_read_buf(buf) {
                        Ok(n) => return Ok(n),
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                        Err(e) => return Err(e),
                    }
                }
            } => result,
        }
    }

    async fn send(&self, bufs: Vec<Bytes>) -> io::Result<()> {
        // The gate keeps buffers of concurrent sends from interleaving.
        let _gate = self.write_gate.lock().await;
        let guard = self.stream.read().await;
        let Some(stream) = guard.as_ref() else {
            return Err(io::ErrorKind::NotConnected.into());
        };

        tokio::select! {
            () = self.shutdown.cancelled() => Err(io::ErrorKind::ConnectionAborted.into()),
            result = async {
                for buf in &bufs {
                    let mut remaining = &buf[..];
                    while !remaining.is_empty() {
                        stream.writable().await?;
                        match stream.try_write(remaining) {
                            Ok(n) => remaining = &remaining[n..],
                            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                            Err(e) => return Err(e),
                        }
                    }
                }
                Ok(())
            } => result,
        }
    }

    async fn close(&self) {
        self.shutdown.cancel();
        // In-flight operations hold the read half of the slot; waiting for
        // the write half lets them observe the cancellation first, then the
        // descriptor drops.
        let mut guard = self.stream.write().await;
        guard.take();
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }
}
