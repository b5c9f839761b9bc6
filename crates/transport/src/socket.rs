//! Socket factory: creation and best-effort tuning of TCP sockets.

use crate::config::SocketOptions;
use crate::error::SocketError;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpSocket;
use tracing::warn;

/// The slice of socket-option surface the factory tunes, lifted into a trait
/// so tuning can be exercised against a failing double.
pub trait TunableSocket {
    /// Disable or enable Nagle's algorithm.
    fn set_nodelay(&self, enabled: bool) -> io::Result<()>;
    /// Configure lingering on close.
    fn set_linger(&self, dur: Option<Duration>) -> io::Result<()>;
    /// Set the send buffer size.
    fn set_send_buffer_size(&self, size: u32) -> io::Result<()>;
    /// Set the receive buffer size.
    fn set_recv_buffer_size(&self, size: u32) -> io::Result<()>;
    /// Disable or enable keepalive probes.
    fn set_keepalive(&self, enabled: bool) -> io::Result<()>;
    /// Allow rebinding a recently used address.
    fn set_reuseaddr(&self, enabled: bool) -> io::Result<()>;
}

impl TunableSocket for TcpSocket {
    fn set_nodelay(&self, enabled: bool) -> io::Result<()> {
        TcpSocket::set_nodelay(self, enabled)
    }

    fn set_linger(&self, dur: Option<Duration>) -> io::Result<()> {
        TcpSocket::set_linger(self, dur)
    }

    fn set_send_buffer_size(&self, size: u32) -> io::Result<()> {
        TcpSocket::set_send_buffer_size(self, size)
    }

    fn set_recv_buffer_size(&self, size: u32) -> io::Result<()> {
        TcpSocket::set_recv_buffer_size(self, size)
    }

    fn set_keepalive(&self, enabled: bool) -> io::Result<()> {
        TcpSocket::set_keepalive(self, enabled)
    }

    fn set_reuseaddr(&self, enabled: bool) -> io::Result<()> {
        TcpSocket::set_reuseaddr(self, enabled)
    }
}

/// Create a non-blocking TCP socket tuned for RPC streaming, optionally
/// bound to `bind_addr`.
///
/// Tuning failures are logged and otherwise ignored; the socket is returned
/// with OS defaults for whatever could not be applied.
///
/// # Errors
///
/// [`SocketError::CreationFailed`] when no socket can be allocated and
/// [`SocketError::BindFailed`] when `bind_addr` cannot be bound; the socket
/// is closed on the bind-failure path.
pub fn create_tcp_socket(
    bind_addr: Option<SocketAddr>,
    options: &SocketOptions,
) -> Result<TcpSocket, SocketError> {
    let socket = match bind_addr {
        Some(SocketAddr::V6(_)) => TcpSocket::new_v6(),
        _ => TcpSocket::new_v4(),
    }
    .map_err(SocketError::CreationFailed)?;

    apply_options(&socket, options);

    if let Some(addr) = bind_addr {
        socket
            .bind(addr)
            .map_err(|source| SocketError::BindFailed { addr, source })?;
    }

    Ok(socket)
}

/// Apply `options` to `socket`, warning on every option the OS refuses.
///
/// Returns the number of options that could not be applied.
pub fn apply_options<S: TunableSocket>(socket: &S, options: &SocketOptions) -> usize {
    let mut failed = 0;
    let mut best_effort = |name: &str, result: io::Result<()>| {
        if let Err(e) = result {
            failed += 1;
            warn!("setsockopt {} failed, err = {}", name, e);
        }
    };

    best_effort("TCP_NODELAY", socket.set_nodelay(options.nodelay));
    best_effort("SO_LINGER", socket.set_linger(options.linger));
    if let Some(size) = options.send_buffer_size {
        best_effort("SO_SNDBUF", socket.set_send_buffer_size(size));
    }
    if let Some(size) = options.recv_buffer_size {
        best_effort("SO_RCVBUF", socket.set_recv_buffer_size(size));
    }
    best_effort("SO_KEEPALIVE", socket.set_keepalive(options.keepalive));
    if options.reuse_addr {
        best_effort("SO_REUSEADDR", socket.set_reuseaddr(true));
    }

    failed
}
