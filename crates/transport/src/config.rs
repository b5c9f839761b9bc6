//! Transport configuration.

use std::time::Duration;

/// Channel kinds a provider can be asked to serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Connection-oriented byte stream (TCP).
    Stream,
    /// Connectionless datagrams (UDP). Not served by this provider.
    Datagram,
}

/// Socket tuning applied by the socket factory.
///
/// Every option is best-effort: a refused option is logged and the socket is
/// still returned with OS defaults.
#[derive(Debug, Clone)]
pub struct SocketOptions {
    /// Disable Nagle's algorithm.
    pub nodelay: bool,
    /// Lingering on close. `None` closes without lingering.
    pub linger: Option<Duration>,
    /// Send buffer size in bytes. Zero hands streamed writes straight to the
    /// network layer.
    pub send_buffer_size: Option<u32>,
    /// Receive buffer size in bytes.
    pub recv_buffer_size: Option<u32>,
    /// Enable TCP keepalive probes.
    pub keepalive: bool,
    /// Allow rebinding a recently used local address. Listeners enable this.
    pub reuse_addr: bool,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            nodelay: true,
            linger: None,
            send_buffer_size: Some(0),
            recv_buffer_size: Some(8 * 1024 * 1024),
            keepalive: false,
            reuse_addr: false,
        }
    }
}

/// Reconnect policy for client sessions.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Consecutive failures tolerated before the session is abandoned.
    pub max_attempts: u32,
    /// Delay inserted before each reconnect attempt.
    pub retry_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::ZERO,
        }
    }
}

/// Top-level transport configuration.
#[derive(Debug, Clone, Default)]
pub struct TransportConfig {
    /// Socket tuning for every socket the transport creates.
    pub socket: SocketOptions,
    /// Client session reconnect policy.
    pub reconnect: ReconnectPolicy,
}
