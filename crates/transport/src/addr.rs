//! Local endpoint resolution.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tracing::warn;

/// A resolved transport endpoint: host identifier plus port.
///
/// Immutable once resolved; the provider records one for itself at `start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    /// Host name the address was resolved from.
    pub host: String,
    /// Resolved socket address.
    pub socket_addr: SocketAddr,
}

impl Address {
    /// Port of the endpoint.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.socket_addr.port()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port())
    }
}

/// Resolve this host's own endpoint for `port`.
///
/// Uses the machine's hostname and DNS resolution, falling back to loopback
/// with a warning when either step fails. The listener binds to all
/// interfaces regardless; this address only names the provider.
pub async fn resolve_local_address(port: u16) -> Address {
    let host = hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string());

    let socket_addr = match tokio::net::lookup_host(format!("{host}:{port}")).await {
        Ok(mut addrs) => addrs.next(),
        Err(e) => {
            warn!("Failed to resolve local host '{}': {}", host, e);
            None
        }
    }
    .unwrap_or_else(|| SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port));

    Address { host, socket_addr }
}
