//! Error types for the transport layer.

use crate::config::ChannelKind;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for transport operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Socket factory errors.
    #[error("Socket error: {0}")]
    Socket(#[from] SocketError),

    /// Listener lifecycle errors.
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Per-connection errors.
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Wire protocol errors.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Channel closed unexpectedly.
    #[error("Channel closed")]
    ChannelClosed,
}

/// Errors from the socket factory.
///
/// Option-tuning failures are deliberately absent: they are logged and the
/// socket is still returned, since OS defaults are acceptable.
#[derive(Debug, Error)]
pub enum SocketError {
    /// Failed to allocate a socket (descriptor exhaustion or an unsupported
    /// address family).
    #[error("Failed to create socket: {0}")]
    CreationFailed(#[source] io::Error),

    /// Failed to bind the socket to a local address.
    #[error("Failed to bind {addr}: {source}")]
    BindFailed {
        /// The address we tried to bind.
        addr: SocketAddr,
        /// The underlying error.
        #[source]
        source: io::Error,
    },
}

/// Errors from the network provider.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// `start` was called while a listening socket already exists.
    #[error("Network provider already running")]
    AlreadyRunning,

    /// The requested channel is not served by this provider.
    #[error("Unsupported channel: {0:?}")]
    InvalidChannel(ChannelKind),

    /// Failed to start listening on the provider port.
    #[error("Failed to start listener on {addr}: {source}")]
    StartFailed {
        /// The address we tried to listen on.
        addr: SocketAddr,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// A single accept call failed. Transient: the listener stays up.
    #[error("Failed to accept connection: {0}")]
    AcceptFailed(#[source] io::Error),
}

/// Per-connection errors, routed into session failure handling rather than
/// propagated up a call stack.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Failed to establish an outbound connection.
    #[error("Failed to connect to {addr}: {source}")]
    ConnectFailed {
        /// The address we tried to connect to.
        addr: SocketAddr,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// The peer closed the connection.
    #[error("Connection closed by peer")]
    PeerClosed,

    /// An asynchronous receive completed with an error.
    #[error("Receive failed: {0}")]
    RecvFailed(#[source] io::Error),

    /// An asynchronous send completed with an error.
    #[error("Send failed: {0}")]
    SendFailed(#[source] io::Error),

    /// A client session spent its whole reconnect budget.
    #[error("Reconnect budget exhausted after {attempts} attempts")]
    ReconnectExhausted {
        /// Consecutive failed attempts since the last successful connect.
        attempts: u32,
    },
}

/// Wire protocol errors surfaced by a message parser.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame checksum did not match the payload.
    #[error("Checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Checksum carried in the frame header.
        expected: u32,
        /// Checksum computed over the received payload.
        actual: u32,
    },

    /// Frame length field exceeds the configured maximum.
    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge {
        /// Length announced by the frame header.
        size: usize,
        /// Maximum the parser accepts.
        max: usize,
    },

    /// Unknown message kind byte.
    #[error("Unknown message kind: {0:#x}")]
    InvalidKind(u8),
}
