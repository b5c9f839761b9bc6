//! Connection-oriented TCP transport for the Keel RPC stack.
//!
//! This crate owns raw sockets and the lifecycle of RPC sessions: it tunes
//! and connects sockets, accepts inbound connections into live server
//! sessions, drives client sessions through a bounded reconnect state
//! machine, and pumps bytes between sockets and a pluggable wire codec.
//!
//! The upper RPC layer talks to it through three seams:
//!
//! - [`NetworkProvider`] owns the listening endpoint and creates sessions.
//! - [`TransportHandler`] carries notifications upward: received messages,
//!   accepted sessions, disconnected sessions.
//! - [`WireCodec`] translates between byte streams and [`Message`]s.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use keel_transport::{
//!     ChannelKind, Message, NetworkProvider, TransportConfig, TransportHandler,
//! };
//!
//! struct Engine;
//!
//! impl TransportHandler for Engine {
//!     fn on_message_received(&self, remote: std::net::SocketAddr, message: Message) {
//!         println!("{} sent {} bytes", remote, message.payload.len());
//!     }
//! }
//!
//! async fn example() -> keel_transport::Result<()> {
//!     let provider = NetworkProvider::tcp(Arc::new(Engine), TransportConfig::default());
//!     provider.start(ChannelKind::Stream, 7010, false).await?;
//!
//!     let session = provider.create_client_session("10.0.0.7:7010".parse().unwrap());
//!     session.connect();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod addr;
pub mod config;
pub mod error;
pub mod events;
pub mod matcher;
pub mod protocol;
pub mod provider;
pub mod reactor;
pub mod session;
pub mod socket;

// Re-export the working surface.
pub use addr::Address;
pub use config::{ChannelKind, ReconnectPolicy, SocketOptions, TransportConfig};
pub use error::{ConnectionError, Error, NetworkError, ProtocolError, Result, SocketError};
pub use events::TransportHandler;
pub use matcher::RequestMatcher;
pub use protocol::message::{Message, MessageHeader, MessageKind};
pub use protocol::parser::{LengthPrefixedCodec, MessageParser, MessageSerializer, WireCodec};
pub use provider::NetworkProvider;
pub use reactor::{Listener, Reactor, SessionIo, TcpReactor};
pub use session::{ClientSession, ServerSession, SessionState};

// Buffer types that appear in the public API.
pub use bytes::{Bytes, BytesMut};
