//! Upward notifications from the transport to the owning RPC engine.

use crate::protocol::message::Message;
use crate::session::ServerSession;
use std::net::SocketAddr;
use std::sync::Arc;

/// Callbacks the transport pushes to the layer above.
///
/// Everything here runs on reactor tasks and must not block: hand work to a
/// channel or spawn a task if it cannot complete immediately. Transport
/// health is only observable through these notifications; per-operation I/O
/// errors never surface as call-stack errors.
pub trait TransportHandler: Send + Sync + 'static {
    /// A complete inbound message. Messages of one session arrive in
    /// receive order, never split or duplicated.
    fn on_message_received(&self, remote: SocketAddr, message: Message);

    /// An inbound connection came up as a live server session. Its first
    /// read is already armed.
    fn on_session_accepted(&self, session: &Arc<ServerSession>) {
        let _ = session;
    }

    /// A session went away for good: a server session failed, or a client
    /// session was closed or spent its reconnect budget.
    fn on_session_disconnected(&self, remote: SocketAddr) {
        let _ = remote;
    }
}
