//! Session machinery shared by client and server sessions.
//!
//! A session owns exactly one socket handle and one parser. Every in-flight
//! operation (connect, receive, send) runs in a task holding a strong
//! handle to its session, so a session is never destroyed while an
//! operation is outstanding. Failures never unwind a caller: they are
//! routed into the owning session's failure handling, which reconnects
//! (client) or tears down (server).

pub mod client;
pub mod server;

pub use client::{ClientSession, SessionState};
pub use server::ServerSession;

use crate::error::ConnectionError;
use crate::protocol::message::Message;
use crate::protocol::parser::{MessageParser, MessageSerializer};
use crate::reactor::SessionIo;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::trace;

/// State both session kinds share: the send-side framing, the remote
/// endpoint and the teardown-once guard.
pub(crate) struct SessionCore {
    serializer: Arc<dyn MessageSerializer>,
    remote: SocketAddr,
    closed: AtomicBool,
}

impl SessionCore {
    pub(crate) fn new(serializer: Arc<dyn MessageSerializer>, remote: SocketAddr) -> Self {
        Self {
            serializer,
            remote,
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) const fn remote(&self) -> SocketAddr {
        self.remote
    }

    /// Serialize and transmit one message as a single send operation.
    pub(crate) async fn send(
        &self,
        io: &dyn SessionIo,
        message: &Message,
    ) -> Result<(), ConnectionError> {
        let bufs = self.serializer.serialize_for_send(message);
        io.send(bufs).await.map_err(ConnectionError::SendFailed)?;
        trace!("write completed, id = {}", message.header.id);
        Ok(())
    }

    /// Claim the session teardown. Only the first caller wins; the socket
    /// handle is closed exactly once.
    pub(crate) fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Drive one connection's receive side until it fails.
///
/// Reads are strictly sequential: the next receive is issued only after the
/// previous completion has been fully processed, including draining every
/// message the parser can already produce. `deliver` sees messages in
/// receive order, each exactly once.
pub(crate) async fn drive_receive(
    io: &dyn SessionIo,
    parser: &mut dyn MessageParser,
    mut deliver: impl FnMut(Message),
) -> ConnectionError {
    let mut next_size = 0;
    loop {
        let received = {
            let buf = parser.read_buffer(next_size);
            io.recv(buf).await
        };
        let count = match received {
            Ok(0) => return ConnectionError::PeerClosed,
            Ok(n) => n,
            Err(e) => return ConnectionError::RecvFailed(e),
        };

        let mut fed = count;
        loop {
            match parser.on_bytes_received(fed) {
                Ok((Some(message), _)) => {
                    deliver(message);
                    fed = 0;
                }
                Ok((None, hint)) => {
                    next_size = hint;
                    break;
                }
                Err(e) => {
                    // Unparseable bytes poison the connection.
                    return ConnectionError::RecvFailed(io::Error::new(
                        io::ErrorKind::InvalidData,
                        e,
                    ));
                }
            }
        }
    }
}
