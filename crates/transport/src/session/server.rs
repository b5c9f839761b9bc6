//! Passive sessions created on accept.

use super::{SessionCore, drive_receive};
use crate::error::ConnectionError;
use crate::events::TransportHandler;
use crate::protocol::message::Message;
use crate::protocol::parser::{MessageParser, MessageSerializer};
use crate::reactor::SessionIo;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// One inbound connection.
///
/// Live from the moment it exists: the first read is armed during `spawn`,
/// before the engine ever sees the session. There is no reconnect: on any
/// failure the session closes and notifies, and a returning peer surfaces
/// as a fresh accept.
pub struct ServerSession {
    // Handed to every spawned operation so in-flight work owns the session.
    weak: Weak<Self>,
    core: SessionCore,
    io: Arc<dyn SessionIo>,
    handler: Arc<dyn TransportHandler>,
}

impl ServerSession {
    /// Create the session and arm its first read.
    pub(crate) fn spawn(
        io: Arc<dyn SessionIo>,
        serializer: Arc<dyn MessageSerializer>,
        parser: Box<dyn MessageParser>,
        remote: SocketAddr,
        handler: Arc<dyn TransportHandler>,
    ) -> Arc<Self> {
        let session = Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            core: SessionCore::new(serializer, remote),
            io,
            handler,
        });

        // The read task holds a strong handle: the session outlives its
        // in-flight receive.
        let this = Arc::clone(&session);
        tokio::spawn(async move {
            this.read_loop(parser).await;
        });

        session
    }

    /// Remote endpoint of the accepted connection.
    #[must_use]
    pub fn remote(&self) -> SocketAddr {
        self.core.remote()
    }

    /// Queue an asynchronous send of `message`.
    ///
    /// Each call is an independent operation holding its own strong handle;
    /// a failed send tears the session down.
    pub fn write(&self, message: Message) {
        let Some(this) = self.weak.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = this.core.send(this.io.as_ref(), &message).await {
                this.fail(&e).await;
            }
        });
    }

    /// Close the session and notify the engine.
    pub async fn close(&self) {
        if self.core.mark_closed() {
            self.io.close().await;
            debug!("server session {} closed", self.remote());
            self.handler.on_session_disconnected(self.remote());
        }
    }

    async fn read_loop(self: Arc<Self>, mut parser: Box<dyn MessageParser>) {
        let handler = Arc::clone(&self.handler);
        let remote = self.remote();

        let error = drive_receive(self.io.as_ref(), parser.as_mut(), |message| {
            handler.on_message_received(remote, message);
        })
        .await;

        self.fail(&error).await;
    }

    async fn fail(&self, error: &ConnectionError) {
        if self.core.mark_closed() {
            warn!("server session {} failed: {}", self.remote(), error);
            self.io.close().await;
            self.handler.on_session_disconnected(self.remote());
        }
    }
}
