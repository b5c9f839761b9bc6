//! Request/response correlation for client sessions.

use crate::protocol::message::Message;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;
use tracing::debug;

/// Pairs responses arriving on a client session with the requests that
/// produced them. One matcher serves one session; ids are unique within it.
pub struct RequestMatcher {
    pending: DashMap<u64, oneshot::Sender<Message>>,
    next_id: AtomicU64,
}

impl RequestMatcher {
    /// Create an empty matcher.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate the next request id.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register interest in the response for `id`.
    pub fn register(&self, id: u64) -> oneshot::Receiver<Message> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        rx
    }

    /// Route a response to the request waiting for it.
    ///
    /// Returns `false` when nothing is waiting for the message's id; the
    /// message is dropped in that case.
    pub fn dispatch(&self, message: Message) -> bool {
        match self.pending.remove(&message.header.id) {
            Some((_, tx)) => tx.send(message).is_ok(),
            None => {
                debug!("Received response for unknown request: {}", message.header.id);
                false
            }
        }
    }

    /// Number of requests still waiting for a response.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Drop every pending request; their receivers resolve with an error.
    pub fn clear(&self) {
        self.pending.clear();
    }
}

impl Default for RequestMatcher {
    fn default() -> Self {
        Self::new()
    }
}
