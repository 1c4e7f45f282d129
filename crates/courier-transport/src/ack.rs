//! Acknowledgement tracking — which sent messages are still unconfirmed.
//!
//! The tracker only detects non-confirmation; it never retries. Retry and
//! backoff scheduling belong to the offline queue, which keeps "is it
//! acknowledged" and "when do we retry" independently testable.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use courier_core::message::{Message, MessageId};

/// Bookkeeping for one sent message awaiting confirmation.
#[derive(Debug, Clone)]
pub struct PendingAck {
    /// The original message, kept so an expired entry can be handed to
    /// the offline queue as-is.
    pub message: Message,
    pub sent_at: Instant,
}

/// Tracks messages awaiting acknowledgement, keyed by message id.
#[derive(Clone, Default)]
pub struct AckTracker {
    pending: Arc<DashMap<MessageId, PendingAck>>,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sent message that expects an acknowledgement.
    pub fn register(&self, message: Message) {
        self.pending.insert(
            message.id,
            PendingAck {
                message,
                sent_at: Instant::now(),
            },
        );
    }

    /// Confirm delivery. Returns the original message if it was still
    /// pending; idempotent otherwise.
    pub fn confirm(&self, id: &MessageId) -> Option<Message> {
        self.pending.remove(id).map(|(_, pending)| pending.message)
    }

    /// Remove and return every message unconfirmed for longer than
    /// `timeout`.
    ///
    /// Removal is the claim: concurrent sweeps report each timed-out
    /// message at most once, so a single timeout event never produces a
    /// duplicate re-enqueue.
    pub fn sweep_expired(&self, timeout: Duration) -> Vec<Message> {
        let expired: Vec<MessageId> = self
            .pending
            .iter()
            .filter(|entry| entry.sent_at.elapsed() > timeout)
            .map(|entry| *entry.key())
            .collect();

        expired
            .into_iter()
            .filter_map(|id| self.pending.remove(&id).map(|(_, pending)| pending.message))
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
