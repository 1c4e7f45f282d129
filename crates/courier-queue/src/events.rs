//! Queue events — terminal outcomes the application may need to surface.
//!
//! Dropping a message after retry exhaustion or expiry is an expected
//! outcome, not an exception, so it travels as an event on a broadcast
//! channel instead of an error return.

use courier_core::message::{MessageId, PeerId};

/// Notification emitted by the offline queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    /// A peer's queue was at capacity; the oldest entry made room for a
    /// fresh one.
    Evicted {
        peer_id: PeerId,
        message_id: MessageId,
    },

    /// The entry aged past its TTL before delivery succeeded.
    Expired {
        peer_id: PeerId,
        message_id: MessageId,
    },

    /// The entry failed its final retry attempt and was dropped.
    MaxRetriesExceeded {
        peer_id: PeerId,
        message_id: MessageId,
        retry_count: u32,
    },
}
