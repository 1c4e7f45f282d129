//! courier-queue — durable per-peer store of undelivered messages.
//!
//! The system of record for "what still needs to be sent": every mutation
//! is written through to disk before the call returns, entries are ordered
//! by priority then age, failed attempts back off exponentially, and
//! terminal outcomes (expiry, eviction, retry exhaustion) are reported as
//! events rather than errors.

pub mod backoff;
pub mod events;
pub mod queue;
pub mod store;

pub use events::QueueEvent;
pub use queue::{OfflineQueue, QueueError, QueueStats, QueuedMessage, ResumePolicy};
pub use store::{QueueStore, StoreError};
