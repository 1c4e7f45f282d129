//! Offline queue — per-peer, per-priority durable store of undelivered
//! messages.
//!
//! Every successful mutation is written through to the [`QueueStore`]
//! before the call returns, so a crash immediately after never loses
//! retry state. On open, all persisted records are loaded back into the
//! in-memory index before the queue is usable.
//!
//! One `tokio::sync::Mutex` per peer serialises index and store mutation
//! for that peer; operations on distinct peers never contend.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};

use courier_core::config::QueueSettings;
use courier_core::message::{Message, MessageId, PeerId, Priority};

use crate::backoff;
use crate::events::QueueEvent;
use crate::store::{QueueStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The durable write failed — the message is NOT safely queued.
    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),
}

/// Whether a reconnection drain honors scheduled retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumePolicy {
    /// Only entries whose `next_retry_at` has passed are due.
    RespectBackoff,
    /// Everything non-expired is due immediately. Used for the first
    /// drain after a peer reconnects.
    Aggressive,
}

/// A message durably queued for a specific destination peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub peer_id: PeerId,
    pub message: Message,
    /// Unix ms when the entry was enqueued.
    pub enqueued_at: u64,
    /// Unix ms after which the entry is expired.
    pub expires_at: u64,
    pub retry_count: u32,
    pub priority: Priority,
    /// Unix ms before which the entry is not due. 0 = immediately due.
    pub next_retry_at: u64,
}

/// Per-peer queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub count: usize,
    pub oldest_age_ms: u64,
    pub urgent: usize,
    pub high: usize,
    pub normal: usize,
    pub low: usize,
}

type Lane = Arc<Mutex<Vec<QueuedMessage>>>;

/// Durable offline queue, the system of record for undelivered messages.
pub struct OfflineQueue {
    store: QueueStore,
    index: DashMap<PeerId, Lane>,
    events: broadcast::Sender<QueueEvent>,
    settings: QueueSettings,
}

impl OfflineQueue {
    /// Open the queue and load every persisted record into the index.
    pub fn open(settings: QueueSettings) -> Result<Self, QueueError> {
        let store = QueueStore::open(&settings.storage_path)?;
        let index = DashMap::new();

        let mut restored = 0usize;
        for peer_id in store.list_peers()? {
            let records = store.list_all(&peer_id)?;
            restored += records.len();
            index.insert(peer_id, Arc::new(Mutex::new(records)));
        }
        if restored > 0 {
            tracing::info!(messages = restored, "offline queue restored from disk");
        }

        let (events, _) = broadcast::channel(256);
        Ok(Self {
            store,
            index,
            events,
            settings,
        })
    }

    /// Subscribe to terminal-outcome events.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Queue a message for later delivery. Durable upon return.
    ///
    /// At capacity, the single oldest entry (lowest `enqueued_at`,
    /// priority-blind) is evicted first — fresh messages win over stale
    /// ones.
    pub async fn enqueue(
        &self,
        peer_id: PeerId,
        message: Message,
        priority: Priority,
        ttl_ms: u64,
    ) -> Result<(), QueueError> {
        let lane = self.lane(&peer_id);
        let mut entries = lane.lock().await;

        let victim_pos = if entries.len() >= self.settings.capacity_per_peer {
            oldest_position(&entries)
        } else {
            None
        };

        let now = courier_core::message::now_ms();
        let record = QueuedMessage {
            peer_id,
            message,
            enqueued_at: now,
            expires_at: now.saturating_add(ttl_ms),
            retry_count: 0,
            priority,
            next_retry_at: 0,
        };

        // The newcomer's durable write decides success. The victim is
        // evicted only afterwards, so a failed write never costs an
        // already-stored message.
        self.store.put(&peer_id, &record.message.id, &record)?;

        if let Some(pos) = victim_pos {
            let victim = entries.remove(pos);
            if let Err(e) = self.store.delete(&peer_id, &victim.message.id) {
                tracing::warn!(error = %e, "failed to delete evicted record");
            }
            tracing::debug!(
                peer = hex::encode(&peer_id[..8]),
                message_id = hex::encode(&victim.message.id[..8]),
                "queue at capacity, evicted oldest entry"
            );
            let _ = self.events.send(QueueEvent::Evicted {
                peer_id,
                message_id: victim.message.id,
            });
        }

        entries.push(record);
        Ok(())
    }

    /// Non-expired entries due for delivery, most severe priority first,
    /// oldest first within the same priority. The ordering is stable and
    /// total (final tiebreak on message id).
    pub async fn due_messages(
        &self,
        peer_id: &PeerId,
        now_ms: u64,
        policy: ResumePolicy,
    ) -> Vec<QueuedMessage> {
        let Some(lane) = self.index.get(peer_id).map(|l| l.value().clone()) else {
            return Vec::new();
        };
        let entries = lane.lock().await;

        let mut due: Vec<QueuedMessage> = entries
            .iter()
            .filter(|e| e.expires_at > now_ms)
            .filter(|e| match policy {
                ResumePolicy::Aggressive => true,
                ResumePolicy::RespectBackoff => e.next_retry_at == 0 || e.next_retry_at <= now_ms,
            })
            .cloned()
            .collect();

        due.sort_by(|a, b| {
            (a.priority, a.enqueued_at, a.message.id).cmp(&(b.priority, b.enqueued_at, b.message.id))
        });
        due
    }

    /// Remove a delivered entry. Idempotent.
    pub async fn mark_delivered(
        &self,
        peer_id: &PeerId,
        message_id: &MessageId,
    ) -> Result<(), QueueError> {
        let lane = self.lane(peer_id);
        let mut entries = lane.lock().await;
        entries.retain(|e| e.message.id != *message_id);
        self.store.delete(peer_id, message_id)?;
        Ok(())
    }

    /// Record a failed delivery attempt.
    ///
    /// Returns the delay until the next attempt, or `None` when the entry
    /// is gone — either absent already or dropped after its final retry.
    pub async fn mark_failed(
        &self,
        peer_id: &PeerId,
        message_id: &MessageId,
        now_ms: u64,
    ) -> Result<Option<u64>, QueueError> {
        let lane = self.lane(peer_id);
        let mut entries = lane.lock().await;

        let Some(pos) = entries.iter().position(|e| e.message.id == *message_id) else {
            return Ok(None);
        };

        let retry_count = entries[pos].retry_count + 1;
        if retry_count >= self.settings.max_retries {
            let dropped = entries.remove(pos);
            self.store.delete(peer_id, message_id)?;
            tracing::warn!(
                peer = hex::encode(&peer_id[..8]),
                message_id = hex::encode(&message_id[..8]),
                retries = retry_count,
                "message dropped after max retries"
            );
            let _ = self.events.send(QueueEvent::MaxRetriesExceeded {
                peer_id: *peer_id,
                message_id: dropped.message.id,
                retry_count,
            });
            return Ok(None);
        }

        let delay_ms = backoff::delay_ms(retry_count);
        let mut updated = entries[pos].clone();
        updated.retry_count = retry_count;
        updated.next_retry_at = now_ms.saturating_add(delay_ms);

        // Write-through before the in-memory state changes.
        self.store.put(peer_id, message_id, &updated)?;
        entries[pos] = updated;

        tracing::debug!(
            peer = hex::encode(&peer_id[..8]),
            message_id = hex::encode(&message_id[..8]),
            retry = retry_count,
            delay_ms,
            "retry rescheduled"
        );
        Ok(Some(delay_ms))
    }

    /// Remove every entry past its TTL, across all peers. Returns the
    /// number removed.
    pub async fn expire_now(&self, now_ms: u64) -> usize {
        let lanes: Vec<(PeerId, Lane)> = self
            .index
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let mut removed = 0;
        for (peer_id, lane) in lanes {
            let mut entries = lane.lock().await;
            let mut kept = Vec::with_capacity(entries.len());
            for entry in entries.drain(..) {
                if entry.expires_at > now_ms {
                    kept.push(entry);
                    continue;
                }
                if let Err(e) = self.store.delete(&peer_id, &entry.message.id) {
                    tracing::warn!(error = %e, "failed to delete expired record");
                }
                let _ = self.events.send(QueueEvent::Expired {
                    peer_id,
                    message_id: entry.message.id,
                });
                removed += 1;
            }
            *entries = kept;
        }

        if removed > 0 {
            tracing::info!(removed, "expired queue entries removed");
        }
        removed
    }

    /// Number of queued entries for one peer.
    pub async fn len(&self, peer_id: &PeerId) -> usize {
        match self.index.get(peer_id).map(|l| l.value().clone()) {
            Some(lane) => lane.lock().await.len(),
            None => 0,
        }
    }

    /// Per-peer counters.
    pub async fn stats(&self, peer_id: &PeerId) -> QueueStats {
        let Some(lane) = self.index.get(peer_id).map(|l| l.value().clone()) else {
            return QueueStats::default();
        };
        let entries = lane.lock().await;
        let now = courier_core::message::now_ms();

        let mut stats = QueueStats {
            count: entries.len(),
            ..QueueStats::default()
        };
        for entry in entries.iter() {
            stats.oldest_age_ms = stats
                .oldest_age_ms
                .max(now.saturating_sub(entry.enqueued_at));
            match entry.priority {
                Priority::Urgent => stats.urgent += 1,
                Priority::High => stats.high += 1,
                Priority::Normal => stats.normal += 1,
                Priority::Low => stats.low += 1,
            }
        }
        stats
    }

    fn lane(&self, peer_id: &PeerId) -> Lane {
        self.index.entry(*peer_id).or_default().value().clone()
    }
}

/// Position of the entry with the lowest `enqueued_at`, id-tiebroken.
fn oldest_position(entries: &[QueuedMessage]) -> Option<usize> {
    entries
        .iter()
        .enumerate()
        .min_by_key(|(_, e)| (e.enqueued_at, e.message.id))
        .map(|(pos, _)| pos)
}
