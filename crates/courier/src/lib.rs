//! courier — the delivery façade tying transport and offline queue
//! together.
//!
//! A [`Courier`] owns one live [`Transport`] and one [`OfflineQueue`].
//! Sends to a connected peer go straight over the wire; sends to a
//! disconnected peer (and wire failures) land in the queue. The
//! reconnection coordinator drains the queue when a peer comes back and
//! runs the retry, ack-sweep, and expiry timers.

pub mod coordinator;

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;

use courier_core::config::CourierConfig;
use courier_core::message::{now_ms, Message, PeerId, Priority};
use courier_queue::{OfflineQueue, QueueError, QueueEvent, QueueStats, ResumePolicy};
use courier_transport::{Transport, TransportError, TransportSnapshot};

/// Errors surfaced by the delivery façade.
///
/// A `Transient` or `Timeout` error means the wire send failed but the
/// message was safely queued for retry — the caller may treat it as
/// deferred rather than lost. `Queue` means the message is NOT safely
/// stored.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The wire send failed; the message was queued for retry.
    #[error("send failed, message queued for retry: {0}")]
    Transient(#[from] TransportError),

    /// The wire send did not complete in time; the message was queued
    /// for retry.
    #[error("send timed out after {0:?}, message queued for retry")]
    Timeout(Duration),

    /// The offline queue could not persist the message.
    #[error("queue failure: {0}")]
    Queue(#[from] QueueError),
}

/// Delivery façade over one live connection plus the durable queue.
pub struct Courier {
    transport: Arc<Transport>,
    queue: Arc<OfflineQueue>,
    config: CourierConfig,
    connected: DashMap<PeerId, ()>,
    incoming: std::sync::Mutex<Option<mpsc::Receiver<Message>>>,
}

impl Courier {
    /// Wire up the façade. `incoming` is the transport's app-facing
    /// message stream, handed back out once via [`Self::receive_stream`].
    pub fn new(
        transport: Arc<Transport>,
        queue: Arc<OfflineQueue>,
        config: CourierConfig,
        incoming: mpsc::Receiver<Message>,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            queue,
            config,
            connected: DashMap::new(),
            incoming: std::sync::Mutex::new(Some(incoming)),
        })
    }

    /// Send a message, falling back to the offline queue.
    ///
    /// A disconnected recipient is not an error: the message is queued
    /// and `Ok(())` returned. A wire failure or timeout queues the
    /// message and reports it as deferred.
    pub async fn send(&self, message: Message) -> Result<(), DeliveryError> {
        let peer = message.to_peer;
        if !self.is_connected(&peer) {
            tracing::debug!(
                peer = hex::encode(&peer[..8]),
                message_id = hex::encode(&message.id[..8]),
                "peer offline, queueing message"
            );
            self.enqueue_default(peer, message).await?;
            return Ok(());
        }

        match self.send_over_wire(&message).await {
            Ok(()) => Ok(()),
            Err(deferred) => {
                tracing::debug!(
                    peer = hex::encode(&peer[..8]),
                    message_id = hex::encode(&message.id[..8]),
                    error = %deferred,
                    "wire send failed, queueing message"
                );
                self.enqueue_default(peer, message).await?;
                Err(deferred)
            }
        }
    }

    /// Send several messages; failures are queued individually. Returns
    /// how many went straight over the wire.
    pub async fn send_batch(&self, messages: Vec<Message>) -> Result<usize, QueueError> {
        let mut delivered = 0;
        for message in messages {
            match self.send(message).await {
                Ok(()) => delivered += 1,
                Err(DeliveryError::Queue(e)) => return Err(e),
                Err(_) => {}
            }
        }
        Ok(delivered)
    }

    /// Take the stream of inbound messages. Yields `Some` exactly once.
    pub fn receive_stream(&self) -> Option<mpsc::Receiver<Message>> {
        self.incoming
            .lock()
            .ok()
            .and_then(|mut guard| guard.take())
    }

    /// Queue a message without attempting a wire send first.
    pub async fn enqueue_offline(
        &self,
        peer_id: PeerId,
        message: Message,
        priority: Priority,
        ttl_ms: Option<u64>,
    ) -> Result<(), QueueError> {
        let ttl = ttl_ms.unwrap_or(self.config.queue.default_ttl_ms);
        self.queue.enqueue(peer_id, message, priority, ttl).await
    }

    /// Mark a peer reachable and drain its queued messages. Returns the
    /// number delivered during the drain.
    pub async fn on_peer_connected(&self, peer_id: PeerId) -> Result<usize, QueueError> {
        self.connected.insert(peer_id, ());
        let policy = if self.config.delivery.aggressive_resume {
            ResumePolicy::Aggressive
        } else {
            ResumePolicy::RespectBackoff
        };
        let delivered = self.drain_peer(&peer_id, policy).await?;
        tracing::info!(
            peer = hex::encode(&peer_id[..8]),
            delivered,
            "peer connected, queue drained"
        );
        Ok(delivered)
    }

    /// Mark a peer unreachable; subsequent sends queue directly.
    pub fn on_peer_disconnected(&self, peer_id: &PeerId) {
        self.connected.remove(peer_id);
        tracing::info!(peer = hex::encode(&peer_id[..8]), "peer disconnected");
    }

    pub fn is_connected(&self, peer_id: &PeerId) -> bool {
        self.connected.contains_key(peer_id)
    }

    /// Transport counters.
    pub fn statistics(&self) -> TransportSnapshot {
        self.transport.statistics()
    }

    /// Offline-queue counters for one peer.
    pub async fn queue_stats(&self, peer_id: &PeerId) -> QueueStats {
        self.queue.stats(peer_id).await
    }

    /// Terminal-outcome events from the offline queue.
    pub fn subscribe_queue_events(&self) -> tokio::sync::broadcast::Receiver<QueueEvent> {
        self.queue.subscribe()
    }

    /// Deliver a peer's due messages in order, oldest-within-priority
    /// first. Stops at the first wire failure: the link is unhealthy and
    /// the backoff schedule owns the next attempt.
    pub(crate) async fn drain_peer(
        &self,
        peer_id: &PeerId,
        policy: ResumePolicy,
    ) -> Result<usize, QueueError> {
        let now = now_ms();
        let due = self.queue.due_messages(peer_id, now, policy).await;
        let mut delivered = 0;

        for entry in due {
            match self.send_over_wire(&entry.message).await {
                Ok(()) => {
                    self.queue.mark_delivered(peer_id, &entry.message.id).await?;
                    delivered += 1;
                }
                Err(e) => {
                    tracing::debug!(
                        peer = hex::encode(&peer_id[..8]),
                        message_id = hex::encode(&entry.message.id[..8]),
                        error = %e,
                        "drain attempt failed, rescheduling"
                    );
                    self.queue
                        .mark_failed(peer_id, &entry.message.id, now_ms())
                        .await?;
                    break;
                }
            }
        }
        Ok(delivered)
    }

    /// Wire send bounded by the configured I/O timeout. An elapsed
    /// timeout takes the deferral path instead of dropping the message.
    async fn send_over_wire(&self, message: &Message) -> Result<(), DeliveryError> {
        let budget = Duration::from_millis(self.config.transport.io_timeout_ms);
        match tokio::time::timeout(budget, self.transport.send(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(DeliveryError::Transient(e)),
            Err(_) => Err(DeliveryError::Timeout(budget)),
        }
    }

    async fn enqueue_default(&self, peer_id: PeerId, message: Message) -> Result<(), QueueError> {
        self.queue
            .enqueue(
                peer_id,
                message,
                Priority::Normal,
                self.config.queue.default_ttl_ms,
            )
            .await
    }

    pub(crate) fn connected_peers(&self) -> Vec<PeerId> {
        self.connected.iter().map(|entry| *entry.key()).collect()
    }

    pub(crate) fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    pub(crate) fn queue(&self) -> &Arc<OfflineQueue> {
        &self.queue
    }

    pub(crate) fn config(&self) -> &CourierConfig {
        &self.config
    }
}
