//! Reconnection coordinator — the single maintenance task behind the
//! façade.
//!
//! One `tokio::select!` loop drives three timers: the retry drain for
//! connected peers, the pending-ack sweep, and queue expiry. This task is
//! the only writer that schedules retries, so there is never a second
//! timer racing it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use courier_core::message::{now_ms, Priority};
use courier_queue::ResumePolicy;

use crate::Courier;

impl Courier {
    /// Spawn the maintenance loop. The task runs until the shutdown
    /// channel fires or closes.
    pub fn spawn_maintenance(
        self: &Arc<Self>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let courier = Arc::clone(self);
        tokio::spawn(async move {
            let delivery = courier.config().delivery.clone();
            let mut retry = interval(Duration::from_millis(delivery.retry_interval_ms));
            let mut ack_sweep = interval(Duration::from_millis(delivery.ack_sweep_interval_ms));
            let mut expiry = interval(Duration::from_millis(delivery.expiry_interval_ms));
            retry.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ack_sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
            expiry.set_missed_tick_behavior(MissedTickBehavior::Skip);

            tracing::info!(
                retry_ms = delivery.retry_interval_ms,
                ack_sweep_ms = delivery.ack_sweep_interval_ms,
                expiry_ms = delivery.expiry_interval_ms,
                "maintenance task started"
            );

            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        tracing::info!("maintenance task shutting down");
                        break;
                    }
                    _ = retry.tick() => courier.run_retry_pass().await,
                    _ = ack_sweep.tick() => courier.run_ack_sweep().await,
                    _ = expiry.tick() => {
                        courier.queue().expire_now(now_ms()).await;
                    }
                }
            }
        })
    }

    /// Drain due messages for every connected peer, honoring backoff.
    async fn run_retry_pass(&self) {
        for peer_id in self.connected_peers() {
            match self.drain_peer(&peer_id, ResumePolicy::RespectBackoff).await {
                Ok(0) => {}
                Ok(delivered) => {
                    tracing::debug!(
                        peer = hex::encode(&peer_id[..8]),
                        delivered,
                        "retry pass delivered queued messages"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        peer = hex::encode(&peer_id[..8]),
                        error = %e,
                        "retry pass hit a queue failure"
                    );
                }
            }
        }
    }

    /// Re-enqueue messages whose acknowledgement never arrived.
    async fn run_ack_sweep(&self) {
        let unconfirmed = self.transport().sweep_expired_acks();
        for message in unconfirmed {
            let peer_id = message.to_peer;
            tracing::debug!(
                peer = hex::encode(&peer_id[..8]),
                message_id = hex::encode(&message.id[..8]),
                "ack timed out, re-enqueueing message"
            );
            if let Err(e) = self
                .enqueue_offline(peer_id, message, Priority::Normal, None)
                .await
            {
                tracing::warn!(
                    peer = hex::encode(&peer_id[..8]),
                    error = %e,
                    "failed to re-enqueue unconfirmed message"
                );
            }
        }
    }
}
