//! Transport — the send/receive façade over one live connection.
//!
//! Outbound: payloads that fit go out as a single frame; oversized ones
//! are split by the fragment codec and each fragment travels as an
//! independent wire message. Messages that expect an acknowledgement are
//! registered with the [`AckTracker`] once every wire write succeeded.
//!
//! Inbound: ack frames are intercepted and confirm pending entries,
//! fragment frames feed the assembler, everything else is deduplicated,
//! auto-acked when requested, and surfaced on the app-facing stream.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;

use courier_core::config::TransportSettings;
use courier_core::message::{Message, MessageId, MessageKind};
use courier_core::wire::{
    self, FrameHeader, WireError, FLAG_REQUIRES_ACK, FRAME_HEADER_LEN, WIRE_VERSION,
};

use crate::ack::AckTracker;
use crate::connection::{Connection, ConnectionError};
use crate::fragment::{split, Fragment, FragmentAssembler};

/// Errors reported synchronously by [`Transport::send`].
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection write failed — retryable via the offline queue.
    #[error("connection write failed: {0}")]
    Write(#[from] ConnectionError),

    /// The connection's maximum message size cannot even fit a frame
    /// header. A configuration problem, not a transient failure.
    #[error("max message size {0} cannot fit a {FRAME_HEADER_LEN}-byte frame header")]
    FrameTooSmall(usize),

    /// A frame could not be encoded for the wire.
    #[error(transparent)]
    Wire(#[from] WireError),
}

#[derive(Default)]
struct Counters {
    sent: AtomicU64,
    received: AtomicU64,
    failed: AtomicU64,
    duplicates: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

/// Point-in-time view of the transport counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransportSnapshot {
    pub sent: u64,
    pub received: u64,
    pub failed: u64,
    pub duplicates: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub pending_acks: usize,
}

/// Send/receive façade over one live peer connection.
pub struct Transport {
    conn: Arc<dyn Connection>,
    acks: AckTracker,
    assembler: FragmentAssembler,
    /// Recently surfaced message ids, for deduplication.
    seen: DashMap<MessageId, Instant>,
    counters: Counters,
    settings: TransportSettings,
}

impl Transport {
    pub fn new(conn: Arc<dyn Connection>, settings: TransportSettings) -> Arc<Self> {
        Arc::new(Self {
            conn,
            acks: AckTracker::new(),
            assembler: FragmentAssembler::new(Duration::from_millis(
                settings.reassembly_timeout_ms,
            )),
            seen: DashMap::new(),
            counters: Counters::default(),
            settings,
        })
    }

    /// Spawn the receive loop over the connection's inbound frames.
    ///
    /// Returns the app-facing stream of fully reassembled, deduplicated
    /// messages. The stream is continuous and non-restartable; call this
    /// once at wiring time.
    pub fn start_receiving(
        self: &Arc<Self>,
        mut inbound: mpsc::Receiver<Bytes>,
    ) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(self.settings.inbound_buffer);
        let transport = Arc::clone(self);

        tokio::spawn(async move {
            while let Some(raw) = inbound.recv().await {
                if let Some(message) = transport.handle_frame(raw).await {
                    if tx.send(message).await.is_err() {
                        tracing::debug!("app stream dropped, receive loop exiting");
                        return;
                    }
                }
            }
            tracing::debug!("connection inbound closed, receive loop exiting");
        });

        rx
    }

    /// Send one message over the live connection.
    ///
    /// Failure means the wire write itself failed — a merely-pending ack
    /// is not a failure here; [`Self::sweep_expired_acks`] detects that
    /// asynchronously.
    pub async fn send(&self, message: &Message) -> Result<(), TransportError> {
        let max = self.conn.max_message_size();
        if max <= FRAME_HEADER_LEN {
            return Err(TransportError::FrameTooSmall(max));
        }
        let max_chunk = max - FRAME_HEADER_LEN;

        let result = if message.payload.len() > max_chunk {
            self.send_fragmented(message, max_chunk).await
        } else {
            self.write_frame(&whole_header(message), &message.payload)
                .await
        };

        match result {
            Ok(()) => {
                // Register only after every wire write succeeded, so a
                // failed send never leaves a phantom pending ack behind.
                if message.requires_ack && message.kind != MessageKind::Ack {
                    self.acks.register(message.clone());
                }
                self.counters.sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Sequential best-effort send. Partial failure does not abort the
    /// batch; returns the number of successes.
    pub async fn send_batch(&self, messages: &[Message]) -> usize {
        let mut delivered = 0;
        for message in messages {
            match self.send(message).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::debug!(
                        message_id = hex::encode(&message.id[..8]),
                        error = %e,
                        "batch send failed for message"
                    );
                }
            }
        }
        delivered
    }

    /// Messages unconfirmed past the configured ack timeout. Each is
    /// reported exactly once; the caller re-enqueues them offline.
    pub fn sweep_expired_acks(&self) -> Vec<Message> {
        self.acks
            .sweep_expired(Duration::from_millis(self.settings.ack_timeout_ms))
    }

    pub fn pending_acks(&self) -> usize {
        self.acks.pending_count()
    }

    pub fn statistics(&self) -> TransportSnapshot {
        TransportSnapshot {
            sent: self.counters.sent.load(Ordering::Relaxed),
            received: self.counters.received.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            duplicates: self.counters.duplicates.load(Ordering::Relaxed),
            bytes_sent: self.counters.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.counters.bytes_received.load(Ordering::Relaxed),
            pending_acks: self.acks.pending_count(),
        }
    }

    // ── Outbound internals ───────────────────────────────────────────────────

    async fn send_fragmented(
        &self,
        message: &Message,
        max_chunk: usize,
    ) -> Result<(), TransportError> {
        let fragments = split(message, max_chunk);
        tracing::debug!(
            message_id = hex::encode(&message.id[..8]),
            fragments = fragments.len(),
            bytes = message.payload.len(),
            "sending fragmented message"
        );
        for fragment in &fragments {
            self.write_frame(&fragment_header(fragment), &fragment.data)
                .await?;
        }
        Ok(())
    }

    async fn write_frame(
        &self,
        header: &FrameHeader,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let frame = wire::encode_frame(header, payload);
        let len = frame.len() as u64;
        self.conn.write_message(frame).await?;
        self.counters.bytes_sent.fetch_add(len, Ordering::Relaxed);
        Ok(())
    }

    // ── Inbound internals ────────────────────────────────────────────────────

    async fn handle_frame(&self, raw: Bytes) -> Option<Message> {
        self.counters
            .bytes_received
            .fetch_add(raw.len() as u64, Ordering::Relaxed);

        let (header, payload) = match wire::decode_frame(&raw) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::debug!(error = %e, "malformed frame dropped");
                return None;
            }
        };

        let message = if header.is_fragment() {
            self.assembler.ingest(fragment_from(&header, payload))?
        } else {
            message_from(&header, payload)?
        };

        self.accept(message).await
    }

    /// Post-reassembly handling shared by whole and fragmented messages.
    async fn accept(&self, message: Message) -> Option<Message> {
        if message.kind == MessageKind::Ack {
            match message.ack_target() {
                Some(target) => {
                    if self.acks.confirm(&target).is_some() {
                        tracing::debug!(
                            message_id = hex::encode(&target[..8]),
                            "delivery confirmed"
                        );
                    }
                }
                None => tracing::debug!("ack with malformed target dropped"),
            }
            return None;
        }

        self.prune_seen();
        if self.seen.insert(message.id, Instant::now()).is_some() {
            self.counters.duplicates.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                message_id = hex::encode(&message.id[..8]),
                "duplicate message dropped"
            );
            // A retransmit means the sender never saw our ack; confirm
            // again so it stops resending.
            if message.requires_ack {
                self.ack_back(&message).await;
            }
            return None;
        }

        // Acknowledge before surfacing so the sender stops retrying even
        // if the application is slow to consume the stream.
        if message.requires_ack {
            self.ack_back(&message).await;
        }

        self.counters.received.fetch_add(1, Ordering::Relaxed);
        Some(message)
    }

    async fn ack_back(&self, message: &Message) {
        let ack = Message::ack(message.to_peer, message.from_peer, message.id);
        if let Err(e) = self.send(&ack).await {
            tracing::warn!(
                message_id = hex::encode(&message.id[..8]),
                error = %e,
                "failed to send acknowledgement"
            );
        }
    }

    fn prune_seen(&self) {
        let window = Duration::from_millis(self.settings.dedup_window_ms);
        self.seen.retain(|_, seen_at| seen_at.elapsed() <= window);
    }
}

// ── Frame conversions ─────────────────────────────────────────────────────────

fn base_header(message: &Message) -> FrameHeader {
    FrameHeader {
        msg_id: message.id,
        from_peer: message.from_peer,
        to_peer: message.to_peer,
        created_at_ms: message.created_at,
        fragment_index: 0,
        fragment_total: 1,
        length: 0,
        kind: message.kind as u8,
        flags: if message.requires_ack {
            FLAG_REQUIRES_ACK
        } else {
            0
        },
        version: WIRE_VERSION,
        reserved: 0,
    }
}

fn whole_header(message: &Message) -> FrameHeader {
    let mut header = base_header(message);
    header.length = message.payload.len() as u32;
    header
}

fn fragment_header(fragment: &Fragment) -> FrameHeader {
    FrameHeader {
        msg_id: fragment.message_id,
        from_peer: fragment.from_peer,
        to_peer: fragment.to_peer,
        created_at_ms: fragment.created_at,
        fragment_index: fragment.index,
        fragment_total: fragment.total,
        length: fragment.data.len() as u32,
        kind: fragment.kind as u8,
        flags: if fragment.requires_ack {
            FLAG_REQUIRES_ACK
        } else {
            0
        },
        version: WIRE_VERSION,
        reserved: 0,
    }
}

fn fragment_from(header: &FrameHeader, payload: Bytes) -> Fragment {
    Fragment {
        message_id: header.msg_id,
        from_peer: header.from_peer,
        to_peer: header.to_peer,
        // decode_frame validated the kind byte.
        kind: MessageKind::from_u8(header.kind).unwrap_or(MessageKind::Data),
        index: header.fragment_index,
        total: header.fragment_total,
        requires_ack: header.requires_ack(),
        created_at: header.created_at_ms,
        data: payload,
    }
}

fn message_from(header: &FrameHeader, payload: Bytes) -> Option<Message> {
    Some(Message {
        id: header.msg_id,
        from_peer: header.from_peer,
        to_peer: header.to_peer,
        kind: MessageKind::from_u8(header.kind)?,
        payload,
        requires_ack: header.requires_ack(),
        created_at: header.created_at_ms,
    })
}
