//! Fragment codec — splitting oversized messages and reassembling them.
//!
//! `split` is pure; the [`FragmentAssembler`] holds the bounded reassembly
//! cache. Fragments arrive in any order and are concatenated by index once
//! all of them are present. Ids that already completed (or were abandoned
//! after the reassembly timeout) swallow late fragments silently — that is
//! expected behavior under packet loss, not an error.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::{BufMut, Bytes, BytesMut};
use dashmap::DashMap;

use courier_core::message::{Message, MessageId, MessageKind, PeerId};

/// One bounded-size slice of an oversized message.
///
/// Carries the full addressing of the original message so reassembly
/// yields a fully-addressed [`Message`] without outside help.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub message_id: MessageId,
    pub from_peer: PeerId,
    pub to_peer: PeerId,
    pub kind: MessageKind,
    pub index: u32,
    pub total: u32,
    pub requires_ack: bool,
    pub created_at: u64,
    pub data: Bytes,
}

/// Split a message into contiguous fragments of at most `max_chunk` bytes.
///
/// Returns an empty vec when the payload already fits in one chunk — the
/// caller sends the message whole in that case.
pub fn split(message: &Message, max_chunk: usize) -> Vec<Fragment> {
    if max_chunk == 0 || message.payload.len() <= max_chunk {
        return Vec::new();
    }

    let total = message.payload.len().div_ceil(max_chunk) as u32;
    message
        .payload
        .chunks(max_chunk)
        .enumerate()
        .map(|(index, chunk)| Fragment {
            message_id: message.id,
            from_peer: message.from_peer,
            to_peer: message.to_peer,
            kind: message.kind,
            index: index as u32,
            total,
            requires_ack: message.requires_ack,
            created_at: message.created_at,
            data: message.payload.slice_ref(chunk),
        })
        .collect()
}

/// In-progress reassembly state for one message id.
struct Assembly {
    from_peer: PeerId,
    to_peer: PeerId,
    kind: MessageKind,
    requires_ack: bool,
    created_at: u64,
    total: u32,
    parts: HashMap<u32, Bytes>,
    started_at: Instant,
}

/// Reassembles inbound fragments into complete messages.
pub struct FragmentAssembler {
    active: DashMap<MessageId, Assembly>,
    /// Ids that completed or were abandoned; late fragments for these are
    /// dropped.
    closed: DashMap<MessageId, Instant>,
    timeout: Duration,
}

impl FragmentAssembler {
    pub fn new(timeout: Duration) -> Self {
        Self {
            active: DashMap::new(),
            closed: DashMap::new(),
            timeout,
        }
    }

    /// Add one fragment. Returns the reassembled message once every
    /// fragment for its id has been seen.
    pub fn ingest(&self, fragment: Fragment) -> Option<Message> {
        self.cleanup_stale();

        let id = fragment.message_id;
        if self.closed.contains_key(&id) {
            tracing::trace!(
                message_id = hex::encode(&id[..8]),
                "fragment for closed message dropped"
            );
            return None;
        }

        if fragment.total < 2 || fragment.index >= fragment.total {
            tracing::debug!(
                index = fragment.index,
                total = fragment.total,
                "malformed fragment dropped"
            );
            return None;
        }

        let complete = {
            let mut assembly = self.active.entry(id).or_insert_with(|| Assembly {
                from_peer: fragment.from_peer,
                to_peer: fragment.to_peer,
                kind: fragment.kind,
                requires_ack: fragment.requires_ack,
                created_at: fragment.created_at,
                total: fragment.total,
                parts: HashMap::new(),
                started_at: Instant::now(),
            });

            if assembly.total != fragment.total {
                tracing::debug!(
                    message_id = hex::encode(&id[..8]),
                    expected = assembly.total,
                    got = fragment.total,
                    "fragment total mismatch, dropped"
                );
                return None;
            }

            assembly.parts.insert(fragment.index, fragment.data);
            assembly.parts.len() == assembly.total as usize
        };

        if !complete {
            return None;
        }

        let (_, assembly) = self.active.remove(&id)?;
        self.closed.insert(id, Instant::now());

        let mut payload = BytesMut::new();
        for index in 0..assembly.total {
            // All indices are present: keys are unique in [0, total) and
            // the count matched.
            let part = assembly.parts.get(&index)?;
            payload.put_slice(part);
        }

        tracing::debug!(
            message_id = hex::encode(&id[..8]),
            fragments = assembly.total,
            bytes = payload.len(),
            "message reassembled"
        );

        Some(Message {
            id,
            from_peer: assembly.from_peer,
            to_peer: assembly.to_peer,
            kind: assembly.kind,
            payload: payload.freeze(),
            requires_ack: assembly.requires_ack,
            created_at: assembly.created_at,
        })
    }

    /// Number of messages currently being reassembled.
    pub fn in_progress(&self) -> usize {
        self.active.len()
    }

    /// Abandon assemblies older than the reassembly timeout and forget
    /// closed ids that have aged out.
    fn cleanup_stale(&self) {
        let timeout = self.timeout;
        self.active.retain(|id, assembly| {
            let stale = assembly.started_at.elapsed() > timeout;
            if stale {
                tracing::warn!(
                    message_id = hex::encode(&id[..8]),
                    received = assembly.parts.len(),
                    total = assembly.total,
                    "abandoning incomplete reassembly (timed out)"
                );
                self.closed.insert(*id, Instant::now());
            }
            !stale
        });
        self.closed.retain(|_, closed_at| closed_at.elapsed() <= timeout);
    }
}
