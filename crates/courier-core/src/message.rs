//! Message model for reliable P2P delivery.
//!
//! A [`Message`] is the unit of application communication. It is created by
//! the application layer, handed to the transport, and never mutated after
//! creation. Acknowledgements reference another message's id by carrying it
//! as their payload — they never reuse the id itself.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Peer identity — the peer's public key bytes.
pub type PeerId = [u8; 32];

/// Message identity — unique per sender.
pub type MessageId = [u8; 32];

/// Message type discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageKind {
    Data = 1,
    Ack = 2,
    Control = 3,
}

impl MessageKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Data),
            2 => Some(Self::Ack),
            3 => Some(Self::Control),
            _ => None,
        }
    }
}

/// Delivery priority for queued messages.
///
/// The discriminant order is the scheduling order: `Urgent` sorts before
/// `Low` under the derived `Ord`, so an ascending sort yields
/// most-severe-first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum Priority {
    Urgent = 0,
    High = 1,
    Normal = 2,
    Low = 3,
}

/// The unit of application communication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message id (blake3 of sender + recipient + timestamp + payload
    /// unless caller-supplied).
    pub id: MessageId,

    /// Originating peer.
    pub from_peer: PeerId,

    /// Destination peer.
    pub to_peer: PeerId,

    /// Message type.
    pub kind: MessageKind,

    /// Application payload. Unbounded here; the transport fragments
    /// anything that exceeds the connection's maximum message size.
    pub payload: Bytes,

    /// Whether the sender expects an acknowledgement.
    pub requires_ack: bool,

    /// Unix timestamp in milliseconds.
    pub created_at: u64,
}

impl Message {
    /// Create a data message.
    pub fn data(from_peer: PeerId, to_peer: PeerId, payload: Bytes, requires_ack: bool) -> Self {
        let created_at = now_ms();
        let id = Self::generate_id(&from_peer, &to_peer, created_at, &payload);
        Self {
            id,
            from_peer,
            to_peer,
            kind: MessageKind::Data,
            payload,
            requires_ack,
            created_at,
        }
    }

    /// Create a control message.
    pub fn control(from_peer: PeerId, to_peer: PeerId, payload: Bytes, requires_ack: bool) -> Self {
        let created_at = now_ms();
        let id = Self::generate_id(&from_peer, &to_peer, created_at, &payload);
        Self {
            id,
            from_peer,
            to_peer,
            kind: MessageKind::Control,
            payload,
            requires_ack,
            created_at,
        }
    }

    /// Create an acknowledgement for `target`. The target id travels as the
    /// payload; acks never require acks themselves.
    pub fn ack(from_peer: PeerId, to_peer: PeerId, target: MessageId) -> Self {
        let created_at = now_ms();
        let payload = Bytes::copy_from_slice(&target);
        let id = Self::generate_id(&from_peer, &to_peer, created_at, &payload);
        Self {
            id,
            from_peer,
            to_peer,
            kind: MessageKind::Ack,
            payload,
            requires_ack: false,
            created_at,
        }
    }

    /// For an ack message, the id of the message being confirmed.
    pub fn ack_target(&self) -> Option<MessageId> {
        if self.kind != MessageKind::Ack || self.payload.len() != 32 {
            return None;
        }
        let mut id = [0u8; 32];
        id.copy_from_slice(&self.payload);
        Some(id)
    }

    /// Generate a message id from content.
    fn generate_id(
        from_peer: &PeerId,
        to_peer: &PeerId,
        timestamp: u64,
        payload: &impl AsRef<[u8]>,
    ) -> MessageId {
        use blake3::Hasher;

        let mut hasher = Hasher::new();
        hasher.update(from_peer);
        hasher.update(to_peer);
        hasher.update(&timestamp.to_le_bytes());
        hasher.update(payload.as_ref());

        let hash = hasher.finalize();
        let mut id = [0u8; 32];
        id.copy_from_slice(hash.as_bytes());
        id
    }
}

/// Current time as Unix milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
