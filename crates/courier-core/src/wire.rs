//! Courier wire format — the on-wire unit exchanged between two peers.
//!
//! Every frame starts with a [`FrameHeader`]. The receiver can fully
//! describe and route a frame before touching the payload. A frame is a
//! fragment of a larger message iff `fragment_total > 1`; whole messages
//! travel with `fragment_index = 0, fragment_total = 1`.
//!
//! Fragments carry the originating and destination peer in the header like
//! every other frame, so a reassembled message is always fully addressed.
//!
//! All types are #[repr(C, packed)] for deterministic layout and use
//! zerocopy derives for safe, allocation-free serialization. There is no
//! unsafe code in this module.

use bytes::{BufMut, Bytes, BytesMut};
use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::message::MessageKind;

// ── Frame Header ─────────────────────────────────────────────────────────────

/// Header preceding every payload on the wire.
///
/// Wire size: 120 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct FrameHeader {
    /// Id of the message this frame belongs to. All fragments of one
    /// message share it.
    pub msg_id: [u8; 32],

    /// Originating peer.
    pub from_peer: [u8; 32],

    /// Destination peer.
    pub to_peer: [u8; 32],

    /// Unix timestamp in milliseconds when the message was created.
    pub created_at_ms: u64,

    /// 0-based fragment position. 0 for whole messages.
    pub fragment_index: u32,

    /// Total fragment count. 1 for whole messages; > 1 marks a fragment.
    pub fragment_total: u32,

    /// Payload length in bytes, not including this header.
    pub length: u32,

    /// Message kind byte — see [`MessageKind`].
    pub kind: u8,

    /// Bit flags:
    ///   bit  0: sender expects an acknowledgement
    ///   bits 1-7: reserved, must be zero
    pub flags: u8,

    /// Wire format version. Currently 0x01. A receiver seeing an unknown
    /// version drops the frame.
    pub version: u8,

    /// Reserved, must be zero.
    pub reserved: u8,
}

// Compile-time size guard. If this fails, the wire format has silently changed.
assert_eq_size!(FrameHeader, [u8; 120]);

/// Header length in bytes.
pub const FRAME_HEADER_LEN: usize = 120;

/// Current frame format version.
pub const WIRE_VERSION: u8 = 0x01;

/// Flag bit: the sender expects an acknowledgement.
pub const FLAG_REQUIRES_ACK: u8 = 0b0000_0001;

/// Default maximum on-wire frame size when the connection does not say
/// otherwise.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 65535;

// ── Encode / decode ──────────────────────────────────────────────────────────

/// Serialize a header + payload into one wire frame.
pub fn encode_frame(header: &FrameHeader, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.put_slice(header.as_bytes());
    buf.put_slice(payload);
    buf.freeze()
}

/// Parse a wire frame. The payload slice is zero-copy into `frame`.
pub fn decode_frame(frame: &Bytes) -> Result<(FrameHeader, Bytes), WireError> {
    let header = FrameHeader::read_from_prefix(&frame[..]).ok_or(WireError::Truncated {
        got: frame.len(),
        need: FRAME_HEADER_LEN,
    })?;

    if header.version != WIRE_VERSION {
        return Err(WireError::UnknownVersion(header.version));
    }
    if MessageKind::from_u8(header.kind).is_none() {
        return Err(WireError::UnknownKind(header.kind));
    }

    // Copy packed fields to locals before use — direct references to
    // packed fields are unaligned.
    let length = header.length as usize;
    let index = header.fragment_index;
    let total = header.fragment_total;

    let payload = frame.slice(FRAME_HEADER_LEN..);
    if payload.len() != length {
        return Err(WireError::LengthMismatch {
            declared: length,
            actual: payload.len(),
        });
    }

    if total == 0 || (total == 1 && index != 0) || (total > 1 && index >= total) {
        return Err(WireError::InvalidFragment { index, total });
    }

    Ok((header, payload))
}

impl FrameHeader {
    /// Whether this frame is one fragment of a larger message.
    pub fn is_fragment(&self) -> bool {
        let total = self.fragment_total;
        total > 1
    }

    /// Whether the sender expects an acknowledgement.
    pub fn requires_ack(&self) -> bool {
        self.flags & FLAG_REQUIRES_ACK != 0
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("frame truncated: {got} bytes, header needs {need}")]
    Truncated { got: usize, need: usize },

    #[error("unknown frame version: 0x{0:02x}")]
    UnknownVersion(u8),

    #[error("unknown message kind byte: 0x{0:02x}")]
    UnknownKind(u8),

    #[error("declared payload length {declared} but frame carries {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("invalid fragment position {index}/{total}")]
    InvalidFragment { index: u32, total: u32 },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
