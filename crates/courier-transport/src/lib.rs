//! courier-transport — reliability layer over one live peer connection.
//!
//! Fragments oversized messages, reassembles inbound fragments, tracks
//! pending acknowledgements, and exposes a deduplicated stream of fully
//! reassembled application messages.

pub mod ack;
pub mod connection;
pub mod fragment;
pub mod transport;

pub use ack::{AckTracker, PendingAck};
pub use connection::{channel_pair, ChannelConnection, Connection, ConnectionError};
pub use fragment::{split, Fragment, FragmentAssembler};
pub use transport::{Transport, TransportError, TransportSnapshot};
