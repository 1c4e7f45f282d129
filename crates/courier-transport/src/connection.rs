//! Connection boundary — the injected duplex channel the transport writes to.
//!
//! Connection establishment, NAT traversal, and encryption live outside
//! this crate. The transport only needs a best-effort, message-oriented
//! write side with a known maximum frame size; the read side arrives as an
//! `mpsc::Receiver<Bytes>` handed to [`Transport::start_receiving`].
//!
//! [`Transport::start_receiving`]: crate::transport::Transport::start_receiving

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::mpsc;

/// Errors the connection can report on write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// The remote side is gone and will not come back on this connection.
    #[error("connection closed")]
    Closed,

    /// The link is temporarily unusable. Retryable via the offline queue.
    #[error("link down")]
    LinkDown,
}

/// Write side of one live peer connection.
///
/// `write_message` either delivers the whole frame or fails — partial
/// writes do not exist at this boundary. A failure is reported
/// synchronously so the caller can route the message to the offline queue.
pub trait Connection: Send + Sync + 'static {
    /// Largest frame `write_message` accepts.
    fn max_message_size(&self) -> usize;

    /// Write one frame to the peer.
    fn write_message(&self, frame: Bytes) -> BoxFuture<'static, Result<(), ConnectionError>>;
}

// ── In-process link ───────────────────────────────────────────────────────────

/// In-process connection backed by an mpsc channel.
///
/// Used by the integration tests and anywhere two transports run inside
/// the same process. The `up` switch simulates link outages: writes while
/// down fail with [`ConnectionError::LinkDown`].
pub struct ChannelConnection {
    tx: mpsc::Sender<Bytes>,
    max_message_size: usize,
    up: Arc<AtomicBool>,
}

impl ChannelConnection {
    /// Bring the link up or down. Writes while down fail immediately.
    pub fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
    }

    pub fn is_up(&self) -> bool {
        self.up.load(Ordering::SeqCst)
    }
}

impl Connection for ChannelConnection {
    fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    fn write_message(&self, frame: Bytes) -> BoxFuture<'static, Result<(), ConnectionError>> {
        let tx = self.tx.clone();
        let up = self.up.clone();
        Box::pin(async move {
            if !up.load(Ordering::SeqCst) {
                return Err(ConnectionError::LinkDown);
            }
            tx.send(frame).await.map_err(|_| ConnectionError::Closed)
        })
    }
}

/// Build two connected [`ChannelConnection`]s.
///
/// Returns one (write-side, inbound-receiver) pair per endpoint; frames
/// written by one endpoint arrive on the other endpoint's receiver.
#[allow(clippy::type_complexity)]
pub fn channel_pair(
    max_message_size: usize,
    capacity: usize,
) -> (
    (Arc<ChannelConnection>, mpsc::Receiver<Bytes>),
    (Arc<ChannelConnection>, mpsc::Receiver<Bytes>),
) {
    let (a_tx, b_rx) = mpsc::channel(capacity);
    let (b_tx, a_rx) = mpsc::channel(capacity);

    let a = Arc::new(ChannelConnection {
        tx: a_tx,
        max_message_size,
        up: Arc::new(AtomicBool::new(true)),
    });
    let b = Arc::new(ChannelConnection {
        tx: b_tx,
        max_message_size,
        up: Arc::new(AtomicBool::new(true)),
    });

    ((a, a_rx), (b, b_rx))
}
