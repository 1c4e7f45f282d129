use crate::*;

use anyhow::Result;
use bytes::Bytes;
use courier_transport::Transport;

/// Round trip with acknowledgement: the receiver auto-acks, the sender's
/// pending entry clears, and the ack itself never reaches either app
/// stream.
#[tokio::test]
async fn ack_round_trip_clears_pending() -> Result<()> {
    let (mut a, mut b) = linked_nodes("ack-round-trip", 4096);
    a.courier.on_peer_connected(PEER_B).await?;

    let msg = Message::data(PEER_A, PEER_B, Bytes::from_static(b"confirm me"), true);
    a.courier.send(msg.clone()).await?;

    let got = recv_within(&mut b.stream, 5).await;
    assert_eq!(got.id, msg.id);

    tokio::time::timeout(Duration::from_secs(2), async {
        while a.courier.statistics().pending_acks != 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("pending ack should clear");

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(a.stream.try_recv().is_err(), "ack must not surface as a message");
    Ok(())
}

/// When the ack never arrives, the sweep reports the message exactly
/// once — the second sweep finds nothing.
#[tokio::test]
async fn lost_ack_is_swept_exactly_once() {
    init_tracing();
    let config = fast_config("ack-loss");
    // Remote side never starts a transport, so frames pile up unanswered.
    let ((conn_a, rx_a), _remote) = channel_pair(4096, 64);
    let transport = Transport::new(conn_a, config.transport.clone());
    let _stream = transport.start_receiving(rx_a);

    let msg = Message::data(PEER_A, PEER_B, Bytes::from_static(b"into the void"), true);
    transport.send(&msg).await.unwrap();
    assert_eq!(transport.pending_acks(), 1);

    tokio::time::sleep(Duration::from_millis(80)).await;
    let expired = transport.sweep_expired_acks();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].id, msg.id);

    assert!(transport.sweep_expired_acks().is_empty(), "one report per timeout");
    assert_eq!(transport.pending_acks(), 0);
}

/// A duplicate send surfaces once at the receiver and shows up in the
/// duplicate counter.
#[tokio::test]
async fn duplicates_surface_once() -> Result<()> {
    let (a, mut b) = linked_nodes("dedup", 4096);
    a.courier.on_peer_connected(PEER_B).await?;

    let msg = Message::data(PEER_A, PEER_B, Bytes::from_static(b"once"), false);
    a.courier.send(msg.clone()).await?;
    a.courier.send(msg.clone()).await?;

    let got = recv_within(&mut b.stream, 5).await;
    assert_eq!(got.id, msg.id);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(b.stream.try_recv().is_err(), "duplicate must be suppressed");
    Ok(())
}

/// Counters only move forward and reflect the actual traffic.
#[tokio::test]
async fn statistics_are_monotonic() -> Result<()> {
    let (a, mut b) = linked_nodes("stats", 4096);
    a.courier.on_peer_connected(PEER_B).await?;

    let before = a.courier.statistics();
    for i in 0..5u8 {
        let msg = Message::data(PEER_A, PEER_B, Bytes::copy_from_slice(&[i]), false);
        a.courier.send(msg).await?;
        recv_within(&mut b.stream, 5).await;
    }
    let after = a.courier.statistics();

    assert_eq!(after.sent, before.sent + 5);
    assert!(after.bytes_sent > before.bytes_sent);
    assert_eq!(after.failed, 0);
    Ok(())
}

/// send_batch delivers what it can and reports the count.
#[tokio::test]
async fn batch_send_reports_successes() -> Result<()> {
    let (a, mut b) = linked_nodes("batch", 4096);
    a.courier.on_peer_connected(PEER_B).await?;

    let messages: Vec<Message> = (0..4u8)
        .map(|i| Message::data(PEER_A, PEER_B, Bytes::copy_from_slice(&[i]), false))
        .collect();
    let delivered = a.courier.send_batch(messages).await?;
    assert_eq!(delivered, 4);

    for _ in 0..4 {
        recv_within(&mut b.stream, 5).await;
    }
    Ok(())
}
