use crate::*;

use anyhow::Result;
use bytes::Bytes;
use courier_core::message::Priority;
use courier_core::wire::FRAME_HEADER_LEN;
use tokio::sync::broadcast;

/// The full offline story: the peer is away, sends queue up, and the
/// reconnect drain delivers everything in priority order.
#[tokio::test]
async fn queued_messages_drain_on_reconnect() -> Result<()> {
    let (a, mut b) = linked_nodes("reconnect-drain", 4096);

    // Peer never marked connected, so sends queue silently.
    let low = Message::data(PEER_A, PEER_B, Bytes::from_static(b"low"), false);
    let urgent = Message::data(PEER_A, PEER_B, Bytes::from_static(b"urgent"), false);
    a.courier
        .enqueue_offline(PEER_B, low.clone(), Priority::Low, None)
        .await?;
    a.courier
        .enqueue_offline(PEER_B, urgent.clone(), Priority::Urgent, None)
        .await?;
    assert_eq!(a.courier.queue_stats(&PEER_B).await.count, 2);

    let delivered = a.courier.on_peer_connected(PEER_B).await?;
    assert_eq!(delivered, 2);
    assert_eq!(a.courier.queue_stats(&PEER_B).await.count, 0);

    assert_eq!(recv_within(&mut b.stream, 5).await.id, urgent.id);
    assert_eq!(recv_within(&mut b.stream, 5).await.id, low.id);
    Ok(())
}

/// A failed drain leaves the remainder queued; the next reconnect
/// delivers everything.
#[tokio::test]
async fn interrupted_drain_resumes_later() -> Result<()> {
    let (a, mut b) = linked_nodes("reconnect-resume", 4096);

    for i in 0..3u8 {
        let msg = Message::data(PEER_A, PEER_B, Bytes::copy_from_slice(&[i]), false);
        a.courier
            .enqueue_offline(PEER_B, msg, Priority::Normal, None)
            .await?;
    }

    // Link is dead on the first reconnect attempt.
    a.link.set_up(false);
    assert_eq!(a.courier.on_peer_connected(PEER_B).await?, 0);
    assert_eq!(a.courier.queue_stats(&PEER_B).await.count, 3);

    // Second reconnect with a healthy link drains everything; the
    // aggressive resume ignores the backoff from the failed attempt.
    a.link.set_up(true);
    assert_eq!(a.courier.on_peer_connected(PEER_B).await?, 3);
    for _ in 0..3 {
        recv_within(&mut b.stream, 5).await;
    }
    Ok(())
}

/// A message whose ack never arrives is re-enqueued by the maintenance
/// sweep and delivered when the peer comes back.
#[tokio::test]
async fn unacked_message_is_recovered_after_reconnect() -> Result<()> {
    let (a, mut b) = linked_nodes("reconnect-ack", 4096);

    let (shutdown_tx, _) = broadcast::channel(1);
    let task = a.courier.spawn_maintenance(shutdown_tx.subscribe());

    // The remote link swallows writes while down, so the data frame is
    // lost and no ack ever comes back.
    a.courier.on_peer_connected(PEER_B).await?;
    a.link.set_up(false);

    let msg = Message::data(PEER_A, PEER_B, Bytes::from_static(b"try again"), true);
    let id = msg.id;
    // The wire write fails outright; the message lands in the queue.
    assert!(a.courier.send(msg).await.is_err());
    assert_eq!(a.courier.queue_stats(&PEER_B).await.count, 1);

    // Link restored: the retry timer drains the queue, the remote acks,
    // and the entry never comes back.
    a.link.set_up(true);
    let got = recv_within(&mut b.stream, 5).await;
    assert_eq!(got.id, id);

    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let stats = a.courier.statistics();
            if stats.pending_acks == 0 && a.courier.queue_stats(&PEER_B).await.count == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("ack should confirm the retried delivery");

    shutdown_tx.send(()).ok();
    task.await?;
    Ok(())
}

/// A 500 KB message sent while the link is dead is queued, then
/// delivered in 8 fragments and reassembled byte-identical once the peer
/// reconnects.
#[tokio::test]
async fn offline_large_message_is_delivered_after_reconnect() -> Result<()> {
    let chunk = 64 * 1024;
    let (a, mut b) = linked_nodes("reconnect-large", chunk + FRAME_HEADER_LEN);

    // A believes the peer is reachable, but the wire write fails.
    a.courier.on_peer_connected(PEER_B).await?;
    a.link.set_up(false);

    let payload: Vec<u8> = (0..500 * 1024).map(|i| (i % 241) as u8).collect();
    let msg = Message::data(PEER_A, PEER_B, Bytes::from(payload), false);
    assert!(a.courier.send(msg.clone()).await.is_err());
    a.courier.on_peer_disconnected(&PEER_B);
    assert_eq!(a.courier.queue_stats(&PEER_B).await.count, 1);

    // Reconnect: the drain sends the message, the transport fragments
    // it, and the receiver reassembles the original.
    a.link.set_up(true);
    assert_eq!(a.courier.on_peer_connected(PEER_B).await?, 1);

    let got = recv_within(&mut b.stream, 5).await;
    assert_eq!(got.id, msg.id);
    assert_eq!(got.payload, msg.payload, "payload must be byte-identical");
    assert_eq!(
        a.courier.queue_stats(&PEER_B).await.count,
        0,
        "queue entry removed after delivery"
    );
    Ok(())
}

/// Sends while disconnected queue; sends after reconnect go straight
/// over the wire.
#[tokio::test]
async fn disconnect_and_reconnect_switch_paths() -> Result<()> {
    let (a, mut b) = linked_nodes("reconnect-switch", 4096);
    a.courier.on_peer_connected(PEER_B).await?;

    let live = Message::data(PEER_A, PEER_B, Bytes::from_static(b"live"), false);
    a.courier.send(live.clone()).await?;
    assert_eq!(recv_within(&mut b.stream, 5).await.id, live.id);

    a.courier.on_peer_disconnected(&PEER_B);
    let parked = Message::data(PEER_A, PEER_B, Bytes::from_static(b"parked"), false);
    a.courier.send(parked.clone()).await?;
    assert_eq!(a.courier.queue_stats(&PEER_B).await.count, 1);
    assert_eq!(a.courier.statistics().sent, 1, "no wire attempt while away");

    a.courier.on_peer_connected(PEER_B).await?;
    assert_eq!(recv_within(&mut b.stream, 5).await.id, parked.id);
    assert_eq!(a.courier.queue_stats(&PEER_B).await.count, 0);
    Ok(())
}
