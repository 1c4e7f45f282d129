use crate::*;

use bytes::Bytes;
use courier_core::wire::FRAME_HEADER_LEN;

/// A 500 KB payload over a 64 KB link crosses as 8 fragments and arrives
/// byte-identical.
#[tokio::test]
async fn large_payload_crosses_byte_identical() {
    let chunk = 64 * 1024;
    let (a, mut b) = linked_nodes("frag-large", chunk + FRAME_HEADER_LEN);

    let payload: Vec<u8> = (0..500 * 1024).map(|i| (i % 251) as u8).collect();
    let msg = Message::data(PEER_A, PEER_B, Bytes::from(payload.clone()), false);

    a.courier.on_peer_connected(PEER_B).await.unwrap();
    a.courier.send(msg.clone()).await.unwrap();

    let got = recv_within(&mut b.stream, 5).await;
    assert_eq!(got.id, msg.id);
    assert_eq!(got.from_peer, PEER_A);
    assert_eq!(got.to_peer, PEER_B);
    assert_eq!(got.payload.len(), 500 * 1024);
    assert_eq!(got.payload, msg.payload, "payload must be byte-identical");

    // ceil(500 KB / 64 KB) fragments hit the wire.
    let expected_frames = (payload.len() + chunk - 1) / chunk;
    assert_eq!(expected_frames, 8);
    let stats = a.courier.statistics();
    assert_eq!(
        stats.bytes_sent,
        (payload.len() + expected_frames * FRAME_HEADER_LEN) as u64
    );
}

/// A payload exactly at the limit travels as a single frame.
#[tokio::test]
async fn payload_at_limit_is_not_fragmented() {
    let chunk = 1024;
    let (a, mut b) = linked_nodes("frag-limit", chunk + FRAME_HEADER_LEN);

    let msg = Message::data(PEER_A, PEER_B, Bytes::from(vec![7u8; chunk]), false);
    a.courier.on_peer_connected(PEER_B).await.unwrap();
    a.courier.send(msg.clone()).await.unwrap();

    let got = recv_within(&mut b.stream, 5).await;
    assert_eq!(got.payload, msg.payload);
    assert_eq!(
        a.courier.statistics().bytes_sent,
        (chunk + FRAME_HEADER_LEN) as u64
    );
}

/// Fragmented messages keep their kind and ack flag; the receiver's
/// auto-ack confirms delivery of the reassembled whole.
#[tokio::test]
async fn fragmented_message_is_acked_as_a_whole() {
    let (a, mut b) = linked_nodes("frag-ack", 256 + FRAME_HEADER_LEN);

    let msg = Message::data(PEER_A, PEER_B, Bytes::from(vec![3u8; 2000]), true);
    a.courier.on_peer_connected(PEER_B).await.unwrap();
    a.courier.send(msg.clone()).await.unwrap();

    let got = recv_within(&mut b.stream, 5).await;
    assert!(got.requires_ack);
    assert_eq!(got.payload, msg.payload);

    tokio::time::timeout(Duration::from_secs(2), async {
        while a.courier.statistics().pending_acks != 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("ack for the reassembled message should confirm the send");
}
