use crate::*;

use bytes::Bytes;
use courier_core::message::{now_ms, Priority};
use courier_queue::{OfflineQueue, QueueEvent, ResumePolicy};

fn open_queue(tag: &str, capacity: usize) -> OfflineQueue {
    init_tracing();
    let mut settings = fast_config(tag).queue;
    settings.capacity_per_peer = capacity;
    OfflineQueue::open(settings).expect("queue open")
}

fn data(tag: u8) -> Message {
    Message::data(PEER_A, PEER_B, Bytes::copy_from_slice(&[tag]), false)
}

/// Messages enqueued [LOW, URGENT, NORMAL] come back [URGENT, NORMAL, LOW].
#[tokio::test]
async fn priorities_drain_most_severe_first() {
    let queue = open_queue("prio", 100);

    let low = data(1);
    let urgent = data(2);
    let normal = data(3);
    queue
        .enqueue(PEER_B, low.clone(), Priority::Low, 60_000)
        .await
        .unwrap();
    queue
        .enqueue(PEER_B, urgent.clone(), Priority::Urgent, 60_000)
        .await
        .unwrap();
    queue
        .enqueue(PEER_B, normal.clone(), Priority::Normal, 60_000)
        .await
        .unwrap();

    let due = queue
        .due_messages(&PEER_B, now_ms(), ResumePolicy::RespectBackoff)
        .await;
    let order: Vec<_> = due.iter().map(|e| e.message.id).collect();
    assert_eq!(order, vec![urgent.id, normal.id, low.id]);
}

/// The 1001st message evicts the single oldest entry, even an urgent one.
#[tokio::test]
async fn capacity_evicts_oldest_at_one_thousand() {
    let queue = open_queue("capacity", 1000);
    let mut events = queue.subscribe();

    let oldest = data(0);
    queue
        .enqueue(PEER_B, oldest.clone(), Priority::Urgent, 600_000)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(2)).await;

    for i in 1..=1000u16 {
        let msg = Message::data(
            PEER_A,
            PEER_B,
            Bytes::copy_from_slice(&i.to_le_bytes()),
            false,
        );
        queue
            .enqueue(PEER_B, msg, Priority::Normal, 600_000)
            .await
            .unwrap();
    }

    assert_eq!(queue.len(&PEER_B).await, 1000);
    assert_eq!(
        events.recv().await.unwrap(),
        QueueEvent::Evicted {
            peer_id: PEER_B,
            message_id: oldest.id
        }
    );
}

/// Five failures exhaust the backoff table and drop the entry.
#[tokio::test]
async fn five_failures_drop_the_message() {
    let queue = open_queue("retries", 100);
    let mut events = queue.subscribe();

    let msg = data(1);
    let id = msg.id;
    queue
        .enqueue(PEER_B, msg, Priority::Normal, 600_000)
        .await
        .unwrap();

    let now = now_ms();
    let mut delays = Vec::new();
    for _ in 0..4 {
        let delay = queue
            .mark_failed(&PEER_B, &id, now)
            .await
            .unwrap()
            .expect("still retryable");
        delays.push(delay);
    }
    assert_eq!(delays, vec![1_000, 2_000, 5_000, 10_000]);

    assert!(queue.mark_failed(&PEER_B, &id, now).await.unwrap().is_none());
    assert_eq!(queue.len(&PEER_B).await, 0);
    assert_eq!(
        events.recv().await.unwrap(),
        QueueEvent::MaxRetriesExceeded {
            peer_id: PEER_B,
            message_id: id,
            retry_count: 5
        }
    );
}

/// A zero TTL makes the entry expired on arrival.
#[tokio::test]
async fn zero_ttl_expires_on_arrival() {
    let queue = open_queue("ttl", 100);

    queue
        .enqueue(PEER_B, data(1), Priority::Normal, 0)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(2)).await;
    assert!(queue
        .due_messages(&PEER_B, now_ms(), ResumePolicy::Aggressive)
        .await
        .is_empty());
    assert_eq!(queue.expire_now(now_ms()).await, 1);
    assert_eq!(queue.len(&PEER_B).await, 0);
}

/// Queue contents and retry state survive a process restart.
#[tokio::test]
async fn retry_state_survives_reopen() {
    init_tracing();
    let mut settings = fast_config("reopen").queue;
    settings.capacity_per_peer = 100;

    let msg = data(1);
    let id = msg.id;
    {
        let queue = OfflineQueue::open(settings.clone()).unwrap();
        queue
            .enqueue(PEER_B, msg.clone(), Priority::High, 600_000)
            .await
            .unwrap();
        queue.mark_failed(&PEER_B, &id, now_ms()).await.unwrap();
        queue.mark_failed(&PEER_B, &id, now_ms()).await.unwrap();
    }

    let reopened = OfflineQueue::open(settings).unwrap();
    assert_eq!(reopened.len(&PEER_B).await, 1);
    let due = reopened
        .due_messages(&PEER_B, now_ms(), ResumePolicy::Aggressive)
        .await;
    assert_eq!(due[0].message, msg);
    assert_eq!(due[0].retry_count, 2);
    assert_eq!(due[0].priority, Priority::High);
}
