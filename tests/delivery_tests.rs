//! Delivery Queue Tests
//!
//! End-to-end behavior of enqueue, acknowledgment, read receipts, and the
//! retry sweep over the single-process test stack.

mod common;

use std::time::Duration;

use chat_relay::domain::entities::{DeliveryRepository, DeliveryStatus};
use chat_relay::realtime::{EnqueueError, ServerEvent};
use pretty_assertions::assert_eq;

use common::*;

const RECV_TIMEOUT: Duration = Duration::from_millis(500);

#[tokio::test]
async fn enqueue_creates_one_record_per_recipient_under_duplicate_calls() {
    let stack = build_stack().await;
    let message = text_message(1, 10, 1);
    stack.repo.insert_message(&message);

    stack.queue.enqueue(&message, &[2, 3]).await.unwrap();
    stack.queue.enqueue(&message, &[2, 3]).await.unwrap();

    assert_eq!(stack.repo.record_count(), 2);
    assert_eq!(stack.repo.status_of(1, 2), Some(DeliveryStatus::Pending));
    assert_eq!(stack.repo.status_of(1, 3), Some(DeliveryStatus::Pending));
}

#[tokio::test]
async fn enqueue_fans_out_to_connected_chat_members() {
    let stack = build_stack().await;
    let (_sender, mut sender_rx) = connect(&stack.registry, 1, &[10]);
    let (_recipient, mut recipient_rx) = connect(&stack.registry, 2, &[10]);

    let message = text_message(1, 10, 1);
    stack.repo.insert_message(&message);
    stack.queue.enqueue(&message, &[2]).await.unwrap();

    assert!(matches!(
        recv_within(&mut recipient_rx, RECV_TIMEOUT).await,
        Some(ServerEvent::MessageNew { message }) if message.id == 1
    ));
    // The sender's sessions observe the message too.
    assert!(matches!(
        recv_within(&mut sender_rx, RECV_TIMEOUT).await,
        Some(ServerEvent::MessageNew { message }) if message.id == 1
    ));
}

#[tokio::test]
async fn duplicate_acknowledgments_emit_a_single_receipt() {
    let stack = build_stack().await;
    let (_sender, mut sender_rx) = connect(&stack.registry, 1, &[10]);

    let message = text_message(1, 10, 1);
    stack.repo.insert_message(&message);
    stack.queue.enqueue(&message, &[2]).await.unwrap();
    assert!(matches!(
        recv_within(&mut sender_rx, RECV_TIMEOUT).await,
        Some(ServerEvent::MessageNew { .. })
    ));

    // Two sessions of the recipient acknowledge the same message.
    stack.queue.acknowledge(1, 2).await.unwrap();
    stack.queue.acknowledge(1, 2).await.unwrap();

    assert!(matches!(
        recv_within(&mut sender_rx, RECV_TIMEOUT).await,
        Some(ServerEvent::MessageDelivered {
            message_id: 1,
            recipient_user_id: 2,
        })
    ));
    assert!(recv_within(&mut sender_rx, Duration::from_millis(200))
        .await
        .is_none());
    assert_eq!(stack.repo.status_of(1, 2), Some(DeliveryStatus::Delivered));
}

#[tokio::test]
async fn read_before_acknowledgment_auto_promotes_and_backfills() {
    let stack = build_stack().await;
    let (_sender, mut sender_rx) = connect(&stack.registry, 1, &[10]);

    let message = text_message(1, 10, 1);
    stack.repo.insert_message(&message);
    stack.queue.enqueue(&message, &[2]).await.unwrap();
    assert!(matches!(
        recv_within(&mut sender_rx, RECV_TIMEOUT).await,
        Some(ServerEvent::MessageNew { .. })
    ));

    // The read receipt arrives before any delivery acknowledgment.
    stack.queue.mark_read(1, 2).await.unwrap();

    assert!(matches!(
        recv_within(&mut sender_rx, RECV_TIMEOUT).await,
        Some(ServerEvent::MessageRead {
            message_id: 1,
            recipient_user_id: 2,
        })
    ));
    let record = stack.repo.record(1, 2).await.unwrap().unwrap();
    assert_eq!(record.status, DeliveryStatus::Read);
    assert!(record.delivered_at.is_some());
    assert!(record.read_at.is_some());

    // A late acknowledgment must not move the record backward or emit
    // another receipt.
    stack.queue.acknowledge(1, 2).await.unwrap();
    assert!(recv_within(&mut sender_rx, Duration::from_millis(200))
        .await
        .is_none());
    assert_eq!(stack.repo.status_of(1, 2), Some(DeliveryStatus::Read));
}

#[tokio::test(start_paused = true)]
async fn sweep_re_emits_pending_backlog_to_connected_recipient() {
    let stack = build_stack().await;

    // Recipient is offline at enqueue time.
    let message = text_message(1, 10, 1);
    stack.repo.insert_message(&message);
    stack.queue.enqueue(&message, &[2]).await.unwrap();
    stack.queue.start_sweep();

    // Recipient reconnects; the next sweep tick re-emits the backlog.
    let (_handle, mut rx) = connect(&stack.registry, 2, &[10]);
    tokio::time::sleep(Duration::from_secs(6)).await;

    assert!(matches!(
        recv_within(&mut rx, Duration::from_secs(1)).await,
        Some(ServerEvent::MessageNew { message }) if message.id == 1
    ));
    // Records advance only when the client acknowledges.
    assert_eq!(stack.repo.status_of(1, 2), Some(DeliveryStatus::Pending));

    stack.queue.stop().await;
}

#[tokio::test(start_paused = true)]
async fn stopped_sweep_leaves_pending_records_untouched() {
    let stack = build_stack().await;

    let message = text_message(1, 10, 1);
    stack.repo.insert_message(&message);
    stack.queue.enqueue(&message, &[2]).await.unwrap();
    stack.queue.start_sweep();
    stack.queue.stop().await;

    let (_handle, mut rx) = connect(&stack.registry, 2, &[10]);
    tokio::time::sleep(Duration::from_secs(12)).await;

    assert!(drain_events(&mut rx).is_empty());
    assert_eq!(stack.repo.status_of(1, 2), Some(DeliveryStatus::Pending));
}

#[tokio::test]
async fn failed_record_writes_are_retried_locally() {
    let stack = build_stack().await;
    let message = text_message(1, 10, 1);
    stack.repo.insert_message(&message);

    // Initial attempt and two retries fail; the final retry succeeds
    // (persist_retries = 3 allows four attempts in total).
    stack.repo.fail_next_creates(3);
    stack.queue.enqueue(&message, &[2]).await.unwrap();

    assert_eq!(stack.repo.status_of(1, 2), Some(DeliveryStatus::Pending));
}

#[tokio::test]
async fn exhausted_record_writes_surface_but_do_not_block_fanout() {
    let stack = build_stack().await;
    let (_recipient, mut rx) = connect(&stack.registry, 2, &[10]);

    let message = text_message(1, 10, 1);
    stack.repo.insert_message(&message);
    stack.repo.fail_next_creates(4);

    let err = stack.queue.enqueue(&message, &[2]).await.unwrap_err();
    let EnqueueError::Persistence { failed, total } = err;
    assert_eq!((failed, total), (1, 1));

    // Connected recipients still receive the message immediately; only the
    // retry bookkeeping is missing.
    assert!(matches!(
        recv_within(&mut rx, RECV_TIMEOUT).await,
        Some(ServerEvent::MessageNew { message }) if message.id == 1
    ));
    assert_eq!(stack.repo.record_count(), 0);
}
