use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use cirrus_core::{AppError, AppResult};
use cirrus_domain::QueueMessage;

use crate::coordination_ports::{FixedDeadline, MessageHandler};
use crate::test_support::{FakeMessageQueue, FakeObjectStore};

use super::{QueueConsumerConfig, RateLimitedQueueConsumer};

/// Applies each distinct body once and reports repeats as already started.
#[derive(Default)]
struct IdempotentHandler {
    applied: Mutex<HashSet<String>>,
    side_effects: AtomicUsize,
    calls: AtomicUsize,
}

#[async_trait]
impl MessageHandler for IdempotentHandler {
    async fn handle_message(&self, _queue_id: &str, message: &QueueMessage) -> AppResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if message.body() == "poison" {
            return Err(AppError::Validation("unparseable message".to_owned()));
        }

        if !self.applied.lock().await.insert(message.body().to_owned()) {
            return Err(AppError::ExecutionAlreadyExists(message.body().to_owned()));
        }

        self.side_effects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn long_deadline() -> Arc<FixedDeadline> {
    Arc::new(FixedDeadline::after(Duration::from_secs(900)))
}

#[tokio::test]
async fn bounded_consumer_stops_at_message_limit() {
    let queue = Arc::new(FakeMessageQueue::default());
    for index in 0..8 {
        queue.send("inbound", format!("granule-{index}")).await;
    }

    let consumer = RateLimitedQueueConsumer::new(
        queue.clone(),
        long_deadline(),
        QueueConsumerConfig::bounded("inbound", 5, Duration::from_secs(60)),
    )
    .unwrap_or_else(|_| unreachable!());
    let handler = IdempotentHandler::default();

    let processed = consumer.consume(&handler).await;
    assert_eq!(processed.ok(), Some(5));
    assert_eq!(queue.pending_count("inbound").await, 3);
    assert_eq!(queue.deleted_ids().await.len(), 5);
}

#[tokio::test]
async fn bounded_consumer_stops_on_empty_queue() {
    let queue = Arc::new(FakeMessageQueue::default());
    queue.send("inbound", "granule-1").await;

    let consumer = RateLimitedQueueConsumer::new(
        queue.clone(),
        long_deadline(),
        QueueConsumerConfig::bounded("inbound", 50, Duration::from_secs(60)),
    )
    .unwrap_or_else(|_| unreachable!());

    let processed = consumer.consume(&IdempotentHandler::default()).await;
    assert_eq!(processed.ok(), Some(1));
}

#[tokio::test]
async fn failed_message_is_left_for_redelivery() {
    let queue = Arc::new(FakeMessageQueue::default());
    queue.send("inbound", "granule-1").await;
    let poison_id = queue.send("inbound", "poison").await;

    let consumer = RateLimitedQueueConsumer::new(
        queue.clone(),
        long_deadline(),
        QueueConsumerConfig::bounded("inbound", 10, Duration::from_secs(60)),
    )
    .unwrap_or_else(|_| unreachable!());

    let processed = consumer.consume(&IdempotentHandler::default()).await;
    assert_eq!(processed.ok(), Some(1));
    assert!(!queue.deleted_ids().await.contains(&poison_id));

    queue.expire_visibility().await;
    assert_eq!(queue.pending_count("inbound").await, 1);
}

#[tokio::test]
async fn redelivered_message_is_deleted_without_second_side_effect() {
    let queue = Arc::new(FakeMessageQueue::default());
    queue.send("inbound", "granule-7").await;
    queue.send("inbound", "granule-7").await;

    let consumer = RateLimitedQueueConsumer::new(
        queue.clone(),
        long_deadline(),
        QueueConsumerConfig::bounded("inbound", 10, Duration::from_secs(60)),
    )
    .unwrap_or_else(|_| unreachable!());
    let handler = IdempotentHandler::default();

    let processed = consumer.consume(&handler).await;
    assert_eq!(processed.ok(), Some(2));
    assert_eq!(handler.side_effects.load(Ordering::SeqCst), 1);
    assert_eq!(queue.deleted_ids().await.len(), 2);
    assert_eq!(queue.pending_count("inbound").await, 0);
}

#[tokio::test(start_paused = true)]
async fn rate_limit_and_time_budget_bound_throughput() {
    let queue = Arc::new(FakeMessageQueue::default());
    let queue_ids: Vec<String> = (0..3).map(|index| format!("queue-{index}")).collect();
    for queue_id in &queue_ids {
        for index in 0..100 {
            queue.send(queue_id, format!("{queue_id}-{index}")).await;
        }
    }

    let consumer = RateLimitedQueueConsumer::new(
        queue.clone(),
        long_deadline(),
        QueueConsumerConfig::rate_limited(queue_ids.clone(), 10, Duration::from_secs(3)),
    )
    .unwrap_or_else(|_| unreachable!());
    let handler = IdempotentHandler::default();

    let processed = consumer.consume(&handler).await.unwrap_or_default();
    assert!(processed >= 20, "processed only {processed}");
    assert!(processed <= 31, "processed {processed} above the rate");

    let mut calls = Vec::new();
    for queue_id in &queue_ids {
        calls.push(queue.receive_calls(queue_id).await);
    }
    let most = calls.iter().copied().max().unwrap_or_default();
    let fewest = calls.iter().copied().min().unwrap_or_default();
    assert!(most - fewest <= 1, "uneven polling: {calls:?}");
}

#[tokio::test(start_paused = true)]
async fn stops_before_invocation_deadline() {
    let queue = Arc::new(FakeMessageQueue::default());
    for index in 0..100 {
        queue.send("inbound", format!("granule-{index}")).await;
    }

    let mut config =
        QueueConsumerConfig::rate_limited(vec!["inbound".to_owned()], 10, Duration::from_secs(100));
    config.safety_margin = Duration::from_secs(1);
    let consumer = RateLimitedQueueConsumer::new(
        queue.clone(),
        Arc::new(FixedDeadline::after(Duration::from_secs(3))),
        config,
    )
    .unwrap_or_else(|_| unreachable!());

    let started = tokio::time::Instant::now();
    let processed = consumer
        .consume(&IdempotentHandler::default())
        .await
        .unwrap_or_default();

    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(processed <= 21, "processed {processed}");
}

#[tokio::test(start_paused = true)]
async fn rate_limited_consumer_keeps_polling_until_budget() {
    let queue = Arc::new(FakeMessageQueue::default());
    let consumer = RateLimitedQueueConsumer::new(
        queue.clone(),
        long_deadline(),
        QueueConsumerConfig::rate_limited(vec!["inbound".to_owned()], 5, Duration::from_secs(4)),
    )
    .unwrap_or_else(|_| unreachable!());

    let started = tokio::time::Instant::now();
    let processed = consumer.consume(&IdempotentHandler::default()).await;
    assert_eq!(processed.ok(), Some(0));
    assert!(started.elapsed() >= Duration::from_secs(4));
    assert!(queue.receive_calls("inbound").await >= 3);
}

#[tokio::test]
async fn archived_copy_is_removed_best_effort() {
    let queue = Arc::new(FakeMessageQueue::default());
    let store = Arc::new(FakeObjectStore::default());
    let first_id = queue.send("inbound", "granule-1").await;
    store
        .insert_at(
            format!("stack/archived-incoming-messages/inbound/{first_id}").as_str(),
            chrono::Utc::now(),
        )
        .await;

    let consumer = RateLimitedQueueConsumer::new(
        queue.clone(),
        long_deadline(),
        QueueConsumerConfig::bounded("inbound", 10, Duration::from_secs(60)),
    )
    .unwrap_or_else(|_| unreachable!())
    .with_archive_cleanup(store.clone(), "stack/archived-incoming-messages");

    assert_eq!(
        consumer.consume(&IdempotentHandler::default()).await.ok(),
        Some(1)
    );
    assert!(store.keys().await.is_empty());

    store.fail_deletes.store(true, Ordering::SeqCst);
    queue.send("inbound", "granule-2").await;
    assert_eq!(
        consumer.consume(&IdempotentHandler::default()).await.ok(),
        Some(1)
    );
}

#[test]
fn rejects_invalid_configuration() {
    let queue = Arc::new(FakeMessageQueue::default());
    let empty = RateLimitedQueueConsumer::new(
        queue.clone(),
        long_deadline(),
        QueueConsumerConfig::default(),
    );
    assert!(empty.is_err());

    let zero_rate = RateLimitedQueueConsumer::new(
        queue,
        long_deadline(),
        QueueConsumerConfig::rate_limited(vec!["q".to_owned()], 0, Duration::from_secs(1)),
    );
    assert!(zero_rate.is_err());
}
