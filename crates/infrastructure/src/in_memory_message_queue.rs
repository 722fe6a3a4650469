use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use cirrus_application::MessageQueue;
use cirrus_core::AppResult;
use cirrus_domain::{MAX_RECEIVE_MESSAGES, QueueMessage};
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct QueuedMessage {
    message_id: String,
    body: String,
    receipt_handle: Option<String>,
    visible_at: Instant,
}

/// In-memory message queue with visibility timeouts.
///
/// Received messages stay hidden until their visibility timeout passes and
/// then become receivable again under a fresh receipt handle.
#[derive(Default)]
pub struct InMemoryMessageQueue {
    queues: Mutex<HashMap<String, VecDeque<QueuedMessage>>>,
}

impl InMemoryMessageQueue {
    /// Creates an empty queue set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues `body` on `queue_id` and returns the message id.
    pub async fn send_message(&self, queue_id: &str, body: impl Into<String>) -> String {
        let message_id = uuid::Uuid::new_v4().to_string();
        self.queues
            .lock()
            .await
            .entry(queue_id.to_owned())
            .or_default()
            .push_back(QueuedMessage {
                message_id: message_id.clone(),
                body: body.into(),
                receipt_handle: None,
                visible_at: Instant::now(),
            });
        message_id
    }

    /// Counts messages on `queue_id`, visible or not.
    pub async fn len(&self, queue_id: &str) -> usize {
        self.queues
            .lock()
            .await
            .get(queue_id)
            .map_or(0, VecDeque::len)
    }

    /// Returns true when `queue_id` holds no messages.
    pub async fn is_empty(&self, queue_id: &str) -> bool {
        self.len(queue_id).await == 0
    }
}

#[async_trait]
impl MessageQueue for InMemoryMessageQueue {
    async fn receive_messages(
        &self,
        queue_id: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> AppResult<Vec<QueueMessage>> {
        let now = Instant::now();
        let limit = max_messages.min(MAX_RECEIVE_MESSAGES);
        let mut queues = self.queues.lock().await;
        let Some(queue) = queues.get_mut(queue_id) else {
            return Ok(Vec::new());
        };

        let mut received = Vec::new();
        for queued in queue.iter_mut() {
            if received.len() >= limit {
                break;
            }
            if queued.visible_at > now {
                continue;
            }

            let receipt_handle = uuid::Uuid::new_v4().to_string();
            queued.receipt_handle = Some(receipt_handle.clone());
            queued.visible_at = now + visibility_timeout;
            received.push(QueueMessage::new(
                queued.message_id.as_str(),
                queued.body.as_str(),
                receipt_handle,
            )?);
        }

        Ok(received)
    }

    async fn delete_message(&self, queue_id: &str, receipt_handle: &str) -> AppResult<()> {
        if let Some(queue) = self.queues.lock().await.get_mut(queue_id) {
            queue.retain(|queued| queued.receipt_handle.as_deref() != Some(receipt_handle));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use cirrus_application::MessageQueue;

    use super::InMemoryMessageQueue;

    #[tokio::test(start_paused = true)]
    async fn received_message_reappears_after_visibility_timeout() {
        let queue = InMemoryMessageQueue::new();
        let message_id = queue.send_message("inbound", "granule-1").await;

        let first = queue
            .receive_messages("inbound", 10, Duration::from_secs(30))
            .await
            .unwrap_or_default();
        assert_eq!(first.len(), 1);
        assert!(
            queue
                .receive_messages("inbound", 10, Duration::from_secs(30))
                .await
                .unwrap_or_default()
                .is_empty()
        );

        tokio::time::advance(Duration::from_secs(31)).await;
        let again = queue
            .receive_messages("inbound", 10, Duration::from_secs(30))
            .await
            .unwrap_or_default();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].message_id(), message_id);

        // The stale receipt no longer matches.
        assert!(
            queue
                .delete_message("inbound", first[0].receipt_handle())
                .await
                .is_ok()
        );
        assert_eq!(queue.len("inbound").await, 1);

        assert!(
            queue
                .delete_message("inbound", again[0].receipt_handle())
                .await
                .is_ok()
        );
        assert!(queue.is_empty("inbound").await);
    }

    #[tokio::test]
    async fn receive_caps_batch_at_ten() {
        let queue = InMemoryMessageQueue::new();
        for index in 0..15 {
            queue.send_message("inbound", format!("granule-{index}")).await;
        }

        let batch = queue
            .receive_messages("inbound", 50, Duration::from_secs(30))
            .await
            .unwrap_or_default();
        assert_eq!(batch.len(), 10);
        assert_eq!(batch[0].body(), "granule-0");
    }
}
