use std::time::Duration;

use async_trait::async_trait;
use cirrus_core::AppResult;
use cirrus_domain::QueueMessage;

/// Message queue port with queue-enforced visibility timeouts.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Receives up to `max_messages` (at most ten) and hides them for `visibility_timeout`.
    async fn receive_messages(
        &self,
        queue_id: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> AppResult<Vec<QueueMessage>>;

    /// Deletes one received message by receipt handle.
    async fn delete_message(&self, queue_id: &str, receipt_handle: &str) -> AppResult<()>;
}
