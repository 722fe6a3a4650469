use std::sync::Arc;

use cirrus_core::AppResult;
use cirrus_domain::{MAX_RECEIVE_MESSAGES, QueueMessage, archived_message_key};
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, info, warn};

use crate::coordination_ports::{InvocationDeadline, MessageHandler, MessageQueue, ObjectStore};

mod config;
#[cfg(test)]
mod tests;

pub use config::QueueConsumerConfig;

#[derive(Clone)]
struct ArchiveCleanup {
    object_store: Arc<dyn ObjectStore>,
    prefix: String,
}

/// Time-boxed, rate-limited drain of one or more queues.
///
/// Handler failures leave the message in place so it reappears after the
/// visibility timeout; only receive errors abort a `consume` call.
#[derive(Clone)]
pub struct RateLimitedQueueConsumer {
    queue: Arc<dyn MessageQueue>,
    deadline: Arc<dyn InvocationDeadline>,
    archive: Option<ArchiveCleanup>,
    config: QueueConsumerConfig,
}

impl RateLimitedQueueConsumer {
    /// Creates a consumer bound to one invocation deadline.
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        deadline: Arc<dyn InvocationDeadline>,
        config: QueueConsumerConfig,
    ) -> AppResult<Self> {
        config.validate()?;
        Ok(Self {
            queue,
            deadline,
            archive: None,
            config,
        })
    }

    /// Also deletes each processed message's archived copy under `prefix`.
    #[must_use]
    pub fn with_archive_cleanup(
        mut self,
        object_store: Arc<dyn ObjectStore>,
        prefix: impl Into<String>,
    ) -> Self {
        self.archive = Some(ArchiveCleanup {
            object_store,
            prefix: prefix.into(),
        });
        self
    }

    /// Drains the configured queues and returns how many messages were processed.
    pub async fn consume(&self, handler: &dyn MessageHandler) -> AppResult<usize> {
        let started_at = Instant::now();
        let dispatch_interval = self.config.dispatch_interval();
        let mut next_dispatch_at = started_at;
        let mut received = 0_usize;
        let mut processed = 0_usize;

        'rounds: loop {
            let mut round_received = 0_usize;

            for queue_id in &self.config.queue_ids {
                if !self.has_time_left(started_at) {
                    break 'rounds;
                }

                let batch_size = self.next_batch_size(received);
                if batch_size == 0 {
                    break 'rounds;
                }

                let messages = self
                    .queue
                    .receive_messages(queue_id, batch_size, self.config.visibility_timeout)
                    .await?;
                round_received += messages.len();
                received += messages.len();

                for message in messages {
                    if let Some(interval) = dispatch_interval {
                        sleep_until(next_dispatch_at).await;
                        next_dispatch_at = next_dispatch_at.max(Instant::now()) + interval;
                    }

                    if !self.has_time_left(started_at) {
                        debug!(
                            queue_id = %queue_id,
                            message_id = %message.message_id(),
                            "time budget spent, leaving message for visibility expiry"
                        );
                        break 'rounds;
                    }

                    if self.process_message(queue_id, &message, handler).await {
                        processed += 1;
                    }
                }
            }

            if round_received == 0 {
                if self.config.rate_limit_per_second.is_none() {
                    break;
                }

                let idle = self
                    .config
                    .idle_poll_interval
                    .min(self.time_left(started_at));
                sleep(idle).await;
            }
        }

        info!(
            queues = self.config.queue_ids.len(),
            received,
            processed,
            elapsed_ms = u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX),
            "queue consumption finished"
        );

        Ok(processed)
    }

    async fn process_message(
        &self,
        queue_id: &str,
        message: &QueueMessage,
        handler: &dyn MessageHandler,
    ) -> bool {
        match handler.handle_message(queue_id, message).await {
            Ok(()) => {}
            Err(error) if error.is_execution_already_exists() => {
                info!(
                    queue_id = %queue_id,
                    message_id = %message.message_id(),
                    error = %error,
                    "execution already exists, treating message as processed"
                );
            }
            Err(error) => {
                warn!(
                    queue_id = %queue_id,
                    message_id = %message.message_id(),
                    error = %error,
                    "message handler failed, message will become visible again"
                );
                return false;
            }
        }

        if self.config.delete_processed_messages {
            if let Err(error) = self
                .queue
                .delete_message(queue_id, message.receipt_handle())
                .await
            {
                warn!(
                    queue_id = %queue_id,
                    message_id = %message.message_id(),
                    error = %error,
                    "failed to delete processed message"
                );
                return false;
            }
        }

        if let Some(archive) = &self.archive {
            let key = archived_message_key(
                archive.prefix.as_str(),
                queue_id,
                message.message_id(),
            );
            if let Err(error) = archive.object_store.delete_object(key.as_str()).await {
                warn!(
                    key = %key,
                    error = %error,
                    "failed to delete archived message copy"
                );
            }
        }

        true
    }

    fn next_batch_size(&self, received: usize) -> usize {
        match self.config.message_limit {
            Some(limit) => limit.saturating_sub(received).min(MAX_RECEIVE_MESSAGES),
            None => MAX_RECEIVE_MESSAGES,
        }
    }

    fn time_left(&self, started_at: Instant) -> std::time::Duration {
        let budget_left = self.config.time_limit.saturating_sub(started_at.elapsed());
        let deadline_left = self
            .deadline
            .remaining()
            .saturating_sub(self.config.safety_margin);
        budget_left.min(deadline_left)
    }

    fn has_time_left(&self, started_at: Instant) -> bool {
        !self.time_left(started_at).is_zero()
    }
}
