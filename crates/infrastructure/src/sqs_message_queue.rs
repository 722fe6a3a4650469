//! SQS-backed message queue.

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_sqs::error::DisplayErrorContext;
use cirrus_application::MessageQueue;
use cirrus_core::{AppError, AppResult};
use cirrus_domain::{MAX_RECEIVE_MESSAGES, QueueMessage};
use tracing::warn;

/// SQS implementation of the message queue port; queue ids are queue URLs.
#[derive(Clone)]
pub struct SqsMessageQueue {
    client: aws_sdk_sqs::Client,
}

impl SqsMessageQueue {
    /// Creates a queue adapter.
    #[must_use]
    pub fn new(client: aws_sdk_sqs::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MessageQueue for SqsMessageQueue {
    async fn receive_messages(
        &self,
        queue_id: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> AppResult<Vec<QueueMessage>> {
        let max_messages = i32::try_from(max_messages.clamp(1, MAX_RECEIVE_MESSAGES))
            .map_err(|error| AppError::Validation(format!("invalid receive size: {error}")))?;
        let visibility_timeout = i32::try_from(visibility_timeout.as_secs()).map_err(|error| {
            AppError::Validation(format!("invalid visibility timeout: {error}"))
        })?;

        let response = self
            .client
            .receive_message()
            .queue_url(queue_id)
            .max_number_of_messages(max_messages)
            .visibility_timeout(visibility_timeout)
            .wait_time_seconds(0)
            .send()
            .await
            .map_err(|error| {
                AppError::Internal(format!(
                    "failed to receive from {queue_id}: {}",
                    DisplayErrorContext(&error)
                ))
            })?;

        let mut messages = Vec::new();
        for message in response.messages() {
            let (Some(message_id), Some(receipt_handle)) =
                (message.message_id(), message.receipt_handle())
            else {
                warn!(queue_id = %queue_id, "sqs message without id or receipt handle");
                continue;
            };

            messages.push(QueueMessage::new(
                message_id,
                message.body().unwrap_or_default(),
                receipt_handle,
            )?);
        }

        Ok(messages)
    }

    async fn delete_message(&self, queue_id: &str, receipt_handle: &str) -> AppResult<()> {
        self.client
            .delete_message()
            .queue_url(queue_id)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|error| {
                AppError::Internal(format!(
                    "failed to delete message from {queue_id}: {}",
                    DisplayErrorContext(&error)
                ))
            })?;

        Ok(())
    }
}
