use std::time::Duration;

use cirrus_core::{AppError, AppResult};

/// Tuning for one queue consumer invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueConsumerConfig {
    /// Queues drained round-robin with equal share.
    pub queue_ids: Vec<String>,
    /// Wall-clock budget for one `consume` call.
    pub time_limit: Duration,
    /// Global dispatch rate across all queues; `None` dispatches unpaced.
    pub rate_limit_per_second: Option<u32>,
    /// Stop after receiving this many messages (bounded variant).
    pub message_limit: Option<usize>,
    /// How long received messages stay hidden from other consumers.
    pub visibility_timeout: Duration,
    /// Time kept in reserve before the invocation's hard deadline.
    pub safety_margin: Duration,
    /// Pause after an empty round in rate-limited mode.
    pub idle_poll_interval: Duration,
    /// Delete messages from the queue once handled.
    pub delete_processed_messages: bool,
}

impl QueueConsumerConfig {
    /// Creates a bounded consumer config for one queue.
    #[must_use]
    pub fn bounded(queue_id: impl Into<String>, message_limit: usize, time_limit: Duration) -> Self {
        Self {
            queue_ids: vec![queue_id.into()],
            time_limit,
            rate_limit_per_second: None,
            message_limit: Some(message_limit),
            ..Self::default()
        }
    }

    /// Creates a rate-limited consumer config over several queues.
    #[must_use]
    pub fn rate_limited(
        queue_ids: Vec<String>,
        rate_limit_per_second: u32,
        time_limit: Duration,
    ) -> Self {
        Self {
            queue_ids,
            time_limit,
            rate_limit_per_second: Some(rate_limit_per_second),
            message_limit: None,
            ..Self::default()
        }
    }

    pub(crate) fn validate(&self) -> AppResult<()> {
        if self.queue_ids.is_empty() {
            return Err(AppError::Validation(
                "queue consumer needs at least one queue".to_owned(),
            ));
        }

        if self.queue_ids.iter().any(|queue_id| queue_id.trim().is_empty()) {
            return Err(AppError::Validation(
                "queue consumer queue ids must not be empty".to_owned(),
            ));
        }

        if self.rate_limit_per_second == Some(0) {
            return Err(AppError::Validation(
                "rate_limit_per_second must be greater than zero".to_owned(),
            ));
        }

        if self.message_limit == Some(0) {
            return Err(AppError::Validation(
                "message_limit must be greater than zero".to_owned(),
            ));
        }

        if self.visibility_timeout.is_zero() {
            return Err(AppError::Validation(
                "visibility_timeout must be greater than zero".to_owned(),
            ));
        }

        Ok(())
    }

    pub(crate) fn dispatch_interval(&self) -> Option<Duration> {
        self.rate_limit_per_second
            .map(|rate| Duration::from_secs(1) / rate)
    }
}

impl Default for QueueConsumerConfig {
    fn default() -> Self {
        Self {
            queue_ids: Vec::new(),
            time_limit: Duration::from_secs(240),
            rate_limit_per_second: None,
            message_limit: None,
            visibility_timeout: Duration::from_secs(300),
            safety_margin: Duration::from_secs(5),
            idle_poll_interval: Duration::from_secs(1),
            delete_processed_messages: true,
        }
    }
}
