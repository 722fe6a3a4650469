use std::time::Duration;

use async_trait::async_trait;
use cirrus_core::AppResult;
use cirrus_domain::QueueMessage;
use tokio::time::Instant;

/// Per-message callback supplied to queue consumers.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Processes one message received from `queue_id`.
    async fn handle_message(&self, queue_id: &str, message: &QueueMessage) -> AppResult<()>;
}

/// Remaining-time probe for an externally imposed deadline.
pub trait InvocationDeadline: Send + Sync {
    /// Returns the time left before the hard deadline.
    fn remaining(&self) -> Duration;
}

/// Deadline fixed at construction time.
#[derive(Debug, Clone, Copy)]
pub struct FixedDeadline {
    deadline: Instant,
}

impl FixedDeadline {
    /// Creates a deadline `budget` from now.
    #[must_use]
    pub fn after(budget: Duration) -> Self {
        Self {
            deadline: Instant::now() + budget,
        }
    }
}

impl InvocationDeadline for FixedDeadline {
    fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}
