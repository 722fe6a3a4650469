use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cirrus_core::AppResult;
use cirrus_domain::{ExecutionDescriptor, ExecutionStatus};

/// Handle returned after a successful start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedExecution {
    /// Service-assigned execution identifier.
    pub execution_id: String,
    /// Start timestamp reported by the service.
    pub started_at: DateTime<Utc>,
}

/// Port for the external workflow-execution service.
#[async_trait]
pub trait WorkflowExecutionService: Send + Sync {
    /// Starts one execution by name.
    ///
    /// A name collision must surface as `AppError::ExecutionAlreadyExists`.
    async fn start_execution(&self, descriptor: &ExecutionDescriptor)
    -> AppResult<StartedExecution>;

    /// Counts executions of `target_workflow` that are currently running.
    async fn count_running_executions(&self, target_workflow: &str) -> AppResult<u64>;

    /// Returns the lifecycle status of one execution.
    async fn describe_execution(&self, execution_id: &str) -> AppResult<ExecutionStatus>;
}
