use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use cirrus_application::{StartedExecution, WorkflowExecutionService};
use cirrus_core::{AppError, AppResult};
use cirrus_domain::{ExecutionDescriptor, ExecutionStatus};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct ExecutionEntry {
    target_workflow: String,
    descriptor: ExecutionDescriptor,
    status: ExecutionStatus,
}

/// In-memory workflow execution service.
///
/// Execution ids have the form `<target_workflow>:<name>`. Executions stay
/// running until [`Self::finish`] moves them to a terminal status.
#[derive(Default)]
pub struct InMemoryWorkflowExecutionService {
    executions: RwLock<HashMap<String, ExecutionEntry>>,
}

impl InMemoryWorkflowExecutionService {
    /// Creates a service with no executions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves one execution to `status`.
    pub async fn finish(&self, execution_id: &str, status: ExecutionStatus) -> AppResult<()> {
        let mut executions = self.executions.write().await;
        let entry = executions.get_mut(execution_id).ok_or_else(|| {
            AppError::NotFound(format!("execution '{execution_id}' does not exist"))
        })?;
        entry.status = status;
        Ok(())
    }

    /// Returns the descriptor an execution was started with.
    pub async fn descriptor(&self, execution_id: &str) -> Option<ExecutionDescriptor> {
        self.executions
            .read()
            .await
            .get(execution_id)
            .map(|entry| entry.descriptor.clone())
    }
}

#[async_trait]
impl WorkflowExecutionService for InMemoryWorkflowExecutionService {
    async fn start_execution(
        &self,
        descriptor: &ExecutionDescriptor,
    ) -> AppResult<StartedExecution> {
        let execution_id = format!("{}:{}", descriptor.target_workflow(), descriptor.name());
        let mut executions = self.executions.write().await;
        if executions.contains_key(&execution_id) {
            return Err(AppError::ExecutionAlreadyExists(format!(
                "execution '{}' already exists for {}",
                descriptor.name(),
                descriptor.target_workflow()
            )));
        }

        executions.insert(
            execution_id.clone(),
            ExecutionEntry {
                target_workflow: descriptor.target_workflow().to_owned(),
                descriptor: descriptor.clone(),
                status: ExecutionStatus::Running,
            },
        );

        Ok(StartedExecution {
            execution_id,
            started_at: Utc::now(),
        })
    }

    async fn count_running_executions(&self, target_workflow: &str) -> AppResult<u64> {
        let running = self
            .executions
            .read()
            .await
            .values()
            .filter(|entry| {
                entry.target_workflow == target_workflow && !entry.status.is_terminal()
            })
            .count();
        Ok(u64::try_from(running).unwrap_or(u64::MAX))
    }

    async fn describe_execution(&self, execution_id: &str) -> AppResult<ExecutionStatus> {
        self.executions
            .read()
            .await
            .get(execution_id)
            .map(|entry| entry.status)
            .ok_or_else(|| AppError::NotFound(format!("execution '{execution_id}' does not exist")))
    }
}
