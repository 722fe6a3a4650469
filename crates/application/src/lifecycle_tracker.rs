use std::sync::Arc;

use async_trait::async_trait;
use cirrus_core::{AppError, AppResult};
use cirrus_domain::{ExecutionStatus, PriorityLimit, QueueMessage, WorkflowStatusEvent};
use tracing::{debug, info, warn};

use crate::SemaphoreService;
use crate::coordination_ports::{MessageHandler, WorkflowExecutionService};

/// Priority class bound to the workflow whose executions it counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityClass {
    /// Semaphore key and ceiling of the class.
    pub limit: PriorityLimit,
    /// Workflow whose running executions belong to the class.
    pub target_workflow: String,
}

/// Keeps priority semaphores in step with workflow status notifications.
#[derive(Clone)]
pub struct PriorityLifecycleTracker {
    semaphores: SemaphoreService,
    executions: Arc<dyn WorkflowExecutionService>,
    increment_on_running: bool,
}

impl PriorityLifecycleTracker {
    /// Creates a tracker that counts running notifications itself.
    #[must_use]
    pub fn new(semaphores: SemaphoreService, executions: Arc<dyn WorkflowExecutionService>) -> Self {
        Self {
            semaphores,
            executions,
            increment_on_running: true,
        }
    }

    /// Skips the increment on running notifications.
    ///
    /// Use this when executions are started through
    /// [`crate::ExecutionStarter::increment_and_start`], which already
    /// reserved the slot.
    #[must_use]
    pub fn without_running_increment(mut self) -> Self {
        self.increment_on_running = false;
        self
    }

    /// Applies one status notification to its priority semaphore.
    pub async fn handle(&self, event: &WorkflowStatusEvent) -> AppResult<()> {
        let Some(priority) = &event.priority else {
            debug!(
                execution_name = %event.execution_name,
                status = event.status.as_str(),
                "status event without priority class, skipping"
            );
            return Ok(());
        };

        match event.status {
            ExecutionStatus::Running if !self.increment_on_running => Ok(()),
            ExecutionStatus::Running => {
                match self
                    .semaphores
                    .up(priority.key.as_str(), priority.max_executions)
                    .await
                {
                    Ok(_) => Ok(()),
                    Err(AppError::CapacityExceeded(message)) => {
                        warn!(
                            execution_name = %event.execution_name,
                            semaphore = %priority.key,
                            message = %message,
                            "execution running beyond its priority ceiling"
                        );
                        Ok(())
                    }
                    Err(error) => Err(error),
                }
            }
            _ => self
                .semaphores
                .down(priority.key.as_str())
                .await
                .map(|_| ()),
        }
    }

    /// Overwrites the class semaphore with the live running count and returns it.
    pub async fn reconcile(&self, class: &PriorityClass) -> AppResult<u64> {
        let running = self
            .executions
            .count_running_executions(class.target_workflow.as_str())
            .await?;
        let recorded = self.semaphores.get(class.limit.key.as_str()).await?.value();

        self.semaphores
            .reconcile(class.limit.key.as_str(), running)
            .await?;

        if recorded != running {
            info!(
                semaphore = %class.limit.key,
                recorded,
                running,
                "priority semaphore drift repaired"
            );
        }
        if running > class.limit.max_executions {
            warn!(
                semaphore = %class.limit.key,
                running,
                max = class.limit.max_executions,
                "running executions exceed priority ceiling"
            );
        }

        Ok(running)
    }
}

#[async_trait]
impl MessageHandler for PriorityLifecycleTracker {
    async fn handle_message(&self, queue_id: &str, message: &QueueMessage) -> AppResult<()> {
        let event = WorkflowStatusEvent::from_message_body(message.body())?;
        debug!(
            queue_id = %queue_id,
            execution_name = %event.execution_name,
            status = event.status.as_str(),
            "status event received"
        );
        self.handle(&event).await
    }
}
