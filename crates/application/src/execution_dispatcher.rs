use std::sync::Arc;
use std::time::Duration;

use cirrus_core::{AppError, AppResult};
use cirrus_domain::{MAX_RECEIVE_MESSAGES, QueueMessage, StartRequest};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::ExecutionStarter;
use crate::coordination_ports::{MessageQueue, WorkflowExecutionService};


/// Backlog dispatcher settings for one target workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottledDispatcherConfig {
    /// Workflow whose running executions are throttled.
    pub target_workflow: String,
    /// Queue holding start requests waiting for capacity.
    pub backlog_queue_id: String,
    /// Ceiling on concurrently running executions of the target.
    pub max_concurrent_executions: u64,
    /// Delay before the next pass after one that started work.
    pub busy_delay: Duration,
    /// Delay before the next pass after an idle or failed one.
    pub idle_delay: Duration,
    /// Visibility timeout applied to received backlog messages.
    pub visibility_timeout: Duration,
}

impl ThrottledDispatcherConfig {
    /// Creates a config with the default pass delays.
    #[must_use]
    pub fn new(
        target_workflow: impl Into<String>,
        backlog_queue_id: impl Into<String>,
        max_concurrent_executions: u64,
    ) -> Self {
        Self {
            target_workflow: target_workflow.into(),
            backlog_queue_id: backlog_queue_id.into(),
            max_concurrent_executions,
            busy_delay: Duration::from_secs(1),
            idle_delay: Duration::from_secs(5),
            visibility_timeout: Duration::from_secs(300),
        }
    }

    fn validate(&self) -> AppResult<()> {
        if self.target_workflow.trim().is_empty() || self.backlog_queue_id.trim().is_empty() {
            return Err(AppError::Validation(
                "dispatcher requires a target workflow and a backlog queue".to_owned(),
            ));
        }

        if self.max_concurrent_executions == 0 {
            return Err(AppError::Validation(
                "max concurrent executions must be greater than zero".to_owned(),
            ));
        }

        Ok(())
    }
}

/// Moves backlog messages into running executions without exceeding a ceiling.
#[derive(Clone)]
pub struct ThrottledExecutionDispatcher {
    executions: Arc<dyn WorkflowExecutionService>,
    queue: Arc<dyn MessageQueue>,
    starter: ExecutionStarter,
    config: ThrottledDispatcherConfig,
}

impl ThrottledExecutionDispatcher {
    /// Creates a dispatcher.
    pub fn new(
        executions: Arc<dyn WorkflowExecutionService>,
        queue: Arc<dyn MessageQueue>,
        starter: ExecutionStarter,
        config: ThrottledDispatcherConfig,
    ) -> AppResult<Self> {
        config.validate()?;
        Ok(Self {
            executions,
            queue,
            starter,
            config,
        })
    }

    /// Runs one pass and returns how many backlog messages were started.
    pub async fn run_once(&self) -> AppResult<usize> {
        let running = self
            .executions
            .count_running_executions(self.config.target_workflow.as_str())
            .await?;
        let capacity = self.config.max_concurrent_executions.saturating_sub(running);
        if capacity == 0 {
            debug!(
                target_workflow = %self.config.target_workflow,
                running,
                max = self.config.max_concurrent_executions,
                "target workflow at capacity"
            );
            return Ok(0);
        }

        let batch_size = usize::try_from(capacity)
            .unwrap_or(usize::MAX)
            .min(MAX_RECEIVE_MESSAGES);
        let messages = self
            .queue
            .receive_messages(
                self.config.backlog_queue_id.as_str(),
                batch_size,
                self.config.visibility_timeout,
            )
            .await?;

        let mut started = 0;
        for message in &messages {
            match self.start_backlog_message(message).await {
                Ok(()) => started += 1,
                Err(error) => {
                    warn!(
                        message_id = %message.message_id(),
                        error = %error,
                        "backlog message not dispatched"
                    );
                }
            }
        }

        if started > 0 {
            info!(
                target_workflow = %self.config.target_workflow,
                running,
                started,
                "backlog executions dispatched"
            );
        }

        Ok(started)
    }

    /// Repeats [`Self::run_once`] until `shutdown` flips to true or its sender drops.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            target_workflow = %self.config.target_workflow,
            backlog_queue_id = %self.config.backlog_queue_id,
            max = self.config.max_concurrent_executions,
            "throttled dispatcher started"
        );

        while !*shutdown.borrow() {
            let delay = match self.run_once().await {
                Ok(started) if started > 0 => self.config.busy_delay,
                Ok(_) => self.config.idle_delay,
                Err(error) => {
                    warn!(error = %error, "dispatcher pass failed");
                    self.config.idle_delay
                }
            };

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(
            target_workflow = %self.config.target_workflow,
            "throttled dispatcher stopped"
        );
    }

    async fn start_backlog_message(&self, message: &QueueMessage) -> AppResult<()> {
        let request = StartRequest::from_message_body(message.body())?;
        if request.target_workflow != self.config.target_workflow {
            return Err(AppError::Validation(format!(
                "backlog message targets '{}' instead of '{}'",
                request.target_workflow, self.config.target_workflow
            )));
        }

        match self
            .starter
            .start_request(self.config.backlog_queue_id.as_str(), &request)
            .await
        {
            Ok(_) => {}
            Err(error) if error.is_execution_already_exists() => {
                info!(
                    message_id = %message.message_id(),
                    execution_name = %request.execution_name,
                    "backlog execution already exists"
                );
            }
            Err(error) => return Err(error),
        }

        self.queue
            .delete_message(
                self.config.backlog_queue_id.as_str(),
                message.receipt_handle(),
            )
            .await
    }
}
