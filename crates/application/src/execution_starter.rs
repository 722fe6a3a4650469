use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use cirrus_core::{AppError, AppResult};
use cirrus_domain::{ExecutionDescriptor, QueueMessage, StartRequest};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::SemaphoreService;
use crate::coordination_ports::{MessageHandler, StartedExecution, WorkflowExecutionService};


/// One record delivered by an event-source mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMappingRecord {
    /// Queue the record was delivered from.
    pub queue_id: String,
    /// Delivered message.
    pub message: QueueMessage,
}

/// Item that must be redelivered by the event-source mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchItemFailure {
    /// Message id of the failed record.
    #[serde(rename = "itemIdentifier")]
    pub item_identifier: String,
}

/// Partial batch response understood by event-source mappings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchResponse {
    /// Records that failed and must be retried.
    #[serde(rename = "batchItemFailures")]
    pub batch_item_failures: Vec<BatchItemFailure>,
}

/// Starts workflow executions described by inbound queue messages.
#[derive(Clone)]
pub struct ExecutionStarter {
    executions: Arc<dyn WorkflowExecutionService>,
    semaphores: SemaphoreService,
    priority_slots: bool,
}

impl ExecutionStarter {
    /// Creates an execution starter.
    #[must_use]
    pub fn new(executions: Arc<dyn WorkflowExecutionService>, semaphores: SemaphoreService) -> Self {
        Self {
            executions,
            semaphores,
            priority_slots: true,
        }
    }

    /// Refuses requests that carry a priority class.
    ///
    /// Use this when no status notifications reach a
    /// [`crate::PriorityLifecycleTracker`], since nothing would return the
    /// reserved slots.
    #[must_use]
    pub fn without_priority_slots(mut self) -> Self {
        self.priority_slots = false;
        self
    }

    /// Starts the execution described by one message.
    pub async fn dispatch(
        &self,
        queue_id: &str,
        message: &QueueMessage,
    ) -> AppResult<StartedExecution> {
        let request = StartRequest::from_message_body(message.body())?;
        self.start_request(queue_id, &request).await
    }

    /// Starts one parsed request, stamping start time and source queue into its input.
    pub async fn start_request(
        &self,
        queue_id: &str,
        request: &StartRequest,
    ) -> AppResult<StartedExecution> {
        let mut descriptor = request.descriptor()?;
        stamp_dispatch_metadata(&mut descriptor, queue_id)?;

        let started = self.executions.start_execution(&descriptor).await?;
        info!(
            queue_id = %queue_id,
            target_workflow = %descriptor.target_workflow(),
            execution_name = %descriptor.name(),
            execution_id = %started.execution_id,
            "workflow execution started"
        );
        Ok(started)
    }

    /// Parses one message and starts it through [`Self::increment_and_start`].
    pub async fn increment_and_dispatch(
        &self,
        queue_id: &str,
        message: &QueueMessage,
    ) -> AppResult<StartedExecution> {
        let request = StartRequest::from_message_body(message.body())?;
        self.increment_and_start(queue_id, &request).await
    }

    /// Reserves a priority slot, starts the execution, and gives the slot back if the start fails.
    pub async fn increment_and_start(
        &self,
        queue_id: &str,
        request: &StartRequest,
    ) -> AppResult<StartedExecution> {
        let Some(priority) = &request.priority else {
            return Err(AppError::Validation(format!(
                "execution '{}' carries no priority class",
                request.execution_name
            )));
        };

        if !self.priority_slots {
            return Err(AppError::Validation(format!(
                "execution '{}' asks for priority class '{}' but no status source returns its slots",
                request.execution_name, priority.key
            )));
        }

        self.semaphores
            .up(priority.key.as_str(), priority.max_executions)
            .await?;

        match self.start_request(queue_id, request).await {
            Ok(started) => Ok(started),
            Err(error) => {
                if let Err(down_error) = self.semaphores.down(priority.key.as_str()).await {
                    warn!(
                        semaphore = %priority.key,
                        error = %down_error,
                        "failed to return priority slot after start failure"
                    );
                }
                Err(error)
            }
        }
    }

    /// Dispatches every record and reports the ones that need redelivery.
    ///
    /// Records rejected because their execution already exists are not retried.
    pub async fn process_batch(&self, records: &[SourceMappingRecord]) -> BatchResponse {
        let mut response = BatchResponse::default();

        for record in records {
            match self.dispatch(record.queue_id.as_str(), &record.message).await {
                Ok(_) => {}
                Err(error) if error.is_execution_already_exists() => {
                    info!(
                        message_id = %record.message.message_id(),
                        "execution already exists, dropping record"
                    );
                }
                Err(error) => {
                    warn!(
                        message_id = %record.message.message_id(),
                        error = %error,
                        "record dispatch failed"
                    );
                    response.batch_item_failures.push(BatchItemFailure {
                        item_identifier: record.message.message_id().to_owned(),
                    });
                }
            }
        }

        response
    }
}

#[async_trait]
impl MessageHandler for ExecutionStarter {
    async fn handle_message(&self, queue_id: &str, message: &QueueMessage) -> AppResult<()> {
        let request = StartRequest::from_message_body(message.body())?;
        if request.priority.is_some() {
            self.increment_and_start(queue_id, &request).await?;
        } else {
            self.start_request(queue_id, &request).await?;
        }
        Ok(())
    }
}

fn stamp_dispatch_metadata(descriptor: &mut ExecutionDescriptor, queue_id: &str) -> AppResult<()> {
    let input = descriptor.input_mut();
    if input.is_null() {
        *input = Value::Object(Map::new());
    }

    let Some(document) = input.as_object_mut() else {
        return Err(AppError::Validation(
            "execution input must be a JSON object".to_owned(),
        ));
    };

    let meta = document
        .entry("cumulus_meta")
        .or_insert_with(|| Value::Object(Map::new()));
    let Some(meta) = meta.as_object_mut() else {
        return Err(AppError::Validation(
            "execution input cumulus_meta must be a JSON object".to_owned(),
        ));
    };

    meta.insert(
        "workflow_start_time".to_owned(),
        json!(Utc::now().timestamp_millis()),
    );
    meta.insert("queue_url".to_owned(), json!(queue_id));
    Ok(())
}
