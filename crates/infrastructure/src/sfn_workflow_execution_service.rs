//! Step Functions-backed workflow execution service.

use async_trait::async_trait;
use aws_sdk_sfn::error::DisplayErrorContext;
use aws_sdk_sfn::types::ExecutionStatus as SfnExecutionStatus;
use chrono::{DateTime, Utc};
use cirrus_application::{StartedExecution, WorkflowExecutionService};
use cirrus_core::{AppError, AppResult};
use cirrus_domain::{ExecutionDescriptor, ExecutionStatus};

/// Step Functions implementation of the workflow execution port.
///
/// Target workflows are state machine ARNs and execution ids are execution ARNs.
#[derive(Clone)]
pub struct SfnWorkflowExecutionService {
    client: aws_sdk_sfn::Client,
}

impl SfnWorkflowExecutionService {
    /// Creates an execution service adapter.
    #[must_use]
    pub fn new(client: aws_sdk_sfn::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WorkflowExecutionService for SfnWorkflowExecutionService {
    async fn start_execution(
        &self,
        descriptor: &ExecutionDescriptor,
    ) -> AppResult<StartedExecution> {
        let input = serde_json::to_string(descriptor.input()).map_err(|error| {
            AppError::Internal(format!("failed to encode execution input: {error}"))
        })?;

        let response = self
            .client
            .start_execution()
            .state_machine_arn(descriptor.target_workflow())
            .name(descriptor.name())
            .input(input)
            .send()
            .await
            .map_err(|error| {
                if error
                    .as_service_error()
                    .is_some_and(|service_error| service_error.is_execution_already_exists())
                {
                    return AppError::ExecutionAlreadyExists(format!(
                        "execution '{}' already exists for {}",
                        descriptor.name(),
                        descriptor.target_workflow()
                    ));
                }

                AppError::Internal(format!(
                    "failed to start execution '{}': {}",
                    descriptor.name(),
                    DisplayErrorContext(&error)
                ))
            })?;

        let started_at = DateTime::from_timestamp(
            response.start_date().secs(),
            response.start_date().subsec_nanos(),
        )
        .unwrap_or_else(Utc::now);

        Ok(StartedExecution {
            execution_id: response.execution_arn().to_owned(),
            started_at,
        })
    }

    async fn count_running_executions(&self, target_workflow: &str) -> AppResult<u64> {
        let mut running = 0_u64;
        let mut next_token: Option<String> = None;

        loop {
            let response = self
                .client
                .list_executions()
                .state_machine_arn(target_workflow)
                .status_filter(SfnExecutionStatus::Running)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|error| {
                    AppError::Internal(format!(
                        "failed to list running executions of {target_workflow}: {}",
                        DisplayErrorContext(&error)
                    ))
                })?;

            running += u64::try_from(response.executions().len()).unwrap_or(u64::MAX);

            match response.next_token() {
                Some(token) => next_token = Some(token.to_owned()),
                None => break,
            }
        }

        Ok(running)
    }

    async fn describe_execution(&self, execution_id: &str) -> AppResult<ExecutionStatus> {
        let response = self
            .client
            .describe_execution()
            .execution_arn(execution_id)
            .send()
            .await
            .map_err(|error| {
                if error
                    .as_service_error()
                    .is_some_and(|service_error| service_error.is_execution_does_not_exist())
                {
                    return AppError::NotFound(format!("execution '{execution_id}' does not exist"));
                }

                AppError::Internal(format!(
                    "failed to describe execution '{execution_id}': {}",
                    DisplayErrorContext(&error)
                ))
            })?;

        match response.status() {
            SfnExecutionStatus::PendingRedrive => Ok(ExecutionStatus::Failed),
            status => ExecutionStatus::parse(status.as_str()),
        }
    }
}
