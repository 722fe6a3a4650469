use cirrus_core::{AppError, AppResult, NonEmptyString};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::PriorityLimit;

/// Longest execution name accepted by the workflow service.
pub const EXECUTION_NAME_MAX_LENGTH: usize = 80;

/// Start request for one workflow execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionDescriptor {
    target_workflow: NonEmptyString,
    name: NonEmptyString,
    input: Value,
}

impl ExecutionDescriptor {
    /// Creates a validated descriptor.
    pub fn new(
        target_workflow: impl Into<String>,
        name: impl Into<String>,
        input: Value,
    ) -> AppResult<Self> {
        let target_workflow = NonEmptyString::new(target_workflow)?;
        let name = NonEmptyString::new(name)?;

        if name.as_str().chars().count() > EXECUTION_NAME_MAX_LENGTH {
            return Err(AppError::Validation(format!(
                "execution name '{name}' exceeds {EXECUTION_NAME_MAX_LENGTH} characters"
            )));
        }

        if name
            .as_str()
            .chars()
            .any(|character| character.is_whitespace() || character.is_control())
        {
            return Err(AppError::Validation(format!(
                "execution name '{name}' must not contain whitespace or control characters"
            )));
        }

        Ok(Self {
            target_workflow,
            name,
            input,
        })
    }

    /// Returns the target workflow identifier.
    #[must_use]
    pub fn target_workflow(&self) -> &str {
        self.target_workflow.as_str()
    }

    /// Returns the execution name, unique per target workflow.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Returns the execution input document.
    #[must_use]
    pub fn input(&self) -> &Value {
        &self.input
    }

    /// Returns a mutable handle on the execution input document.
    pub fn input_mut(&mut self) -> &mut Value {
        &mut self.input
    }
}

/// Workflow execution lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Execution is in progress.
    Running,
    /// Execution finished successfully.
    Completed,
    /// Execution failed.
    Failed,
    /// Execution was stopped by an operator.
    Aborted,
    /// Execution exceeded its timeout.
    TimedOut,
}

impl ExecutionStatus {
    /// Returns stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
            Self::TimedOut => "timed_out",
        }
    }

    /// Parses storage or service values.
    pub fn parse(value: &str) -> AppResult<Self> {
        match value.to_ascii_lowercase().as_str() {
            "running" => Ok(Self::Running),
            "completed" | "succeeded" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "aborted" => Ok(Self::Aborted),
            "timed_out" => Ok(Self::TimedOut),
            _ => Err(AppError::Validation(format!(
                "unknown execution status '{value}'"
            ))),
        }
    }

    /// Returns true once the execution no longer holds a concurrency slot.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Inbound queue message asking for one workflow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartRequest {
    /// Target workflow identifier.
    pub target_workflow: String,
    /// Execution name used for idempotent retries.
    pub execution_name: String,
    /// Execution input document.
    #[serde(default)]
    pub input: Value,
    /// Optional priority class the execution counts against.
    #[serde(default)]
    pub priority: Option<PriorityLimit>,
}

impl StartRequest {
    /// Parses a start request from a queue message body.
    pub fn from_message_body(body: &str) -> AppResult<Self> {
        serde_json::from_str(body)
            .map_err(|error| AppError::Validation(format!("invalid start request body: {error}")))
    }

    /// Serializes the request into a queue message body.
    pub fn to_message_body(&self) -> AppResult<String> {
        serde_json::to_string(self)
            .map_err(|error| AppError::Internal(format!("failed to encode start request: {error}")))
    }

    /// Builds the execution descriptor for this request.
    pub fn descriptor(&self) -> AppResult<ExecutionDescriptor> {
        ExecutionDescriptor::new(
            self.target_workflow.as_str(),
            self.execution_name.as_str(),
            self.input.clone(),
        )
    }
}

/// Workflow status notification emitted by the execution service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStatusEvent {
    /// Execution name the event refers to.
    pub execution_name: String,
    /// New lifecycle status.
    pub status: ExecutionStatus,
    /// Priority class of the execution, when it has one.
    #[serde(default)]
    pub priority: Option<PriorityLimit>,
}

impl WorkflowStatusEvent {
    /// Parses a status notification from a queue message body.
    pub fn from_message_body(body: &str) -> AppResult<Self> {
        serde_json::from_str(body)
            .map_err(|error| AppError::Validation(format!("invalid status event body: {error}")))
    }
}
