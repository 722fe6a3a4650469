//! Shared primitives for all Rust crates in Cirrus.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used across Cirrus crates.
pub type AppResult<T> = Result<T, AppError>;

/// A validated non-empty UTF-8 string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NonEmptyString(String);

impl NonEmptyString {
    /// Creates a validated non-empty string.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(AppError::Validation(
                "value must not be empty or whitespace".to_owned(),
            ));
        }

        Ok(Self(value))
    }

    /// Returns the underlying string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<NonEmptyString> for String {
    fn from(value: NonEmptyString) -> Self {
        value.0
    }
}

impl std::fmt::Display for NonEmptyString {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.0.as_str())
    }
}

/// Common application error categories.
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid input or violated invariant.
    #[error("validation error: {0}")]
    Validation(String),

    /// Requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Write operation conflicts with existing state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A bounded counter is already at its ceiling.
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// A lock was released by a holder that no longer owns it.
    #[error("lock ownership error: {0}")]
    LockOwnership(String),

    /// A lock could not be acquired within the caller's retry policy.
    #[error("lock unavailable: {0}")]
    LockUnavailable(String),

    /// Connection admission exhausted its retry ceiling.
    #[error("admission timeout: {0}")]
    AdmissionTimeout(String),

    /// The workflow service already has an execution with the requested name.
    #[error("execution already exists: {0}")]
    ExecutionAlreadyExists(String),

    /// Internal unexpected error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns true when the error proves an earlier start already happened.
    #[must_use]
    pub fn is_execution_already_exists(&self) -> bool {
        matches!(self, Self::ExecutionAlreadyExists(_))
    }
}
