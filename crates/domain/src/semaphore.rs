use cirrus_core::{AppError, AppResult, NonEmptyString};
use serde::{Deserialize, Serialize};

/// Persisted state of one bounded counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemaphoreRecord {
    key: NonEmptyString,
    value: u64,
}

impl SemaphoreRecord {
    /// Creates a semaphore record snapshot.
    pub fn new(key: impl Into<String>, value: u64) -> AppResult<Self> {
        Ok(Self {
            key: NonEmptyString::new(key)?,
            value,
        })
    }

    /// Returns the semaphore key.
    #[must_use]
    pub fn key(&self) -> &str {
        self.key.as_str()
    }

    /// Returns the current counter value.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.value
    }

    /// Returns the value after one increment when it stays within `max`.
    #[must_use]
    pub fn incremented_within(&self, max: u64) -> Option<u64> {
        self.value.checked_add(1).filter(|next| *next <= max)
    }

    /// Returns the value after one decrement, clamped at zero.
    #[must_use]
    pub fn decremented(&self) -> u64 {
        self.value.saturating_sub(1)
    }
}

/// A named priority class and its concurrency ceiling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPriorityLimit")]
pub struct PriorityLimit {
    /// Semaphore key tracking running executions of the class.
    pub key: String,
    /// Maximum concurrent executions for the class.
    pub max_executions: u64,
}

impl PriorityLimit {
    /// Creates a validated priority limit.
    pub fn new(key: impl Into<String>, max_executions: u64) -> AppResult<Self> {
        let key = NonEmptyString::new(key)?;
        if max_executions == 0 {
            return Err(AppError::Validation(format!(
                "priority class '{key}' must allow at least one execution"
            )));
        }

        Ok(Self {
            key: key.into(),
            max_executions,
        })
    }
}

#[derive(Deserialize)]
struct RawPriorityLimit {
    key: String,
    max_executions: u64,
}

impl TryFrom<RawPriorityLimit> for PriorityLimit {
    type Error = AppError;

    fn try_from(raw: RawPriorityLimit) -> AppResult<Self> {
        Self::new(raw.key, raw.max_executions)
    }
}
