use std::sync::Arc;

use cirrus_core::{AppError, AppResult, NonEmptyString};
use cirrus_domain::SemaphoreRecord;
use tracing::debug;

use crate::coordination_ports::SemaphoreRepository;

/// Bounded counters shared by every worker through the key/value store.
///
/// The service never blocks or retries: a full semaphore is reported as
/// [`AppError::CapacityExceeded`] and the caller decides what to do next.
#[derive(Clone)]
pub struct SemaphoreService {
    repository: Arc<dyn SemaphoreRepository>,
}

impl SemaphoreService {
    /// Creates a semaphore service.
    #[must_use]
    pub fn new(repository: Arc<dyn SemaphoreRepository>) -> Self {
        Self { repository }
    }

    /// Increments `key` unless the result would exceed `max`.
    pub async fn up(&self, key: &str, max: u64) -> AppResult<u64> {
        let key = NonEmptyString::new(key)?;

        match self.repository.try_increment(key.as_str(), max).await? {
            Some(value) => {
                debug!(semaphore = %key, value, max, "semaphore incremented");
                Ok(value)
            }
            None => Err(AppError::CapacityExceeded(format!(
                "semaphore '{key}' is at its maximum of {max}"
            ))),
        }
    }

    /// Decrements `key`, clamped at zero.
    pub async fn down(&self, key: &str) -> AppResult<u64> {
        let key = NonEmptyString::new(key)?;
        let value = self.repository.decrement(key.as_str()).await?;
        debug!(semaphore = %key, value, "semaphore decremented");
        Ok(value)
    }

    /// Reads one counter; a key that was never written reads as zero.
    pub async fn get(&self, key: &str) -> AppResult<SemaphoreRecord> {
        match self.repository.find(key).await? {
            Some(record) => Ok(record),
            None => SemaphoreRecord::new(key, 0),
        }
    }

    /// Reads every counter.
    pub async fn scan(&self) -> AppResult<Vec<SemaphoreRecord>> {
        let mut records = self.repository.list().await?;
        records.sort_by(|left, right| left.key().cmp(right.key()));
        Ok(records)
    }

    /// Overwrites `key` with an externally observed value.
    pub async fn reconcile(&self, key: &str, value: u64) -> AppResult<()> {
        let key = NonEmptyString::new(key)?;
        self.repository.overwrite(key.as_str(), value).await
    }
}
