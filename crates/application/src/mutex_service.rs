use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cirrus_core::{AppError, AppResult, NonEmptyString};
use cirrus_domain::{LockRecord, LockState};
use tracing::{debug, warn};

use crate::coordination_ports::LockRepository;


/// Bounded retry policy used while waiting for a held lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRetryPolicy {
    /// Total acquire attempts, including the first.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub retry_interval: Duration,
}

impl Default for LockRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            retry_interval: Duration::from_secs(1),
        }
    }
}

/// Named exclusive locks with self-expiring leases.
///
/// Expiry is evaluated by the store inside the acquiring write, so a crashed
/// holder's lock is reclaimed by the next `acquire` without any sweeper.
#[derive(Clone)]
pub struct MutexService {
    repository: Arc<dyn LockRepository>,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl MutexService {
    /// Creates a mutex service on the system clock.
    #[must_use]
    pub fn new(repository: Arc<dyn LockRepository>) -> Self {
        Self {
            repository,
            clock: Arc::new(Utc::now),
        }
    }

    /// Replaces the clock used to stamp claims and judge expiry.
    #[must_use]
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Returns a fresh owner token for `holder_id`.
    #[must_use]
    pub fn owner_token(holder_id: &str) -> String {
        format!("{holder_id}:{}", uuid::Uuid::new_v4())
    }

    /// Attempts one conditional acquire; returns false while another live lease exists.
    pub async fn acquire(&self, key: &str, lease: Duration, owner: &str) -> AppResult<bool> {
        let lease = chrono::Duration::from_std(lease)
            .map_err(|error| AppError::Validation(format!("invalid lock lease: {error}")))?;
        let now = (self.clock)();
        let claim = LockRecord::claim(key, owner, lease, now)?;

        let acquired = self.repository.put_if_absent_or_expired(&claim, now).await?;
        debug!(lock = %key, owner = %owner, acquired, "lock acquire attempted");
        Ok(acquired)
    }

    /// Releases `key` held by `owner`.
    ///
    /// Missing locks and locks whose lease already passed to nobody are a
    /// no-op. A live lock held by someone else is left untouched and reported
    /// as [`AppError::LockOwnership`].
    pub async fn release(&self, key: &str, owner: &str) -> AppResult<()> {
        let key = NonEmptyString::new(key)?;

        let Some(record) = self.repository.find(key.as_str()).await? else {
            return Ok(());
        };

        if record.is_owned_by(owner)
            && self
                .repository
                .delete_if_owner(key.as_str(), owner)
                .await?
        {
            debug!(lock = %key, owner = %owner, "lock released");
            return Ok(());
        }

        // Ownership moved between the read and the delete; judge the new holder.
        let current = if record.is_owned_by(owner) {
            self.repository.find(key.as_str()).await?
        } else {
            Some(record)
        };

        match current {
            Some(current) if !current.is_owned_by(owner) && !current.is_expired_at((self.clock)()) => {
                Err(AppError::LockOwnership(format!(
                    "lock '{key}' is held by '{}' until {}, not by '{owner}'",
                    current.owner(),
                    current.expire()
                )))
            }
            _ => Ok(()),
        }
    }

    /// Reports whether `key` is currently held, treating expired records as unlocked.
    pub async fn state(&self, key: &str) -> AppResult<LockState> {
        let record = self.repository.find(key).await?;
        Ok(LockState::at(record.as_ref(), (self.clock)()))
    }

    /// Acquires with bounded retries, reporting exhaustion as [`AppError::LockUnavailable`].
    pub async fn acquire_with_retry(
        &self,
        key: &str,
        lease: Duration,
        owner: &str,
        policy: LockRetryPolicy,
    ) -> AppResult<()> {
        let attempts = policy.max_attempts.max(1);
        for attempt in 1..=attempts {
            if self.acquire(key, lease, owner).await? {
                return Ok(());
            }

            if attempt < attempts {
                tokio::time::sleep(policy.retry_interval).await;
            }
        }

        Err(AppError::LockUnavailable(format!(
            "lock '{key}' still held after {attempts} attempts"
        )))
    }

    /// Runs `work` while holding `key`, releasing on both success and failure.
    ///
    /// An error from `work` wins over a release error; a release error after
    /// successful work is returned so a lost lease is never silently ignored.
    pub async fn with_lock<T, F, Fut>(
        &self,
        key: &str,
        lease: Duration,
        owner: &str,
        policy: LockRetryPolicy,
        work: F,
    ) -> AppResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        self.acquire_with_retry(key, lease, owner, policy).await?;

        let outcome = work().await;
        let released = self.release(key, owner).await;

        match (outcome, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(release_error)) => Err(release_error),
            (Err(error), Ok(())) => Err(error),
            (Err(error), Err(release_error)) => {
                warn!(
                    lock = %key,
                    owner = %owner,
                    error = %release_error,
                    "failed to release lock after work error"
                );
                Err(error)
            }
        }
    }
}
