use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cirrus_core::AppResult;
use cirrus_domain::LockRecord;

/// Consistent key/value storage for self-expiring exclusive locks.
#[async_trait]
pub trait LockRepository: Send + Sync {
    /// Stores `claim` when no record exists or the stored one expired before `now`.
    ///
    /// The existence and expiry check must happen inside the same conditional write.
    async fn put_if_absent_or_expired(
        &self,
        claim: &LockRecord,
        now: DateTime<Utc>,
    ) -> AppResult<bool>;

    /// Reads the stored record for one key.
    async fn find(&self, key: &str) -> AppResult<Option<LockRecord>>;

    /// Deletes the record only while `owner` still holds it.
    async fn delete_if_owner(&self, key: &str, owner: &str) -> AppResult<bool>;
}
