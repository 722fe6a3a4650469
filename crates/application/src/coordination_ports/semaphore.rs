use async_trait::async_trait;
use cirrus_core::AppResult;
use cirrus_domain::SemaphoreRecord;

/// Consistent key/value storage for bounded counters.
///
/// Every mutating call must be a single atomic conditional write against the
/// store; implementations never lock on the client side.
#[async_trait]
pub trait SemaphoreRepository: Send + Sync {
    /// Increments the counter when the result stays within `max`.
    ///
    /// Returns the new value, or `None` when the ceiling was already reached.
    /// A missing record counts as zero.
    async fn try_increment(&self, key: &str, max: u64) -> AppResult<Option<u64>>;

    /// Decrements the counter, clamped at zero, and returns the new value.
    async fn decrement(&self, key: &str) -> AppResult<u64>;

    /// Reads one counter.
    async fn find(&self, key: &str) -> AppResult<Option<SemaphoreRecord>>;

    /// Reads every counter.
    async fn list(&self) -> AppResult<Vec<SemaphoreRecord>>;

    /// Unconditionally stores an observed value.
    async fn overwrite(&self, key: &str, value: u64) -> AppResult<()>;
}
