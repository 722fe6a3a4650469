use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cirrus_application::{LockRepository, SemaphoreRepository};
use cirrus_core::AppResult;
use cirrus_domain::{LockRecord, SemaphoreRecord};
use tokio::sync::Mutex;

/// In-memory semaphore repository for tests and single-process runs.
#[derive(Default)]
pub struct InMemorySemaphoreRepository {
    values: Mutex<HashMap<String, u64>>,
}

impl InMemorySemaphoreRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SemaphoreRepository for InMemorySemaphoreRepository {
    async fn try_increment(&self, key: &str, max: u64) -> AppResult<Option<u64>> {
        let mut values = self.values.lock().await;
        let value = values.entry(key.to_owned()).or_default();
        if *value >= max {
            return Ok(None);
        }

        *value += 1;
        Ok(Some(*value))
    }

    async fn decrement(&self, key: &str) -> AppResult<u64> {
        let mut values = self.values.lock().await;
        let value = values.entry(key.to_owned()).or_default();
        *value = value.saturating_sub(1);
        Ok(*value)
    }

    async fn find(&self, key: &str) -> AppResult<Option<SemaphoreRecord>> {
        self.values
            .lock()
            .await
            .get(key)
            .map(|value| SemaphoreRecord::new(key, *value))
            .transpose()
    }

    async fn list(&self) -> AppResult<Vec<SemaphoreRecord>> {
        self.values
            .lock()
            .await
            .iter()
            .map(|(key, value)| SemaphoreRecord::new(key.as_str(), *value))
            .collect()
    }

    async fn overwrite(&self, key: &str, value: u64) -> AppResult<()> {
        self.values.lock().await.insert(key.to_owned(), value);
        Ok(())
    }
}

/// In-memory lock repository for tests and single-process runs.
#[derive(Default)]
pub struct InMemoryLockRepository {
    records: Mutex<HashMap<String, LockRecord>>,
}

impl InMemoryLockRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockRepository for InMemoryLockRepository {
    async fn put_if_absent_or_expired(
        &self,
        claim: &LockRecord,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let mut records = self.records.lock().await;
        let held = records
            .get(claim.key())
            .is_some_and(|existing| !existing.is_expired_at(now));
        if held {
            return Ok(false);
        }

        records.insert(claim.key().to_owned(), claim.clone());
        Ok(true)
    }

    async fn find(&self, key: &str) -> AppResult<Option<LockRecord>> {
        Ok(self.records.lock().await.get(key).cloned())
    }

    async fn delete_if_owner(&self, key: &str, owner: &str) -> AppResult<bool> {
        let mut records = self.records.lock().await;
        if !records.get(key).is_some_and(|record| record.is_owned_by(owner)) {
            return Ok(false);
        }

        records.remove(key);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use cirrus_application::{LockRetryPolicy, MutexService, SemaphoreService};
    use cirrus_core::AppError;

    use super::{InMemoryLockRepository, InMemorySemaphoreRepository};

    #[tokio::test]
    async fn semaphore_service_round_trip_over_memory() {
        let service = SemaphoreService::new(Arc::new(InMemorySemaphoreRepository::new()));

        assert_eq!(service.up("ingest", 2).await.ok(), Some(1));
        assert_eq!(service.up("ingest", 2).await.ok(), Some(2));
        assert!(matches!(
            service.up("ingest", 2).await,
            Err(AppError::CapacityExceeded(_))
        ));
        assert_eq!(service.down("ingest").await.ok(), Some(1));
        assert_eq!(service.down("never-written").await.ok(), Some(0));

        let keys: Vec<String> = service
            .scan()
            .await
            .unwrap_or_default()
            .iter()
            .map(|record| record.key().to_owned())
            .collect();
        assert_eq!(keys, vec!["ingest", "never-written"]);
    }

    #[tokio::test]
    async fn mutex_service_serializes_work_over_memory() {
        let service = MutexService::new(Arc::new(InMemoryLockRepository::new()));
        let policy = LockRetryPolicy {
            max_attempts: 2,
            retry_interval: Duration::from_millis(5),
        };

        assert_eq!(
            service
                .acquire("reindex", Duration::from_secs(30), "worker-a")
                .await
                .ok(),
            Some(true)
        );
        let blocked = service
            .with_lock("reindex", Duration::from_secs(30), "worker-b", policy, || async {
                Ok(())
            })
            .await;
        assert!(matches!(blocked, Err(AppError::LockUnavailable(_))));

        assert!(service.release("reindex", "worker-a").await.is_ok());
        let value = service
            .with_lock("reindex", Duration::from_secs(30), "worker-b", policy, || async {
                Ok(42)
            })
            .await;
        assert_eq!(value.ok(), Some(42));
    }
}
