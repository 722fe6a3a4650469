use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cirrus_core::{AppError, AppResult, NonEmptyString};
use cirrus_domain::ProviderLease;
use tracing::{debug, info, warn};

use crate::coordination_ports::ObjectStore;

/// Retry ceiling for connection admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderLockConfig {
    /// Total admission attempts, including the first.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub retry_interval: Duration,
}

impl Default for ProviderLockConfig {
    fn default() -> Self {
        Self {
            max_attempts: 270,
            retry_interval: Duration::from_secs(5),
        }
    }
}

/// Counting connection leases over an object store.
///
/// Every count also reaps leases older than five minutes, so a crashed
/// worker blocks its slot for at most that window.
#[derive(Clone)]
pub struct ProviderConnectionLock {
    object_store: Arc<dyn ObjectStore>,
    config: ProviderLockConfig,
}

impl ProviderConnectionLock {
    /// Creates a connection lock with default retry ceiling.
    #[must_use]
    pub fn new(object_store: Arc<dyn ObjectStore>) -> Self {
        Self::with_config(object_store, ProviderLockConfig::default())
    }

    /// Creates a connection lock with a custom retry ceiling.
    #[must_use]
    pub fn with_config(object_store: Arc<dyn ObjectStore>, config: ProviderLockConfig) -> Self {
        Self {
            object_store,
            config,
        }
    }

    /// Counts live leases for `provider_id`, deleting stale ones on the way.
    pub async fn count_active(&self, provider_id: &str) -> AppResult<usize> {
        let provider_id = NonEmptyString::new(provider_id)?;
        Ok(self.live_leases(provider_id.as_str()).await?.len())
    }

    /// Waits for a free connection slot and records `lease_id` against it.
    ///
    /// Each attempt writes the lease first and then ranks it among the live
    /// leases by age. The lease is kept only when fewer than `limit` other
    /// leases are at least as old, so concurrent callers cannot all slip
    /// under the limit. Returns false once the retry ceiling is exhausted;
    /// the caller must abort or park the work.
    pub async fn admit(&self, provider_id: &str, limit: usize, lease_id: &str) -> AppResult<bool> {
        if limit == 0 {
            return Err(AppError::Validation(format!(
                "connection limit for provider '{provider_id}' must be greater than zero"
            )));
        }

        let lease = ProviderLease::new(provider_id, lease_id, Utc::now())?;
        let lease_key = lease.object_key();
        let attempts = self.config.max_attempts.max(1);

        for attempt in 1..=attempts {
            self.object_store
                .put_object(lease_key.as_str(), lease_id.as_bytes().to_vec())
                .await?;

            let live = self.live_leases(provider_id).await?;
            let ahead = match live.iter().find(|candidate| candidate.lease_id() == lease_id) {
                // Ties count as ahead so two leases written in the same tick both back off.
                Some(own) => live
                    .iter()
                    .filter(|candidate| {
                        candidate.lease_id() != lease_id
                            && candidate.last_modified() <= own.last_modified()
                    })
                    .count(),
                None => live.len(),
            };

            if ahead < limit {
                debug!(
                    provider_id = %provider_id,
                    lease_id = %lease_id,
                    active = live.len(),
                    limit,
                    attempt,
                    "provider connection admitted"
                );
                return Ok(true);
            }

            self.object_store.delete_object(lease_key.as_str()).await?;

            if attempt < attempts {
                debug!(
                    provider_id = %provider_id,
                    ahead,
                    limit,
                    attempt,
                    "provider at connection limit, waiting"
                );
                tokio::time::sleep(self.config.retry_interval).await;
            }
        }

        warn!(
            provider_id = %provider_id,
            lease_id = %lease_id,
            attempts,
            "provider connection admission exhausted retries"
        );
        Ok(false)
    }

    /// Like [`Self::admit`] but reports exhaustion as [`AppError::AdmissionTimeout`].
    pub async fn admit_or_fail(
        &self,
        provider_id: &str,
        limit: usize,
        lease_id: &str,
    ) -> AppResult<()> {
        if self.admit(provider_id, limit, lease_id).await? {
            return Ok(());
        }

        Err(AppError::AdmissionTimeout(format!(
            "no connection slot for provider '{provider_id}' after {} attempts",
            self.config.max_attempts.max(1)
        )))
    }

    /// Deletes the lease object; missing leases are fine.
    pub async fn release(&self, provider_id: &str, lease_id: &str) -> AppResult<()> {
        let lease = ProviderLease::new(provider_id, lease_id, Utc::now())?;
        self.object_store
            .delete_object(lease.object_key().as_str())
            .await
    }

    async fn live_leases(&self, provider_id: &str) -> AppResult<Vec<ProviderLease>> {
        let prefix = ProviderLease::provider_prefix(provider_id);
        let now = Utc::now();

        let mut live = Vec::new();
        for object in self.object_store.list_objects(prefix.as_str()).await? {
            let lease = match ProviderLease::from_object_key(&object.key, object.last_modified) {
                Ok(lease) => lease,
                Err(error) => {
                    warn!(key = %object.key, error = %error, "skipping malformed lease object");
                    continue;
                }
            };

            if lease.is_stale_at(now) {
                info!(
                    provider_id = %provider_id,
                    lease_id = %lease.lease_id(),
                    last_modified = %lease.last_modified(),
                    "reaping stale provider lease"
                );
                self.object_store.delete_object(&object.key).await?;
                continue;
            }

            live.push(lease);
        }

        Ok(live)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;
    use cirrus_core::{AppError, AppResult};

    use crate::coordination_ports::{ObjectStore, StoredObject};
    use crate::test_support::FakeObjectStore;

    use super::{ProviderConnectionLock, ProviderLockConfig};

    fn fast_config(max_attempts: u32) -> ProviderLockConfig {
        ProviderLockConfig {
            max_attempts,
            retry_interval: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn third_caller_waits_for_release() {
        let store = Arc::new(FakeObjectStore::default());
        let lock = ProviderConnectionLock::with_config(store.clone(), fast_config(200));

        assert_eq!(lock.admit("provider-a", 2, "lease-1").await.ok(), Some(true));
        assert_eq!(lock.admit("provider-a", 2, "lease-2").await.ok(), Some(true));

        let waiting = {
            let lock = lock.clone();
            tokio::spawn(async move { lock.admit("provider-a", 2, "lease-3").await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiting.is_finished());
        let keys = store.keys().await;
        assert!(keys.contains(&"lock/provider-a/lease-1".to_owned()));
        assert!(keys.contains(&"lock/provider-a/lease-2".to_owned()));

        assert!(lock.release("provider-a", "lease-1").await.is_ok());
        let admitted = waiting.await;
        assert!(matches!(admitted, Ok(Ok(true))));
        assert_eq!(
            store.keys().await,
            vec!["lock/provider-a/lease-2", "lock/provider-a/lease-3"]
        );
    }

    #[tokio::test]
    async fn exhausted_retries_return_false() {
        let store = Arc::new(FakeObjectStore::default());
        let lock = ProviderConnectionLock::with_config(store, fast_config(3));

        assert_eq!(lock.admit("provider-a", 1, "lease-1").await.ok(), Some(true));
        assert_eq!(lock.admit("provider-a", 1, "lease-2").await.ok(), Some(false));
        assert!(matches!(
            lock.admit_or_fail("provider-a", 1, "lease-2").await,
            Err(AppError::AdmissionTimeout(_))
        ));
    }

    #[tokio::test]
    async fn stale_leases_are_reaped_during_count() {
        let store = Arc::new(FakeObjectStore::default());
        store
            .insert_at(
                "lock/provider-a/crashed",
                Utc::now() - chrono::Duration::minutes(6),
            )
            .await;
        let lock = ProviderConnectionLock::with_config(store.clone(), fast_config(1));

        assert_eq!(lock.count_active("provider-a").await.ok(), Some(0));
        assert!(store.keys().await.is_empty());
        assert_eq!(lock.admit("provider-a", 1, "lease-1").await.ok(), Some(true));
    }

    #[tokio::test]
    async fn providers_are_counted_independently() {
        let store = Arc::new(FakeObjectStore::default());
        let lock = ProviderConnectionLock::with_config(store, fast_config(1));

        assert_eq!(lock.admit("provider-a", 1, "lease-1").await.ok(), Some(true));
        assert_eq!(lock.admit("provider-b", 1, "lease-1").await.ok(), Some(true));
        assert_eq!(lock.count_active("provider-a").await.ok(), Some(1));
    }

    #[tokio::test]
    async fn release_is_idempotent_and_limit_must_be_positive() {
        let lock = ProviderConnectionLock::with_config(
            Arc::new(FakeObjectStore::default()),
            fast_config(1),
        );
        assert!(lock.release("provider-a", "missing").await.is_ok());
        assert!(matches!(
            lock.admit("provider-a", 0, "lease-1").await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn sequential_admissions_never_exceed_limit() {
        let store = Arc::new(FakeObjectStore::default());
        let lock = ProviderConnectionLock::with_config(store.clone(), fast_config(1));

        let mut admitted = 0;
        for index in 0..6 {
            if lock
                .admit("provider-a", 3, &format!("lease-{index}"))
                .await
                .unwrap_or(false)
            {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 3);
        assert_eq!(store.keys().await.len(), 3);
    }

    /// Object store whose calls suspend, so concurrent admissions interleave.
    struct SlowObjectStore {
        inner: FakeObjectStore,
        delay: Duration,
    }

    #[async_trait]
    impl ObjectStore for SlowObjectStore {
        async fn put_object(&self, key: &str, body: Vec<u8>) -> AppResult<()> {
            tokio::time::sleep(self.delay).await;
            self.inner.put_object(key, body).await
        }

        async fn list_objects(&self, prefix: &str) -> AppResult<Vec<StoredObject>> {
            tokio::time::sleep(self.delay).await;
            self.inner.list_objects(prefix).await
        }

        async fn delete_object(&self, key: &str) -> AppResult<()> {
            self.inner.delete_object(key).await
        }
    }

    #[tokio::test]
    async fn concurrent_admissions_respect_limit() {
        let store = Arc::new(SlowObjectStore {
            inner: FakeObjectStore::default(),
            delay: Duration::from_millis(5),
        });
        let lock = ProviderConnectionLock::with_config(store, fast_config(500));
        let holders = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for index in 0..3 {
            let lock = lock.clone();
            let holders = holders.clone();
            let peak = peak.clone();
            tasks.push(tokio::spawn(async move {
                let lease_id = format!("lease-{index}");
                let admitted = lock.admit("providerA", 2, lease_id.as_str()).await?;
                if admitted {
                    let now_holding = holders.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now_holding, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(40)).await;
                    holders.fetch_sub(1, Ordering::SeqCst);
                    lock.release("providerA", lease_id.as_str()).await?;
                }
                Ok::<bool, AppError>(admitted)
            }));
        }

        let mut admitted = 0;
        for task in tasks {
            if matches!(task.await, Ok(Ok(true))) {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 3);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(lock.count_active("providerA").await.ok(), Some(0));
    }
}
