use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cirrus_application::{ObjectStore, StoredObject};
use cirrus_core::AppResult;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct StoredEntry {
    body: Vec<u8>,
    last_modified: DateTime<Utc>,
}

/// In-memory object store for tests and single-process runs.
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<BTreeMap<String, StoredEntry>>,
}

impl InMemoryObjectStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the body stored under `key`.
    pub async fn get_object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(key)
            .map(|entry| entry.body.clone())
    }

    /// Backdates an object so age-based reaping can be exercised.
    pub async fn set_last_modified(&self, key: &str, last_modified: DateTime<Utc>) {
        if let Some(entry) = self.objects.write().await.get_mut(key) {
            entry.last_modified = last_modified;
        }
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put_object(&self, key: &str, body: Vec<u8>) -> AppResult<()> {
        let mut objects = self.objects.write().await;
        // Later writes never share or precede an earlier stamp.
        let now = Utc::now();
        let last_modified = match objects.values().map(|entry| entry.last_modified).max() {
            Some(latest) if latest >= now => latest + chrono::Duration::microseconds(1),
            _ => now,
        };
        objects.insert(key.to_owned(), StoredEntry { body, last_modified });
        Ok(())
    }

    async fn list_objects(&self, prefix: &str) -> AppResult<Vec<StoredObject>> {
        Ok(self
            .objects
            .read()
            .await
            .range(prefix.to_owned()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, entry)| StoredObject {
                key: key.clone(),
                last_modified: entry.last_modified,
            })
            .collect())
    }

    async fn delete_object(&self, key: &str) -> AppResult<()> {
        self.objects.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use cirrus_application::{ObjectStore, ProviderConnectionLock, ProviderLockConfig};

    use super::InMemoryObjectStore;

    #[tokio::test]
    async fn list_is_scoped_to_prefix() {
        let store = InMemoryObjectStore::new();
        for key in ["lock/a/1", "lock/a/2", "lock/ab/1", "lock/b/1"] {
            assert!(store.put_object(key, Vec::new()).await.is_ok());
        }

        let keys: Vec<String> = store
            .list_objects("lock/a/")
            .await
            .unwrap_or_default()
            .into_iter()
            .map(|object| object.key)
            .collect();
        assert_eq!(keys, vec!["lock/a/1", "lock/a/2"]);
    }

    #[tokio::test]
    async fn provider_lock_reaps_backdated_lease() {
        let store = Arc::new(InMemoryObjectStore::new());
        let lock = ProviderConnectionLock::with_config(
            store.clone(),
            ProviderLockConfig {
                max_attempts: 1,
                retry_interval: std::time::Duration::from_millis(1),
            },
        );

        assert_eq!(lock.admit("provider-a", 1, "lease-1").await.ok(), Some(true));
        assert_eq!(lock.admit("provider-a", 1, "lease-2").await.ok(), Some(false));

        store
            .set_last_modified("lock/provider-a/lease-1", Utc::now() - Duration::minutes(10))
            .await;
        assert_eq!(lock.admit("provider-a", 1, "lease-2").await.ok(), Some(true));
        assert!(store.get_object("lock/provider-a/lease-1").await.is_none());
        assert_eq!(
            store.get_object("lock/provider-a/lease-2").await,
            Some(b"lease-2".to_vec())
        );
    }
}
