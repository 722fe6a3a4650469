use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cirrus_core::AppResult;

/// Listing entry returned by an object store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Full object key.
    pub key: String,
    /// Last write timestamp reported by the store.
    pub last_modified: DateTime<Utc>,
}

/// Object storage port used for connection leases and archived messages.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Writes one object, replacing any existing body.
    async fn put_object(&self, key: &str, body: Vec<u8>) -> AppResult<()>;

    /// Lists every object under `prefix`.
    async fn list_objects(&self, prefix: &str) -> AppResult<Vec<StoredObject>>;

    /// Deletes one object; deleting a missing key succeeds.
    async fn delete_object(&self, key: &str) -> AppResult<()>;
}
