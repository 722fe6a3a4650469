use chrono::{DateTime, Duration, Utc};
use cirrus_core::{AppError, AppResult, NonEmptyString};

/// Object key namespace holding provider connection leases.
pub const PROVIDER_LEASE_NAMESPACE: &str = "lock";

/// Age after which a lease is treated as abandoned and reaped.
pub const PROVIDER_LEASE_STALE_AFTER_SECONDS: i64 = 300;

/// One in-flight connection claim against a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderLease {
    provider_id: NonEmptyString,
    lease_id: NonEmptyString,
    last_modified: DateTime<Utc>,
}

impl ProviderLease {
    /// Creates a lease snapshot.
    pub fn new(
        provider_id: impl Into<String>,
        lease_id: impl Into<String>,
        last_modified: DateTime<Utc>,
    ) -> AppResult<Self> {
        let provider_id = NonEmptyString::new(provider_id)?;
        let lease_id = NonEmptyString::new(lease_id)?;
        if provider_id.as_str().contains('/') {
            return Err(AppError::Validation(format!(
                "provider id '{provider_id}' must not contain '/'"
            )));
        }

        Ok(Self {
            provider_id,
            lease_id,
            last_modified,
        })
    }

    /// Parses a lease from a listed object key and its timestamp.
    pub fn from_object_key(key: &str, last_modified: DateTime<Utc>) -> AppResult<Self> {
        let mut segments = key.splitn(3, '/');
        let namespace = segments.next().unwrap_or_default();
        let provider_id = segments.next().unwrap_or_default();
        let lease_id = segments.next().unwrap_or_default();

        if namespace != PROVIDER_LEASE_NAMESPACE {
            return Err(AppError::Validation(format!(
                "object key '{key}' is outside the lease namespace"
            )));
        }

        Self::new(provider_id, lease_id, last_modified)
    }

    /// Returns the key prefix shared by all leases of one provider.
    #[must_use]
    pub fn provider_prefix(provider_id: &str) -> String {
        format!("{PROVIDER_LEASE_NAMESPACE}/{provider_id}/")
    }

    /// Returns the object key storing this lease.
    #[must_use]
    pub fn object_key(&self) -> String {
        format!(
            "{}{}",
            Self::provider_prefix(self.provider_id.as_str()),
            self.lease_id
        )
    }

    /// Returns the provider identifier.
    #[must_use]
    pub fn provider_id(&self) -> &str {
        self.provider_id.as_str()
    }

    /// Returns the lease identifier.
    #[must_use]
    pub fn lease_id(&self) -> &str {
        self.lease_id.as_str()
    }

    /// Returns the object timestamp.
    #[must_use]
    pub fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }

    /// Returns true when the lease is older than the staleness threshold.
    #[must_use]
    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.last_modified)
            > Duration::seconds(PROVIDER_LEASE_STALE_AFTER_SECONDS)
    }
}
