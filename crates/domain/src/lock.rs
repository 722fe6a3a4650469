use chrono::{DateTime, Duration, Utc};
use cirrus_core::{AppError, AppResult, NonEmptyString};
use serde::{Deserialize, Serialize};

/// One exclusive lock claim stored under a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    key: NonEmptyString,
    owner: NonEmptyString,
    expire: DateTime<Utc>,
}

impl LockRecord {
    /// Creates a lock claim that expires `lease` after `now`.
    pub fn claim(
        key: impl Into<String>,
        owner: impl Into<String>,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> AppResult<Self> {
        if lease <= Duration::zero() {
            return Err(AppError::Validation(
                "lock lease must be greater than zero".to_owned(),
            ));
        }

        let expire = now.checked_add_signed(lease).ok_or_else(|| {
            AppError::Validation(format!("lock lease of {lease} overflows the clock"))
        })?;

        Self::from_parts(key, owner, expire)
    }

    /// Rebuilds a record read back from storage.
    pub fn from_parts(
        key: impl Into<String>,
        owner: impl Into<String>,
        expire: DateTime<Utc>,
    ) -> AppResult<Self> {
        Ok(Self {
            key: NonEmptyString::new(key)?,
            owner: NonEmptyString::new(owner)?,
            expire,
        })
    }

    /// Returns the lock key.
    #[must_use]
    pub fn key(&self) -> &str {
        self.key.as_str()
    }

    /// Returns the owner token.
    #[must_use]
    pub fn owner(&self) -> &str {
        self.owner.as_str()
    }

    /// Returns the lease expiry.
    #[must_use]
    pub fn expire(&self) -> DateTime<Utc> {
        self.expire
    }

    /// Returns true once the lease has lapsed at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expire <= now
    }

    /// Returns true when `owner` holds this claim.
    #[must_use]
    pub fn is_owned_by(&self, owner: &str) -> bool {
        self.owner.as_str() == owner
    }
}

/// Observable state of one lock key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockState {
    /// No live claim exists.
    Unlocked,
    /// A live claim exists.
    Locked {
        /// Current holder.
        owner: String,
        /// Lease expiry.
        expire: DateTime<Utc>,
    },
}

impl LockState {
    /// Derives the state of a key from its stored record.
    #[must_use]
    pub fn at(record: Option<&LockRecord>, now: DateTime<Utc>) -> Self {
        match record {
            Some(record) if !record.is_expired_at(now) => Self::Locked {
                owner: record.owner().to_owned(),
                expire: record.expire(),
            },
            _ => Self::Unlocked,
        }
    }
}
