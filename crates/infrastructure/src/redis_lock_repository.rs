//! Redis-backed lock repository.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use cirrus_application::LockRepository;
use cirrus_core::{AppError, AppResult};
use cirrus_domain::LockRecord;
use redis::{AsyncCommands, Script};


const PUT_IF_ABSENT_OR_EXPIRED_SCRIPT: &str = r#"
local expire = redis.call('HGET', KEYS[1], 'expire')
if expire and tonumber(expire) > tonumber(ARGV[3]) then
  return 0
end
redis.call('HSET', KEYS[1], 'owner', ARGV[1], 'expire', ARGV[2])
return 1
"#;

const DELETE_IF_OWNER_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[1], 'owner') == ARGV[1] then
  return redis.call('DEL', KEYS[1])
else
  return 0
end
"#;

/// Redis implementation of the lock repository port.
///
/// Each lock is a hash holding `owner` and `expire` (epoch milliseconds).
/// Expiry is compared against the caller's clock inside the script.
#[derive(Clone)]
pub struct RedisLockRepository {
    client: redis::Client,
    key_prefix: String,
}

impl RedisLockRepository {
    /// Creates a repository with a configured Redis client and key prefix.
    #[must_use]
    pub fn new(client: redis::Client, key_prefix: impl Into<String>) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
        }
    }

    fn key_for(&self, key: &str) -> String {
        format!("{}:lock:{key}", self.key_prefix)
    }

    async fn connection(&self) -> AppResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|error| AppError::Internal(format!("failed to connect to redis: {error}")))
    }
}

#[async_trait]
impl LockRepository for RedisLockRepository {
    async fn put_if_absent_or_expired(
        &self,
        claim: &LockRecord,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let mut connection = self.connection().await?;
        let written: i32 = Script::new(PUT_IF_ABSENT_OR_EXPIRED_SCRIPT)
            .key(self.key_for(claim.key()))
            .arg(claim.owner())
            .arg(claim.expire().timestamp_millis())
            .arg(now.timestamp_millis())
            .invoke_async(&mut connection)
            .await
            .map_err(|error| {
                AppError::Internal(format!(
                    "failed to acquire lock '{}': {error}",
                    claim.key()
                ))
            })?;

        Ok(written > 0)
    }

    async fn find(&self, key: &str) -> AppResult<Option<LockRecord>> {
        let mut connection = self.connection().await?;
        let fields: HashMap<String, String> = connection
            .hgetall(self.key_for(key))
            .await
            .map_err(|error| AppError::Internal(format!("failed to read lock '{key}': {error}")))?;

        let (Some(owner), Some(expire)) = (fields.get("owner"), fields.get("expire")) else {
            return Ok(None);
        };

        let expire_millis = expire.parse::<i64>().map_err(|error| {
            AppError::Internal(format!("invalid expire value for lock '{key}': {error}"))
        })?;
        let expire = Utc
            .timestamp_millis_opt(expire_millis)
            .single()
            .ok_or_else(|| {
                AppError::Internal(format!(
                    "invalid expire timestamp for lock '{key}': {expire_millis}"
                ))
            })?;

        LockRecord::from_parts(key, owner.as_str(), expire).map(Some)
    }

    async fn delete_if_owner(&self, key: &str, owner: &str) -> AppResult<bool> {
        let mut connection = self.connection().await?;
        let deleted: i32 = Script::new(DELETE_IF_OWNER_SCRIPT)
            .key(self.key_for(key))
            .arg(owner)
            .invoke_async(&mut connection)
            .await
            .map_err(|error| {
                AppError::Internal(format!("failed to release lock '{key}': {error}"))
            })?;

        Ok(deleted > 0)
    }
}
