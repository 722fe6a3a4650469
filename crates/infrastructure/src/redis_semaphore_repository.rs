//! Redis-backed semaphore repository.

use async_trait::async_trait;
use cirrus_application::SemaphoreRepository;
use cirrus_core::{AppError, AppResult};
use cirrus_domain::SemaphoreRecord;
use redis::{AsyncCommands, Script};


const TRY_INCREMENT_SCRIPT: &str = r#"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
if current >= tonumber(ARGV[1]) then
  return -1
end
redis.call('SADD', KEYS[2], ARGV[2])
return redis.call('INCR', KEYS[1])
"#;

const DECREMENT_SCRIPT: &str = r#"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
redis.call('SADD', KEYS[2], ARGV[1])
if current <= 0 then
  redis.call('SET', KEYS[1], 0)
  return 0
end
return redis.call('DECR', KEYS[1])
"#;

const OVERWRITE_SCRIPT: &str = r#"
redis.call('SET', KEYS[1], ARGV[1])
redis.call('SADD', KEYS[2], ARGV[2])
return 1
"#;

/// Redis implementation of the semaphore repository port.
///
/// Counters live at `<prefix>:semaphore:<key>`; every key ever written is
/// also recorded in the `<prefix>:semaphores` set so scans never walk the
/// whole keyspace.
#[derive(Clone)]
pub struct RedisSemaphoreRepository {
    client: redis::Client,
    key_prefix: String,
}

impl RedisSemaphoreRepository {
    /// Creates a repository with a configured Redis client and key prefix.
    #[must_use]
    pub fn new(client: redis::Client, key_prefix: impl Into<String>) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
        }
    }

    fn key_for(&self, key: &str) -> String {
        format!("{}:semaphore:{key}", self.key_prefix)
    }

    fn index_key(&self) -> String {
        format!("{}:semaphores", self.key_prefix)
    }

    async fn connection(&self) -> AppResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|error| AppError::Internal(format!("failed to connect to redis: {error}")))
    }
}

#[async_trait]
impl SemaphoreRepository for RedisSemaphoreRepository {
    async fn try_increment(&self, key: &str, max: u64) -> AppResult<Option<u64>> {
        let mut connection = self.connection().await?;
        let value: i64 = Script::new(TRY_INCREMENT_SCRIPT)
            .key(self.key_for(key))
            .key(self.index_key())
            .arg(max)
            .arg(key)
            .invoke_async(&mut connection)
            .await
            .map_err(|error| {
                AppError::Internal(format!("failed to increment semaphore '{key}': {error}"))
            })?;

        if value < 0 {
            return Ok(None);
        }

        u64::try_from(value).map(Some).map_err(|error| {
            AppError::Internal(format!("invalid semaphore value for '{key}': {error}"))
        })
    }

    async fn decrement(&self, key: &str) -> AppResult<u64> {
        let mut connection = self.connection().await?;
        let value: i64 = Script::new(DECREMENT_SCRIPT)
            .key(self.key_for(key))
            .key(self.index_key())
            .arg(key)
            .invoke_async(&mut connection)
            .await
            .map_err(|error| {
                AppError::Internal(format!("failed to decrement semaphore '{key}': {error}"))
            })?;

        u64::try_from(value).map_err(|error| {
            AppError::Internal(format!("invalid semaphore value for '{key}': {error}"))
        })
    }

    async fn find(&self, key: &str) -> AppResult<Option<SemaphoreRecord>> {
        let mut connection = self.connection().await?;
        let value: Option<u64> = connection
            .get(self.key_for(key))
            .await
            .map_err(|error| {
                AppError::Internal(format!("failed to read semaphore '{key}': {error}"))
            })?;

        value
            .map(|value| SemaphoreRecord::new(key, value))
            .transpose()
    }

    async fn list(&self) -> AppResult<Vec<SemaphoreRecord>> {
        let mut connection = self.connection().await?;
        let keys: Vec<String> = connection
            .smembers(self.index_key())
            .await
            .map_err(|error| {
                AppError::Internal(format!("failed to list semaphore keys: {error}"))
            })?;

        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            let value: Option<u64> = connection
                .get(self.key_for(key.as_str()))
                .await
                .map_err(|error| {
                    AppError::Internal(format!("failed to read semaphore '{key}': {error}"))
                })?;
            records.push(SemaphoreRecord::new(key, value.unwrap_or_default())?);
        }

        Ok(records)
    }

    async fn overwrite(&self, key: &str, value: u64) -> AppResult<()> {
        let mut connection = self.connection().await?;
        Script::new(OVERWRITE_SCRIPT)
            .key(self.key_for(key))
            .key(self.index_key())
            .arg(value)
            .arg(key)
            .invoke_async::<i32>(&mut connection)
            .await
            .map_err(|error| {
                AppError::Internal(format!("failed to overwrite semaphore '{key}': {error}"))
            })?;

        Ok(())
    }
}
