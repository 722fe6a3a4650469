//! PostgreSQL-backed lock repository using the `coordination_locks` table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use cirrus_application::LockRepository;
use cirrus_core::{AppError, AppResult};
use cirrus_domain::LockRecord;


/// PostgreSQL implementation of the lock repository port.
#[derive(Clone)]
pub struct PostgresLockRepository {
    pool: PgPool,
}

impl PostgresLockRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LockRepository for PostgresLockRepository {
    async fn put_if_absent_or_expired(
        &self,
        claim: &LockRecord,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO coordination_locks (key, owner, expire)
            VALUES ($1, $2, $3)
            ON CONFLICT (key) DO UPDATE
            SET owner = EXCLUDED.owner,
                expire = EXCLUDED.expire
            WHERE coordination_locks.expire <= $4
            "#,
        )
        .bind(claim.key())
        .bind(claim.owner())
        .bind(claim.expire())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to acquire lock '{}': {error}", claim.key()))
        })?;

        Ok(result.rows_affected() == 1)
    }

    async fn find(&self, key: &str) -> AppResult<Option<LockRecord>> {
        let row = sqlx::query_as::<_, LockRow>(
            r#"
            SELECT key, owner, expire
            FROM coordination_locks
            WHERE key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to read lock '{key}': {error}")))?;

        row.map(|row| LockRecord::from_parts(row.key, row.owner, row.expire))
            .transpose()
    }

    async fn delete_if_owner(&self, key: &str, owner: &str) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM coordination_locks
            WHERE key = $1 AND owner = $2
            "#,
        )
        .bind(key)
        .bind(owner)
        .execute(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to release lock '{key}': {error}")))?;

        Ok(result.rows_affected() > 0)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LockRow {
    key: String,
    owner: String,
    expire: DateTime<Utc>,
}
