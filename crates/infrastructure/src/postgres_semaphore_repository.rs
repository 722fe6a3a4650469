//! PostgreSQL-backed semaphore repository using the `coordination_semaphores` table.

use async_trait::async_trait;
use sqlx::PgPool;

use cirrus_application::SemaphoreRepository;
use cirrus_core::{AppError, AppResult};
use cirrus_domain::SemaphoreRecord;


/// PostgreSQL implementation of the semaphore repository port.
#[derive(Clone)]
pub struct PostgresSemaphoreRepository {
    pool: PgPool,
}

impl PostgresSemaphoreRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SemaphoreRepository for PostgresSemaphoreRepository {
    async fn try_increment(&self, key: &str, max: u64) -> AppResult<Option<u64>> {
        if max == 0 {
            return Ok(None);
        }
        let max = to_column_value(key, max)?;

        // The conditional UPSERT returns no row when the ceiling is reached.
        let value = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO coordination_semaphores (key, value)
            VALUES ($1, 1)
            ON CONFLICT (key) DO UPDATE
            SET value = coordination_semaphores.value + 1,
                updated_at = now()
            WHERE coordination_semaphores.value < $2
            RETURNING value
            "#,
        )
        .bind(key)
        .bind(max)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to increment semaphore '{key}': {error}"))
        })?;

        value.map(|value| from_column_value(key, value)).transpose()
    }

    async fn decrement(&self, key: &str) -> AppResult<u64> {
        let value = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO coordination_semaphores (key, value)
            VALUES ($1, 0)
            ON CONFLICT (key) DO UPDATE
            SET value = GREATEST(coordination_semaphores.value - 1, 0),
                updated_at = now()
            RETURNING value
            "#,
        )
        .bind(key)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to decrement semaphore '{key}': {error}"))
        })?;

        from_column_value(key, value)
    }

    async fn find(&self, key: &str) -> AppResult<Option<SemaphoreRecord>> {
        let row = sqlx::query_as::<_, SemaphoreRow>(
            r#"
            SELECT key, value
            FROM coordination_semaphores
            WHERE key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to read semaphore '{key}': {error}")))?;

        row.map(SemaphoreRow::into_record).transpose()
    }

    async fn list(&self) -> AppResult<Vec<SemaphoreRecord>> {
        let rows = sqlx::query_as::<_, SemaphoreRow>(
            r#"
            SELECT key, value
            FROM coordination_semaphores
            ORDER BY key
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to list semaphores: {error}")))?;

        rows.into_iter().map(SemaphoreRow::into_record).collect()
    }

    async fn overwrite(&self, key: &str, value: u64) -> AppResult<()> {
        let value = to_column_value(key, value)?;
        sqlx::query(
            r#"
            INSERT INTO coordination_semaphores (key, value)
            VALUES ($1, $2)
            ON CONFLICT (key) DO UPDATE
            SET value = EXCLUDED.value,
                updated_at = now()
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to overwrite semaphore '{key}': {error}"))
        })?;

        Ok(())
    }
}

fn to_column_value(key: &str, value: u64) -> AppResult<i64> {
    i64::try_from(value).map_err(|error| {
        AppError::Validation(format!("semaphore value for '{key}' is out of range: {error}"))
    })
}

fn from_column_value(key: &str, value: i64) -> AppResult<u64> {
    u64::try_from(value).map_err(|error| {
        AppError::Internal(format!("invalid stored semaphore value for '{key}': {error}"))
    })
}

#[derive(Debug, sqlx::FromRow)]
struct SemaphoreRow {
    key: String,
    value: i64,
}

impl SemaphoreRow {
    fn into_record(self) -> AppResult<SemaphoreRecord> {
        let value = from_column_value(self.key.as_str(), self.value)?;
        SemaphoreRecord::new(self.key, value)
    }
}
