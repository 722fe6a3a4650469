use std::env;
use std::time::Duration;

use cirrus_core::{AppError, AppResult};

/// Backend holding semaphores and locks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinationStore {
    /// Redis with Lua conditional writes.
    Redis {
        /// Connection URL.
        url: String,
        /// Prefix for every key written.
        key_prefix: String,
    },
    /// PostgreSQL with conditional UPSERTs.
    Postgres {
        /// Connection URL.
        database_url: String,
    },
    /// Process-local maps; only meaningful for a single worker.
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub coordination_store: CoordinationStore,
    pub target_workflow_arn: String,
    pub backlog_queue_url: Option<String>,
    pub inbound_queue_urls: Vec<String>,
    pub status_queue_urls: Vec<String>,
    pub max_concurrent_executions: u64,
    pub consumer_rate_limit_per_second: Option<u32>,
    pub consumer_time_limit: Duration,
    pub visibility_timeout: Duration,
    pub system_bucket: Option<String>,
    pub archive_prefix: Option<String>,
    pub reconcile_interval: Duration,
    pub priority_key: Option<String>,
}

impl WorkerConfig {
    pub fn load() -> AppResult<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        let optional = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };
        let required = |name: &str| {
            optional(name).ok_or_else(|| AppError::Validation(format!("{name} is required")))
        };

        let coordination_store = match optional("COORDINATION_STORE")
            .unwrap_or_else(|| "redis".to_owned())
            .to_ascii_lowercase()
            .as_str()
        {
            "redis" => CoordinationStore::Redis {
                url: required("REDIS_URL")?,
                key_prefix: optional("REDIS_KEY_PREFIX").unwrap_or_else(|| "cirrus".to_owned()),
            },
            "postgres" => CoordinationStore::Postgres {
                database_url: required("DATABASE_URL")?,
            },
            "memory" => CoordinationStore::Memory,
            other => {
                return Err(AppError::Validation(format!(
                    "COORDINATION_STORE must be redis, postgres or memory, got '{other}'"
                )));
            }
        };

        let target_workflow_arn = required("TARGET_WORKFLOW_ARN")?;
        let backlog_queue_url = optional("BACKLOG_QUEUE_URL");
        let inbound_queue_urls = optional("INBOUND_QUEUE_URLS")
            .map(|value| parse_queue_list(value.as_str()))
            .unwrap_or_default();

        let status_queue_urls = optional("STATUS_QUEUE_URLS")
            .map(|value| parse_queue_list(value.as_str()))
            .unwrap_or_default();

        if backlog_queue_url.is_none() && inbound_queue_urls.is_empty() {
            return Err(AppError::Validation(
                "BACKLOG_QUEUE_URL or INBOUND_QUEUE_URLS must be set".to_owned(),
            ));
        }

        let max_concurrent_executions =
            parse_number(&optional, "MAX_CONCURRENT_EXECUTIONS", 10_u64)?;
        let consumer_rate_limit_per_second = optional("CONSUMER_RATE_LIMIT_PER_SECOND")
            .map(|value| parse_value::<u32>("CONSUMER_RATE_LIMIT_PER_SECOND", value.as_str()))
            .transpose()?;
        let consumer_time_limit_seconds =
            parse_number(&optional, "CONSUMER_TIME_LIMIT_SECONDS", 240_u64)?;
        let visibility_timeout_seconds =
            parse_number(&optional, "VISIBILITY_TIMEOUT_SECONDS", 300_u64)?;
        let reconcile_interval_seconds =
            parse_number(&optional, "RECONCILE_INTERVAL_SECONDS", 60_u64)?;

        for (name, value) in [
            ("MAX_CONCURRENT_EXECUTIONS", max_concurrent_executions),
            ("CONSUMER_TIME_LIMIT_SECONDS", consumer_time_limit_seconds),
            ("VISIBILITY_TIMEOUT_SECONDS", visibility_timeout_seconds),
            ("RECONCILE_INTERVAL_SECONDS", reconcile_interval_seconds),
        ] {
            if value == 0 {
                return Err(AppError::Validation(format!(
                    "{name} must be greater than zero"
                )));
            }
        }

        if consumer_rate_limit_per_second == Some(0) {
            return Err(AppError::Validation(
                "CONSUMER_RATE_LIMIT_PER_SECOND must be greater than zero".to_owned(),
            ));
        }

        let system_bucket = optional("SYSTEM_BUCKET");
        let archive_prefix = optional("ARCHIVE_PREFIX");
        if archive_prefix.is_some() && system_bucket.is_none() {
            return Err(AppError::Validation(
                "ARCHIVE_PREFIX requires SYSTEM_BUCKET".to_owned(),
            ));
        }

        Ok(Self {
            coordination_store,
            target_workflow_arn,
            backlog_queue_url,
            inbound_queue_urls,
            status_queue_urls,
            max_concurrent_executions,
            consumer_rate_limit_per_second,
            consumer_time_limit: Duration::from_secs(consumer_time_limit_seconds),
            visibility_timeout: Duration::from_secs(visibility_timeout_seconds),
            system_bucket,
            archive_prefix,
            reconcile_interval: Duration::from_secs(reconcile_interval_seconds),
            priority_key: optional("PRIORITY_KEY"),
        })
    }
}

fn parse_queue_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|queue_url| !queue_url.is_empty())
        .map(str::to_owned)
        .collect()
}

fn parse_number(
    optional: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: u64,
) -> AppResult<u64> {
    match optional(name) {
        Some(value) => parse_value::<u64>(name, value.as_str()),
        None => Ok(default),
    }
}

fn parse_value<T>(name: &str, value: &str) -> AppResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|error| AppError::Validation(format!("invalid {name} value '{value}': {error}")))
}
