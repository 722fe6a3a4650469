//! Cirrus coordination worker runtime.

#![forbid(unsafe_code)]

mod config;

use std::sync::Arc;
use std::time::Duration;

use cirrus_application::{
    ExecutionStarter, FixedDeadline, LockRepository, LockRetryPolicy, MessageHandler, MessageQueue,
    MutexService, ObjectStore, PriorityClass, PriorityLifecycleTracker, QueueConsumerConfig,
    RateLimitedQueueConsumer, SemaphoreRepository, SemaphoreService, ThrottledDispatcherConfig,
    ThrottledExecutionDispatcher,
};
use cirrus_core::{AppError, AppResult};
use cirrus_domain::PriorityLimit;
use cirrus_infrastructure::{
    InMemoryLockRepository, InMemorySemaphoreRepository, PostgresLockRepository,
    PostgresSemaphoreRepository, RedisLockRepository, RedisSemaphoreRepository, S3ObjectStore,
    SfnWorkflowExecutionService, SqsMessageQueue,
};
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{CoordinationStore, WorkerConfig};

const CONSUMER_SAFETY_MARGIN: Duration = Duration::from_secs(5);
const CONSUMER_PAUSE: Duration = Duration::from_secs(1);
const RECONCILE_LOCK_LEASE: Duration = Duration::from_secs(30);

struct CoordinationBackends {
    semaphores: Arc<dyn SemaphoreRepository>,
    locks: Arc<dyn LockRepository>,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = WorkerConfig::load()?;
    let backends = connect_coordination_store(&config.coordination_store).await?;
    let aws_config = aws_config::load_from_env().await;

    let executions = Arc::new(SfnWorkflowExecutionService::new(aws_sdk_sfn::Client::new(
        &aws_config,
    )));
    let queue = Arc::new(SqsMessageQueue::new(aws_sdk_sqs::Client::new(&aws_config)));
    let semaphores = SemaphoreService::new(backends.semaphores);
    let mut starter = ExecutionStarter::new(executions.clone(), semaphores.clone());
    if config.status_queue_urls.is_empty() {
        warn!("STATUS_QUEUE_URLS is not set; requests with a priority class will be refused");
        starter = starter.without_priority_slots();
    }

    info!(
        target_workflow = %config.target_workflow_arn,
        backlog_queue = config.backlog_queue_url.as_deref().unwrap_or("-"),
        inbound_queues = config.inbound_queue_urls.len(),
        status_queues = config.status_queue_urls.len(),
        max_concurrent_executions = config.max_concurrent_executions,
        "cirrus-worker started"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = JoinSet::new();

    if let Some(backlog_queue_url) = config.backlog_queue_url.clone() {
        let mut dispatcher_config = ThrottledDispatcherConfig::new(
            config.target_workflow_arn.as_str(),
            backlog_queue_url,
            config.max_concurrent_executions,
        );
        dispatcher_config.visibility_timeout = config.visibility_timeout;
        let dispatcher = ThrottledExecutionDispatcher::new(
            executions.clone(),
            queue.clone(),
            starter.clone(),
            dispatcher_config,
        )?;
        let shutdown = shutdown_rx.clone();
        tasks.spawn(async move { dispatcher.run(shutdown).await });
    }

    if !config.inbound_queue_urls.is_empty() {
        let mut consumer_config = match config.consumer_rate_limit_per_second {
            Some(rate) => QueueConsumerConfig::rate_limited(
                config.inbound_queue_urls.clone(),
                rate,
                config.consumer_time_limit,
            ),
            None => QueueConsumerConfig {
                queue_ids: config.inbound_queue_urls.clone(),
                time_limit: config.consumer_time_limit,
                ..QueueConsumerConfig::default()
            },
        };
        consumer_config.visibility_timeout = config.visibility_timeout;
        consumer_config.safety_margin = CONSUMER_SAFETY_MARGIN;

        let archive = match (&config.system_bucket, &config.archive_prefix) {
            (Some(bucket), Some(prefix)) => {
                let store: Arc<dyn ObjectStore> = Arc::new(S3ObjectStore::new(
                    aws_sdk_s3::Client::new(&aws_config),
                    bucket.as_str(),
                ));
                Some((store, prefix.clone()))
            }
            _ => None,
        };

        spawn_consumer_loop(
            &mut tasks,
            "inbound",
            queue.clone(),
            consumer_config,
            archive,
            Arc::new(starter.clone()),
            shutdown_rx.clone(),
        );
    }

    if !config.status_queue_urls.is_empty() {
        let mut consumer_config = QueueConsumerConfig {
            queue_ids: config.status_queue_urls.clone(),
            time_limit: config.consumer_time_limit,
            ..QueueConsumerConfig::default()
        };
        consumer_config.visibility_timeout = config.visibility_timeout;
        consumer_config.safety_margin = CONSUMER_SAFETY_MARGIN;

        // The starter reserves the slot, so only terminal events touch the counter.
        let tracker = PriorityLifecycleTracker::new(semaphores.clone(), executions.clone())
            .without_running_increment();
        spawn_consumer_loop(
            &mut tasks,
            "status",
            queue.clone(),
            consumer_config,
            None,
            Arc::new(tracker),
            shutdown_rx.clone(),
        );
    }

    if let Some(priority_key) = config.priority_key.clone() {
        let class = PriorityClass {
            limit: PriorityLimit::new(priority_key, config.max_concurrent_executions)?,
            target_workflow: config.target_workflow_arn.clone(),
        };
        let tracker = PriorityLifecycleTracker::new(semaphores.clone(), executions.clone());
        let mutex = MutexService::new(backends.locks);
        let owner = MutexService::owner_token("cirrus-worker");
        let interval = config.reconcile_interval;
        let mut shutdown = shutdown_rx.clone();
        tasks.spawn(async move {
            while !*shutdown.borrow() {
                if let Err(error) = reconcile_once(&mutex, &tracker, &class, owner.as_str()).await {
                    warn!(
                        semaphore = %class.limit.key,
                        error = %error,
                        "semaphore reconciliation failed"
                    );
                }

                tokio::select! {
                    () = tokio::time::sleep(interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }

    tokio::signal::ctrl_c()
        .await
        .map_err(|error| AppError::Internal(format!("failed to listen for shutdown: {error}")))?;
    info!("shutdown requested");
    shutdown_tx.send_replace(true);

    while let Some(joined) = tasks.join_next().await {
        if let Err(error) = joined {
            warn!(error = %error, "worker task ended abnormally");
        }
    }

    info!("cirrus-worker stopped");
    Ok(())
}

fn spawn_consumer_loop(
    tasks: &mut JoinSet<()>,
    name: &'static str,
    queue: Arc<dyn MessageQueue>,
    consumer_config: QueueConsumerConfig,
    archive: Option<(Arc<dyn ObjectStore>, String)>,
    handler: Arc<dyn MessageHandler>,
    mut shutdown: watch::Receiver<bool>,
) {
    tasks.spawn(async move {
        while !*shutdown.borrow() {
            let deadline = Arc::new(FixedDeadline::after(
                consumer_config.time_limit + consumer_config.safety_margin,
            ));
            match RateLimitedQueueConsumer::new(queue.clone(), deadline, consumer_config.clone()) {
                Ok(consumer) => {
                    let consumer = match &archive {
                        Some((store, prefix)) => {
                            consumer.with_archive_cleanup(store.clone(), prefix.as_str())
                        }
                        None => consumer,
                    };
                    if let Err(error) = consumer.consume(handler.as_ref()).await {
                        warn!(consumer = name, error = %error, "queue consumption failed");
                    }
                }
                Err(error) => {
                    warn!(consumer = name, error = %error, "invalid consumer configuration");
                    break;
                }
            }

            tokio::select! {
                () = tokio::time::sleep(CONSUMER_PAUSE) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    });
}

async fn reconcile_once(
    mutex: &MutexService,
    tracker: &PriorityLifecycleTracker,
    class: &PriorityClass,
    owner: &str,
) -> AppResult<()> {
    let lock_key = format!("reconcile:{}", class.limit.key);
    let policy = LockRetryPolicy {
        max_attempts: 1,
        retry_interval: Duration::ZERO,
    };

    match mutex
        .with_lock(lock_key.as_str(), RECONCILE_LOCK_LEASE, owner, policy, || async {
            tracker.reconcile(class).await
        })
        .await
    {
        Ok(_) => Ok(()),
        // Another worker is reconciling this class.
        Err(AppError::LockUnavailable(_)) => Ok(()),
        Err(error) => Err(error),
    }
}

async fn connect_coordination_store(store: &CoordinationStore) -> AppResult<CoordinationBackends> {
    match store {
        CoordinationStore::Redis { url, key_prefix } => {
            let client = redis::Client::open(url.as_str()).map_err(|error| {
                AppError::Internal(format!("failed to create redis client: {error}"))
            })?;
            Ok(CoordinationBackends {
                semaphores: Arc::new(RedisSemaphoreRepository::new(
                    client.clone(),
                    key_prefix.as_str(),
                )),
                locks: Arc::new(RedisLockRepository::new(client, key_prefix.as_str())),
            })
        }
        CoordinationStore::Postgres { database_url } => {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(database_url.as_str())
                .await
                .map_err(|error| {
                    AppError::Internal(format!("failed to connect to database: {error}"))
                })?;
            Ok(CoordinationBackends {
                semaphores: Arc::new(PostgresSemaphoreRepository::new(pool.clone())),
                locks: Arc::new(PostgresLockRepository::new(pool)),
            })
        }
        CoordinationStore::Memory => {
            warn!("using in-memory coordination store; limits are not shared between workers");
            Ok(CoordinationBackends {
                semaphores: Arc::new(InMemorySemaphoreRepository::new()),
                locks: Arc::new(InMemoryLockRepository::new()),
            })
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}
