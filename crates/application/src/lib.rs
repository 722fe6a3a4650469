//! Application services and ports.

#![forbid(unsafe_code)]

mod coordination_ports;

mod execution_dispatcher;
mod execution_starter;
mod lifecycle_tracker;
mod mutex_service;
mod provider_lock_service;
mod queue_consumer;
mod semaphore_service;

#[cfg(test)]
mod test_support;

pub use coordination_ports::{
    FixedDeadline, InvocationDeadline, LockRepository, MessageHandler, MessageQueue, ObjectStore,
    SemaphoreRepository, StartedExecution, StoredObject, WorkflowExecutionService,
};
pub use execution_dispatcher::{ThrottledDispatcherConfig, ThrottledExecutionDispatcher};
pub use execution_starter::{BatchItemFailure, BatchResponse, ExecutionStarter, SourceMappingRecord};
pub use lifecycle_tracker::{PriorityClass, PriorityLifecycleTracker};
pub use mutex_service::{LockRetryPolicy, MutexService};
pub use provider_lock_service::{ProviderConnectionLock, ProviderLockConfig};
pub use queue_consumer::{QueueConsumerConfig, RateLimitedQueueConsumer};
pub use semaphore_service::SemaphoreService;
