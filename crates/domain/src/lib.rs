//! Domain entities and invariants.

#![forbid(unsafe_code)]

mod execution;
mod lease;
mod lock;
mod queue;
mod semaphore;

pub use execution::{
    EXECUTION_NAME_MAX_LENGTH, ExecutionDescriptor, ExecutionStatus, StartRequest,
    WorkflowStatusEvent,
};
pub use lease::{PROVIDER_LEASE_NAMESPACE, PROVIDER_LEASE_STALE_AFTER_SECONDS, ProviderLease};
pub use lock::{LockRecord, LockState};
pub use queue::{MAX_RECEIVE_MESSAGES, QueueMessage, archived_message_key, queue_name};
pub use semaphore::{PriorityLimit, SemaphoreRecord};
