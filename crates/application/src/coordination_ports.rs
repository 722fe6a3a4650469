mod execution;
mod handler;
mod lock;
mod object_store;
mod queue;
mod semaphore;

pub use execution::{StartedExecution, WorkflowExecutionService};
pub use handler::{FixedDeadline, InvocationDeadline, MessageHandler};
pub use lock::LockRepository;
pub use object_store::{ObjectStore, StoredObject};
pub use queue::MessageQueue;
pub use semaphore::SemaphoreRepository;
