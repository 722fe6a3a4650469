//! Infrastructure adapters for application ports.

#![forbid(unsafe_code)]

mod in_memory_coordination_store;
mod in_memory_message_queue;
mod in_memory_object_store;
mod in_memory_workflow_execution_service;
mod postgres_lock_repository;
mod postgres_semaphore_repository;
mod redis_lock_repository;
mod redis_semaphore_repository;
mod s3_object_store;
mod sfn_workflow_execution_service;
mod sqs_message_queue;

pub use in_memory_coordination_store::{InMemoryLockRepository, InMemorySemaphoreRepository};
pub use in_memory_message_queue::InMemoryMessageQueue;
pub use in_memory_object_store::InMemoryObjectStore;
pub use in_memory_workflow_execution_service::InMemoryWorkflowExecutionService;
pub use postgres_lock_repository::PostgresLockRepository;
pub use postgres_semaphore_repository::PostgresSemaphoreRepository;
pub use redis_lock_repository::RedisLockRepository;
pub use redis_semaphore_repository::RedisSemaphoreRepository;
pub use s3_object_store::S3ObjectStore;
pub use sfn_workflow_execution_service::SfnWorkflowExecutionService;
pub use sqs_message_queue::SqsMessageQueue;
