use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use cirrus_core::{AppError, AppResult};
use cirrus_domain::{ExecutionDescriptor, ExecutionStatus, LockRecord, QueueMessage, SemaphoreRecord};

use crate::coordination_ports::{
    LockRepository, MessageQueue, ObjectStore, SemaphoreRepository, StartedExecution,
    StoredObject, WorkflowExecutionService,
};

#[derive(Default)]
pub struct FakeSemaphoreRepository {
    values: Mutex<HashMap<String, u64>>,
}

impl FakeSemaphoreRepository {
    pub async fn value(&self, key: &str) -> u64 {
        self.values.lock().await.get(key).copied().unwrap_or_default()
    }
}

#[async_trait]
impl SemaphoreRepository for FakeSemaphoreRepository {
    async fn try_increment(&self, key: &str, max: u64) -> AppResult<Option<u64>> {
        let mut values = self.values.lock().await;
        let current = values.get(key).copied().unwrap_or_default();
        if current >= max {
            return Ok(None);
        }
        values.insert(key.to_owned(), current + 1);
        Ok(Some(current + 1))
    }

    async fn decrement(&self, key: &str) -> AppResult<u64> {
        let mut values = self.values.lock().await;
        let next = values.get(key).copied().unwrap_or_default().saturating_sub(1);
        values.insert(key.to_owned(), next);
        Ok(next)
    }

    async fn find(&self, key: &str) -> AppResult<Option<SemaphoreRecord>> {
        self.values
            .lock()
            .await
            .get(key)
            .map(|value| SemaphoreRecord::new(key, *value))
            .transpose()
    }

    async fn list(&self) -> AppResult<Vec<SemaphoreRecord>> {
        self.values
            .lock()
            .await
            .iter()
            .map(|(key, value)| SemaphoreRecord::new(key.as_str(), *value))
            .collect()
    }

    async fn overwrite(&self, key: &str, value: u64) -> AppResult<()> {
        self.values.lock().await.insert(key.to_owned(), value);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeLockRepository {
    records: Mutex<HashMap<String, LockRecord>>,
}

#[async_trait]
impl LockRepository for FakeLockRepository {
    async fn put_if_absent_or_expired(
        &self,
        claim: &LockRecord,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let mut records = self.records.lock().await;
        if records
            .get(claim.key())
            .is_some_and(|existing| !existing.is_expired_at(now))
        {
            return Ok(false);
        }
        records.insert(claim.key().to_owned(), claim.clone());
        Ok(true)
    }

    async fn find(&self, key: &str) -> AppResult<Option<LockRecord>> {
        Ok(self.records.lock().await.get(key).cloned())
    }

    async fn delete_if_owner(&self, key: &str, owner: &str) -> AppResult<bool> {
        let mut records = self.records.lock().await;
        if records.get(key).is_some_and(|record| record.is_owned_by(owner)) {
            records.remove(key);
            return Ok(true);
        }
        Ok(false)
    }
}

#[derive(Default)]
pub struct FakeObjectStore {
    objects: Mutex<BTreeMap<String, DateTime<Utc>>>,
    pub fail_deletes: AtomicBool,
}

impl FakeObjectStore {
    pub async fn insert_at(&self, key: &str, last_modified: DateTime<Utc>) {
        self.objects
            .lock()
            .await
            .insert(key.to_owned(), last_modified);
    }

    pub async fn keys(&self) -> Vec<String> {
        self.objects.lock().await.keys().cloned().collect()
    }
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn put_object(&self, key: &str, _body: Vec<u8>) -> AppResult<()> {
        let mut objects = self.objects.lock().await;
        // Strictly increasing stamps keep write order visible to lease ranking.
        let latest = objects.values().max().copied();
        let stamp = match latest {
            Some(latest) if latest >= Utc::now() => latest + chrono::Duration::microseconds(1),
            _ => Utc::now(),
        };
        objects.insert(key.to_owned(), stamp);
        Ok(())
    }

    async fn list_objects(&self, prefix: &str) -> AppResult<Vec<StoredObject>> {
        Ok(self
            .objects
            .lock()
            .await
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, last_modified)| StoredObject {
                key: key.clone(),
                last_modified: *last_modified,
            })
            .collect())
    }

    async fn delete_object(&self, key: &str) -> AppResult<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(AppError::Internal("object store unavailable".to_owned()));
        }
        self.objects.lock().await.remove(key);
        Ok(())
    }
}

#[derive(Default)]
struct FakeQueueState {
    pending: HashMap<String, VecDeque<(String, String)>>,
    in_flight: HashMap<String, (String, String, String)>,
    deleted: Vec<(String, String)>,
    receive_calls: HashMap<String, usize>,
    next_id: u64,
}

#[derive(Default)]
pub struct FakeMessageQueue {
    state: Mutex<FakeQueueState>,
}

impl FakeMessageQueue {
    pub async fn send(&self, queue_id: &str, body: impl Into<String>) -> String {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let message_id = format!("m-{}", state.next_id);
        state
            .pending
            .entry(queue_id.to_owned())
            .or_default()
            .push_back((message_id.clone(), body.into()));
        message_id
    }

    pub async fn pending_count(&self, queue_id: &str) -> usize {
        self.state
            .lock()
            .await
            .pending
            .get(queue_id)
            .map_or(0, VecDeque::len)
    }

    pub async fn deleted_ids(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .deleted
            .iter()
            .map(|(_, message_id)| message_id.clone())
            .collect()
    }

    pub async fn receive_calls(&self, queue_id: &str) -> usize {
        self.state
            .lock()
            .await
            .receive_calls
            .get(queue_id)
            .copied()
            .unwrap_or_default()
    }

    /// Returns every undeleted in-flight message to its queue.
    pub async fn expire_visibility(&self) {
        let mut state = self.state.lock().await;
        let in_flight: Vec<_> = state.in_flight.drain().map(|(_, value)| value).collect();
        for (queue_id, message_id, body) in in_flight {
            state
                .pending
                .entry(queue_id)
                .or_default()
                .push_back((message_id, body));
        }
    }
}

#[async_trait]
impl MessageQueue for FakeMessageQueue {
    async fn receive_messages(
        &self,
        queue_id: &str,
        max_messages: usize,
        _visibility_timeout: Duration,
    ) -> AppResult<Vec<QueueMessage>> {
        let mut state = self.state.lock().await;
        *state.receive_calls.entry(queue_id.to_owned()).or_default() += 1;

        let mut received = Vec::new();
        for _ in 0..max_messages.min(10) {
            let Some((message_id, body)) = state
                .pending
                .get_mut(queue_id)
                .and_then(VecDeque::pop_front)
            else {
                break;
            };
            state.next_id += 1;
            let receipt_handle = format!("receipt-{}", state.next_id);
            state.in_flight.insert(
                receipt_handle.clone(),
                (queue_id.to_owned(), message_id.clone(), body.clone()),
            );
            received.push(QueueMessage::new(message_id, body, receipt_handle)?);
        }

        Ok(received)
    }

    async fn delete_message(&self, queue_id: &str, receipt_handle: &str) -> AppResult<()> {
        let mut state = self.state.lock().await;
        if let Some((_, message_id, _)) = state.in_flight.remove(receipt_handle) {
            state.deleted.push((queue_id.to_owned(), message_id));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeExecutionService {
    pub running: AtomicU64,
    pub fail_starts: AtomicBool,
    started: Mutex<Vec<ExecutionDescriptor>>,
    names: Mutex<HashSet<(String, String)>>,
}

impl FakeExecutionService {
    pub fn with_running(running: u64) -> Self {
        let service = Self::default();
        service.running.store(running, Ordering::SeqCst);
        service
    }

    pub async fn started(&self) -> Vec<ExecutionDescriptor> {
        self.started.lock().await.clone()
    }
}

#[async_trait]
impl WorkflowExecutionService for FakeExecutionService {
    async fn start_execution(
        &self,
        descriptor: &ExecutionDescriptor,
    ) -> AppResult<StartedExecution> {
        if self.fail_starts.load(Ordering::SeqCst) {
            return Err(AppError::Internal("workflow service throttled".to_owned()));
        }

        let identity = (
            descriptor.target_workflow().to_owned(),
            descriptor.name().to_owned(),
        );
        if !self.names.lock().await.insert(identity) {
            return Err(AppError::ExecutionAlreadyExists(descriptor.name().to_owned()));
        }

        self.started.lock().await.push(descriptor.clone());
        self.running.fetch_add(1, Ordering::SeqCst);
        Ok(StartedExecution {
            execution_id: format!("{}:{}", descriptor.target_workflow(), descriptor.name()),
            started_at: Utc::now(),
        })
    }

    async fn count_running_executions(&self, _target_workflow: &str) -> AppResult<u64> {
        Ok(self.running.load(Ordering::SeqCst))
    }

    async fn describe_execution(&self, _execution_id: &str) -> AppResult<ExecutionStatus> {
        Ok(ExecutionStatus::Running)
    }
}
