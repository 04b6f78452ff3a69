//! In-memory TaskStore implementation.
//!
//! Design:
//! - A single `tokio::sync::Mutex` guards all state.
//! - BTreeMap keyed by id keeps listings ordered without sorting.
//! - Each instance is isolated, so every test can build its own.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{
    EncodedTask, Event, EventBody, EventId, EventRecord, QueueName, ScheduledTask, StoreError,
    TaskCategory, TaskId, TaskRecord, TaskState,
};
use crate::ports::{Clock, SystemClock, TaskStore};

struct StoredEvent {
    task_id: Option<TaskId>,
    timestamp: DateTime<Utc>,
    payload: Vec<u8>,
}

#[derive(Default)]
struct InMemoryState {
    queues: BTreeSet<QueueName>,
    tasks: BTreeMap<TaskId, TaskRecord>,
    events: BTreeMap<EventId, StoredEvent>,
    next_task_id: i64,
    next_event_id: i64,
}

impl InMemoryState {
    fn allocate_task_id(&mut self) -> TaskId {
        self.next_task_id += 1;
        TaskId::from_raw(self.next_task_id)
    }

    fn allocate_event_id(&mut self) -> EventId {
        self.next_event_id += 1;
        EventId::from_raw(self.next_event_id)
    }

    fn event_count(&self, task_id: TaskId) -> usize {
        self.events
            .values()
            .filter(|e| e.task_id == Some(task_id))
            .count()
    }

    fn event_records<'a>(
        &'a self,
        filter: impl Fn(&StoredEvent) -> bool + 'a,
    ) -> impl Iterator<Item = EventRecord> + 'a {
        self.events
            .iter()
            .filter(move |(_, e)| filter(*e))
            .map(|(id, e)| EventRecord {
                id: *id,
                task_id: e.task_id,
                timestamp: e.timestamp,
                body: EventBody::decode(&e.payload),
            })
    }
}

fn apply_encoded(record: &mut TaskRecord, task: &EncodedTask) {
    record.kind = task.kind.clone();
    record.description = task.description.clone();
    record.category = task.category;
    record.priority = task.priority;
    record.payload = task.payload.clone();
}

pub struct InMemoryTaskStore {
    state: Mutex<InMemoryState>,
    clock: Arc<dyn Clock>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(InMemoryState::default()),
            clock,
        }
    }

    /// Insert raw event bytes, bypassing serialization.
    ///
    /// Lets tests and imports put payloads written by other versions into the log.
    pub async fn insert_raw_event(&self, task_id: Option<TaskId>, payload: Vec<u8>) -> EventId {
        let timestamp = self.clock.now();
        let mut state = self.state.lock().await;
        let id = state.allocate_event_id();
        state.events.insert(
            id,
            StoredEvent {
                task_id,
                timestamp,
                payload,
            },
        );
        id
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create_queue(&self, name: &QueueName) -> Result<(), StoreError> {
        self.state.lock().await.queues.insert(name.clone());
        Ok(())
    }

    async fn queue_names(&self) -> Result<Vec<QueueName>, StoreError> {
        Ok(self.state.lock().await.queues.iter().cloned().collect())
    }

    async fn pending_queue_names(&self) -> Result<Vec<QueueName>, StoreError> {
        let state = self.state.lock().await;
        let names: BTreeSet<QueueName> = state
            .tasks
            .values()
            .filter(|t| t.state.is_runnable())
            .map(|t| t.queue.clone())
            .collect();
        Ok(names.into_iter().collect())
    }

    async fn enqueue_task(
        &self,
        queue: &QueueName,
        task: &EncodedTask,
    ) -> Result<TaskId, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.queues.insert(queue.clone());
        let id = state.allocate_task_id();
        state.tasks.insert(
            id,
            TaskRecord {
                id,
                queue: queue.clone(),
                kind: task.kind.clone(),
                description: task.description.clone(),
                category: task.category,
                priority: task.priority,
                state: TaskState::Queued,
                queued_at: now,
                retry_at: now,
                retries: 0,
                failure_reason: None,
                event_count: 0,
                payload: task.payload.clone(),
            },
        );
        Ok(id)
    }

    async fn next_task(&self, queue: &QueueName) -> Result<Option<ScheduledTask>, StoreError> {
        let now = self.clock.now();
        let state = self.state.lock().await;
        let next = state
            .tasks
            .values()
            .filter(|t| &t.queue == queue && t.state.is_runnable())
            .min_by_key(|t| (t.retry_at, t.priority, t.id));
        Ok(next.map(|record| {
            let mut record = record.clone();
            record.event_count = state.event_count(record.id);
            ScheduledTask::new(record, now)
        }))
    }

    async fn update_task(&self, id: TaskId, task: &EncodedTask) -> Result<(), StoreError> {
        if let Some(record) = self.state.lock().await.tasks.get_mut(&id) {
            apply_encoded(record, task);
        }
        Ok(())
    }

    async fn set_task_completed(&self, id: TaskId) -> Result<(), StoreError> {
        self.state.lock().await.tasks.remove(&id);
        Ok(())
    }

    async fn requeue_task(
        &self,
        id: TaskId,
        retry_at: DateTime<Utc>,
        retries: u32,
        task: Option<&EncodedTask>,
    ) -> Result<(), StoreError> {
        if let Some(record) = self.state.lock().await.tasks.get_mut(&id) {
            record.state = TaskState::Queued;
            record.retry_at = retry_at;
            record.retries = retries;
            if let Some(task) = task {
                apply_encoded(record, task);
            }
        }
        Ok(())
    }

    async fn delete_task(&self, id: TaskId) -> Result<(), StoreError> {
        self.state.lock().await.tasks.remove(&id);
        Ok(())
    }

    async fn set_task_failed(
        &self,
        id: TaskId,
        message: &str,
        task: Option<&EncodedTask>,
    ) -> Result<(), StoreError> {
        if let Some(record) = self.state.lock().await.tasks.get_mut(&id) {
            record.state = TaskState::Failed;
            record.failure_reason = Some(message.to_string());
            if let Some(task) = task {
                apply_encoded(record, task);
            }
        }
        Ok(())
    }

    async fn tasks(&self) -> Result<Vec<TaskRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .tasks
            .values()
            .rev()
            .map(|record| {
                let mut record = record.clone();
                record.event_count = state.event_count(record.id);
                record
            })
            .collect())
    }

    async fn store_event(
        &self,
        task_id: Option<TaskId>,
        event: &Event,
    ) -> Result<Option<EventId>, StoreError> {
        let payload = event.encode()?;
        let timestamp = self.clock.now();
        let mut state = self.state.lock().await;
        if let Some(task_id) = task_id
            && !state.tasks.contains_key(&task_id)
        {
            return Ok(None);
        }
        let id = state.allocate_event_id();
        state.events.insert(
            id,
            StoredEvent {
                task_id,
                timestamp,
                payload,
            },
        );
        Ok(Some(id))
    }

    async fn events(&self) -> Result<Vec<EventRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.event_records(|_| true).collect())
    }

    async fn count_events(&self) -> Result<usize, StoreError> {
        Ok(self.state.lock().await.events.len())
    }

    async fn task_events(&self, task_id: TaskId) -> Result<Vec<EventRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .event_records(move |e| e.task_id == Some(task_id))
            .collect())
    }

    async fn delete_event(&self, id: EventId) -> Result<(), StoreError> {
        self.state.lock().await.events.remove(&id);
        Ok(())
    }

    async fn has_active_tasks(&self, category: TaskCategory) -> Result<bool, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .tasks
            .values()
            .any(|t| t.category == category && t.state.is_runnable()))
    }

    async fn delete_tasks_older_than(&self, days: u32) -> Result<usize, StoreError> {
        let cutoff = self.clock.days_ago(days);
        let mut state = self.state.lock().await;
        let before = state.tasks.len();
        state.tasks.retain(|_, t| t.queued_at >= cutoff);
        Ok(before - state.tasks.len())
    }

    async fn delete_events_older_than(&self, days: u32) -> Result<usize, StoreError> {
        let cutoff = self.clock.days_ago(days);
        let mut state = self.state.lock().await;
        let before = state.events.len();
        state.events.retain(|_, e| e.timestamp >= cutoff);
        Ok(before - state.events.len())
    }
}
