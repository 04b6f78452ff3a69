//! QueueManager - キューとワーカーの監督者
//!
//! # 責務
//! - タスク投入の唯一の入口（永続化してからワーカーを起こす／起動する）
//! - キュー名ごとに高々 1 つのワーカーを保証する（active テーブルを単一の Mutex で保護）
//! - 実行中タスクへのキャンセル要求
//! - 変更通知（タスク／イベント）の発行
//!
//! # ロック規約
//! - `state` は claim / complete / enqueue / delete / purge の間だけ保持する
//! - タスク本体の実行中は決して保持しない

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::notifier::{Notifier, Topic};
use super::status::SchedulerStatus;
use super::worker_loop::QueueWorker;
use crate::domain::{
    Event, EventId, EventRecord, QueueName, RetryPolicy, SchedulerError, TaskCategory, TaskId,
    TaskRecord, WorkerId,
};
use crate::ports::{ChangeListener, Clock, IdGenerator, TaskStore};
use crate::typed::{PayloadCodec, RestoredTask, Task};

/// The task a worker is executing right now.
pub(crate) struct RunningTask {
    pub(crate) task_id: TaskId,
    pub(crate) cancel: CancellationToken,
}

/// Runtime entry for one live queue worker.
pub(crate) struct ActiveQueue {
    pub(crate) worker_id: WorkerId,
    pub(crate) wake: Arc<Notify>,
    pub(crate) running: Option<RunningTask>,
    pub(crate) join: Option<JoinHandle<()>>,
}

impl ActiveQueue {
    fn is_alive(&self) -> bool {
        self.join.as_ref().is_none_or(|join| !join.is_finished())
    }
}

/// State guarded by the manager lock.
#[derive(Default)]
pub(crate) struct ManagerState {
    active: HashMap<QueueName, ActiveQueue>,
    closed: bool,
}

impl ManagerState {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn on_queue_starting(&mut self, queue: QueueName, entry: ActiveQueue) {
        info!(queue = %queue, worker = %entry.worker_id, "queue starting");
        self.active.insert(queue, entry);
    }

    /// Removes the entry only if it still belongs to `worker_id`; a newer
    /// worker may already own the name.
    pub(crate) fn on_queue_terminating(&mut self, queue: &QueueName, worker_id: WorkerId) -> bool {
        match self.active.get(queue) {
            Some(entry) if entry.worker_id == worker_id => {
                self.active.remove(queue);
                info!(queue = %queue, worker = %worker_id, "queue terminating");
                true
            }
            _ => false,
        }
    }

    pub(crate) fn set_running(&mut self, queue: &QueueName, worker_id: WorkerId, task: RunningTask) {
        if let Some(entry) = self.active.get_mut(queue)
            && entry.worker_id == worker_id
        {
            entry.running = Some(task);
        }
    }

    pub(crate) fn clear_running(&mut self, queue: &QueueName, worker_id: WorkerId) {
        if let Some(entry) = self.active.get_mut(queue)
            && entry.worker_id == worker_id
        {
            entry.running = None;
        }
    }

    fn running_cancel(&self, task_id: TaskId) -> Option<&CancellationToken> {
        self.active
            .values()
            .filter_map(|entry| entry.running.as_ref())
            .find(|running| running.task_id == task_id)
            .map(|running| &running.cancel)
    }

    fn running_tasks(&self) -> HashMap<QueueName, TaskId> {
        self.active
            .iter()
            .filter_map(|(name, entry)| entry.running.as_ref().map(|r| (name.clone(), r.task_id)))
            .collect()
    }
}

/// Supervisor of all queue workers. Construct with `SchedulerBuilder`.
pub struct QueueManager {
    pub(crate) store: Arc<dyn TaskStore>,
    pub(crate) codec: PayloadCodec,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) retry: RetryPolicy,
    pub(crate) state: Mutex<ManagerState>,
    pub(crate) notifier: Notifier,
    ids: Arc<dyn IdGenerator>,
    shutdown_tx: watch::Sender<bool>,
}

impl QueueManager {
    pub(crate) fn new(
        store: Arc<dyn TaskStore>,
        codec: PayloadCodec,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        retry: RetryPolicy,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            store,
            codec,
            clock,
            retry,
            state: Mutex::new(ManagerState::default()),
            notifier: Notifier::new(),
            ids,
            shutdown_tx,
        }
    }

    // ========================================
    // 投入・起動
    // ========================================

    /// Persist a task and make sure its queue has a worker.
    ///
    /// Fails with `CodecError::UnknownKind` for kinds not registered with the
    /// builder, and with `SchedulerError::ShutDown` after `shutdown`.
    pub async fn enqueue_task(
        self: &Arc<Self>,
        queue: impl Into<QueueName>,
        task: impl Task,
    ) -> Result<TaskId, SchedulerError> {
        let queue = queue.into();
        let encoded = self.codec.encode(&task)?;
        let id = {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(SchedulerError::ShutDown);
            }
            let id = self.store.enqueue_task(&queue, &encoded).await?;
            self.wake_or_start(&mut state, &queue);
            id
        };
        info!(task = %id, queue = %queue, kind = %encoded.kind, "task enqueued");
        self.notifier.notify(Topic::Tasks);
        Ok(id)
    }

    /// Persist a task without starting a worker for its queue.
    ///
    /// A worker already running for the queue is woken. Otherwise the row
    /// stays Queued until `bootstrap` / `init_all_queues` or the next
    /// `enqueue_task` on the same queue.
    pub async fn persist_task(
        &self,
        queue: impl Into<QueueName>,
        task: impl Task,
    ) -> Result<TaskId, SchedulerError> {
        let queue = queue.into();
        let encoded = self.codec.encode(&task)?;
        let id = {
            let state = self.state.lock().await;
            if state.closed {
                return Err(SchedulerError::ShutDown);
            }
            let id = self.store.enqueue_task(&queue, &encoded).await?;
            if let Some(entry) = state.active.get(&queue)
                && entry.is_alive()
            {
                entry.wake.notify_one();
            }
            id
        };
        info!(task = %id, queue = %queue, kind = %encoded.kind, "task persisted");
        self.notifier.notify(Topic::Tasks);
        Ok(id)
    }

    /// Ensure the default queues exist, then resume every queue with pending work.
    pub async fn bootstrap(self: &Arc<Self>) -> Result<usize, SchedulerError> {
        self.store.create_queue(&QueueName::main()).await?;
        self.store.create_queue(&QueueName::small_jobs()).await?;
        let started = self.init_all_queues().await?;
        info!(started, "queue manager bootstrapped");
        Ok(started)
    }

    /// Start (or wake) a worker for every queue that has Queued tasks.
    pub async fn init_all_queues(self: &Arc<Self>) -> Result<usize, SchedulerError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Ok(0);
        }
        let pending = self.store.pending_queue_names().await?;
        for queue in &pending {
            self.wake_or_start(&mut state, queue);
        }
        Ok(pending.len())
    }

    fn wake_or_start(self: &Arc<Self>, state: &mut ManagerState, queue: &QueueName) {
        if let Some(entry) = state.active.get(queue) {
            if entry.is_alive() {
                entry.wake.notify_one();
                return;
            }
            warn!(queue = %queue, worker = %entry.worker_id, "replacing finished worker");
            state.active.remove(queue);
        }

        let worker_id = self.ids.generate_worker_id();
        let wake = Arc::new(Notify::new());
        let worker = QueueWorker::new(
            self.clone(),
            queue.clone(),
            worker_id,
            wake.clone(),
            self.shutdown_tx.subscribe(),
        );
        state.on_queue_starting(
            queue.clone(),
            ActiveQueue {
                worker_id,
                wake,
                running: None,
                join: None,
            },
        );
        // ワーカーは state のロックを取るまで進めないので、join を後から入れても間に合う
        let join = tokio::spawn(worker.run());
        if let Some(entry) = state.active.get_mut(queue)
            && entry.worker_id == worker_id
        {
            entry.join = Some(join);
        }
    }

    /// Stop claiming new tasks and wait for running ones to finish.
    ///
    /// Running tasks are not cancelled; their rows keep whatever state the
    /// attempt produces, and Queued rows are resumed by the next `bootstrap`.
    pub async fn shutdown(&self) {
        let joins: Vec<JoinHandle<()>> = {
            let mut state = self.state.lock().await;
            state.closed = true;
            self.shutdown_tx.send_replace(true);
            for entry in state.active.values() {
                entry.wake.notify_one();
            }
            state
                .active
                .values_mut()
                .filter_map(|entry| entry.join.take())
                .collect()
        };
        for join in joins {
            if let Err(err) = join.await {
                warn!(error = %err, "queue worker did not exit cleanly");
            }
        }
        info!("queue manager shut down");
    }

    // ========================================
    // 削除・掃除
    // ========================================

    /// Delete a task. A running task is asked to cancel instead; its worker
    /// removes the row once the task returns.
    pub async fn delete_task(&self, id: TaskId) -> Result<(), SchedulerError> {
        {
            let state = self.state.lock().await;
            if let Some(cancel) = state.running_cancel(id) {
                cancel.cancel();
                info!(task = %id, "cancel requested for running task");
            } else {
                self.store.delete_task(id).await?;
                info!(task = %id, "task deleted");
            }
        }
        self.notifier.notify(Topic::Events);
        self.notifier.notify(Topic::Tasks);
        Ok(())
    }

    pub async fn delete_event(&self, id: EventId) -> Result<(), SchedulerError> {
        {
            let _state = self.state.lock().await;
            self.store.delete_event(id).await?;
        }
        self.notifier.notify(Topic::Events);
        Ok(())
    }

    pub async fn delete_tasks_older_than(&self, days: u32) -> Result<usize, SchedulerError> {
        let removed = {
            let _state = self.state.lock().await;
            self.store.delete_tasks_older_than(days).await?
        };
        info!(days, removed, "purged old tasks");
        self.notifier.notify(Topic::Tasks);
        Ok(removed)
    }

    pub async fn delete_events_older_than(&self, days: u32) -> Result<usize, SchedulerError> {
        let removed = {
            let _state = self.state.lock().await;
            self.store.delete_events_older_than(days).await?
        };
        info!(days, removed, "purged old events");
        self.notifier.notify(Topic::Events);
        Ok(removed)
    }

    // ========================================
    // イベント・途中保存
    // ========================================

    /// Record an event against a task. Returns `None` if the task is gone.
    pub async fn store_task_event(
        &self,
        task_id: TaskId,
        event: Event,
    ) -> Result<Option<EventId>, SchedulerError> {
        let id = self.store.store_event(Some(task_id), &event).await?;
        if id.is_some() {
            self.notifier.notify(Topic::Events);
        }
        Ok(id)
    }

    /// Record a queue-level event not tied to any task.
    pub async fn store_event(&self, event: Event) -> Result<EventId, SchedulerError> {
        let id = self.store.store_event(None, &event).await?;
        self.notifier.notify(Topic::Events);
        // task_id なしのイベントは必ず保存される
        id.ok_or_else(|| {
            crate::domain::StoreError::Corrupt("queue-level event was not stored".into()).into()
        })
    }

    /// Save a task's current payload (progress) without changing its state.
    pub async fn update_task(&self, id: TaskId, task: &dyn Task) -> Result<(), SchedulerError> {
        let encoded = self.codec.encode(task)?;
        self.store.update_task(id, &encoded).await?;
        self.notifier.notify(Topic::Tasks);
        Ok(())
    }

    // ========================================
    // 参照系
    // ========================================

    pub async fn tasks(&self) -> Result<Vec<TaskRecord>, SchedulerError> {
        Ok(self.store.tasks().await?)
    }

    pub async fn events(&self) -> Result<Vec<EventRecord>, SchedulerError> {
        Ok(self.store.events().await?)
    }

    pub async fn task_events(&self, id: TaskId) -> Result<Vec<EventRecord>, SchedulerError> {
        Ok(self.store.task_events(id).await?)
    }

    pub async fn has_active_tasks(&self, category: TaskCategory) -> Result<bool, SchedulerError> {
        Ok(self.store.has_active_tasks(category).await?)
    }

    pub async fn queue_names(&self) -> Result<Vec<QueueName>, SchedulerError> {
        Ok(self.store.queue_names().await?)
    }

    /// Decode a stored task; unreadable payloads come back as `Legacy`.
    pub fn restore_task(&self, record: &TaskRecord) -> RestoredTask {
        self.codec.restore(record)
    }

    /// Names of queues that currently have a worker, sorted.
    pub async fn active_queues(&self) -> Vec<QueueName> {
        let state = self.state.lock().await;
        let mut names: Vec<QueueName> = state.active.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn is_queue_active(&self, queue: &QueueName) -> bool {
        self.state.lock().await.active.contains_key(queue)
    }

    pub async fn status(&self) -> Result<SchedulerStatus, SchedulerError> {
        let names = self.store.queue_names().await?;
        let tasks = self.store.tasks().await?;
        let event_count = self.store.count_events().await?;
        let (active, running) = {
            let state = self.state.lock().await;
            let active: Vec<QueueName> = state.active.keys().cloned().collect();
            (active, state.running_tasks())
        };
        Ok(SchedulerStatus::collect(
            &names,
            &tasks,
            &active,
            &running,
            event_count,
            self.now(),
        ))
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ========================================
    // リスナー
    // ========================================

    pub fn register_task_listener(&self, listener: &Arc<dyn ChangeListener>) {
        self.notifier.register(Topic::Tasks, listener);
    }

    pub fn unregister_task_listener(&self, listener: &Arc<dyn ChangeListener>) {
        self.notifier.unregister(Topic::Tasks, listener);
    }

    pub fn register_event_listener(&self, listener: &Arc<dyn ChangeListener>) {
        self.notifier.register(Topic::Events, listener);
    }

    pub fn unregister_event_listener(&self, listener: &Arc<dyn ChangeListener>) {
        self.notifier.unregister(Topic::Events, listener);
    }

    pub fn listener_count(&self, topic: Topic) -> usize {
        self.notifier.listener_count(topic)
    }
}
