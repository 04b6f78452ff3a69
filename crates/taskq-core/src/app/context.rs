//! TaskContext - 実行中のタスクに渡されるハンドル
//!
//! キャンセル要求の確認、失敗理由や再実行までの遅延の指定、
//! イベント記録と途中経過の保存をタスク本体から行うための窓口です。

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::QueueManager;
use crate::domain::{Event, EventId, QueueName, SchedulerError, TaskId, WorkerId};
use crate::typed::Task;

/// Handle passed to `Task::execute` for one attempt.
///
/// Cheap to clone; clones share the same cancel flag and scratch state.
#[derive(Clone)]
pub struct TaskContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    task_id: TaskId,
    queue: QueueName,
    worker_id: WorkerId,
    retries: u32,
    cancel: CancellationToken,
    manager: Arc<QueueManager>,
    scratch: Mutex<Scratch>,
}

struct Scratch {
    last_error: Option<String>,
    retry_delay: Duration,
}

impl TaskContext {
    pub(crate) fn new(
        manager: Arc<QueueManager>,
        task_id: TaskId,
        queue: QueueName,
        worker_id: WorkerId,
        retries: u32,
        cancel: CancellationToken,
        retry_delay: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                task_id,
                queue,
                worker_id,
                retries,
                cancel,
                manager,
                scratch: Mutex::new(Scratch {
                    last_error: None,
                    retry_delay,
                }),
            }),
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.inner.task_id
    }

    pub fn queue(&self) -> &QueueName {
        &self.inner.queue
    }

    pub fn worker_id(&self) -> WorkerId {
        self.inner.worker_id
    }

    /// Number of times this task has been requeued before this attempt.
    pub fn retries(&self) -> u32 {
        self.inner.retries
    }

    /// Has `QueueManager::delete_task` asked this task to stop?
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        self.inner.cancel.cancelled().await
    }

    pub fn last_error(&self) -> Option<String> {
        self.scratch().last_error.clone()
    }

    /// Message recorded if this attempt ends as Failed.
    pub fn set_last_error(&self, message: impl Into<String>) {
        self.scratch().last_error = Some(message.into());
    }

    pub fn retry_delay(&self) -> Duration {
        self.scratch().retry_delay
    }

    /// Delay applied if this attempt returns `TaskStatus::Requeue`.
    pub fn set_retry_delay(&self, delay: Duration) {
        self.scratch().retry_delay = delay;
    }

    /// Record an event against this task.
    pub async fn store_event(&self, event: Event) -> Result<Option<EventId>, SchedulerError> {
        self.inner
            .manager
            .store_task_event(self.inner.task_id, event)
            .await
    }

    /// Persist the task's current state so a restart resumes from here.
    pub async fn save(&self, task: &dyn Task) -> Result<(), SchedulerError> {
        self.inner.manager.update_task(self.inner.task_id, task).await
    }

    fn scratch(&self) -> MutexGuard<'_, Scratch> {
        self.inner
            .scratch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("task_id", &self.inner.task_id)
            .field("queue", &self.inner.queue)
            .field("worker_id", &self.inner.worker_id)
            .field("retries", &self.inner.retries)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::SchedulerBuilder;
    use crate::impls::InMemoryTaskStore;

    fn context(manager: Arc<QueueManager>, cancel: CancellationToken) -> TaskContext {
        TaskContext::new(
            manager,
            TaskId::from_raw(1),
            QueueName::main(),
            WorkerId::from_ulid(ulid::Ulid::new()),
            2,
            cancel,
            Duration::from_secs(30),
        )
    }

    fn manager() -> Arc<QueueManager> {
        SchedulerBuilder::new()
            .store(Arc::new(InMemoryTaskStore::new()))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn scratch_state_is_shared_between_clones() {
        let ctx = context(manager(), CancellationToken::new());
        let clone = ctx.clone();

        assert_eq!(ctx.last_error(), None);
        clone.set_last_error("network down");
        clone.set_retry_delay(Duration::from_secs(5));

        assert_eq!(ctx.last_error().as_deref(), Some("network down"));
        assert_eq!(ctx.retry_delay(), Duration::from_secs(5));
        assert_eq!(ctx.retries(), 2);
    }

    #[tokio::test]
    async fn cancel_token_is_observed() {
        let cancel = CancellationToken::new();
        let ctx = context(manager(), cancel.clone());
        assert!(!ctx.is_cancelled());

        cancel.cancel();
        assert!(ctx.is_cancelled());
        // 既にキャンセル済みなら即座に返る
        ctx.cancelled().await;
    }

    #[tokio::test]
    async fn events_for_missing_task_are_dropped() {
        let ctx = context(manager(), CancellationToken::new());
        let stored = ctx.store_event(Event::progress("orphan")).await.unwrap();
        assert!(stored.is_none());
    }
}
