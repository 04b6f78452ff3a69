//! TaskStore port - タスク・イベント・キューの正本（source of truth）
//!
//! TaskStore は以下を管理します：
//! - キュー名（作成は冪等）
//! - タスク行（Queued / Failed）と次に実行すべきタスクの選択
//! - イベント行（追記のみ、削除は明示 or 経過日数）
//!
//! # 設計原則
//! - 存在しないタスク行への更新は何もしない（マネージャが並行して消している可能性がある）
//! - タイムスタンプはすべて注入された Clock から取る
//! - 実装: `impls::SqliteTaskStore`（本番）、`impls::InMemoryTaskStore`（テスト）

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    EncodedTask, Event, EventId, EventRecord, QueueName, ScheduledTask, StoreError, TaskCategory,
    TaskId, TaskRecord,
};

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Idempotent.
    async fn create_queue(&self, name: &QueueName) -> Result<(), StoreError>;

    async fn queue_names(&self) -> Result<Vec<QueueName>, StoreError>;

    /// Names of queues with at least one Queued task.
    async fn pending_queue_names(&self) -> Result<Vec<QueueName>, StoreError>;

    /// Insert a Queued row with `queued_at = retry_at = now`; creates the queue if missing.
    async fn enqueue_task(&self, queue: &QueueName, task: &EncodedTask)
    -> Result<TaskId, StoreError>;

    /// Earliest Queued row by (`retry_at`, `priority`, `id`).
    async fn next_task(&self, queue: &QueueName) -> Result<Option<ScheduledTask>, StoreError>;

    /// Replace the stored payload and metadata (progress save).
    async fn update_task(&self, id: TaskId, task: &EncodedTask) -> Result<(), StoreError>;

    /// Successful completion removes the row.
    async fn set_task_completed(&self, id: TaskId) -> Result<(), StoreError>;

    async fn requeue_task(
        &self,
        id: TaskId,
        retry_at: DateTime<Utc>,
        retries: u32,
        task: Option<&EncodedTask>,
    ) -> Result<(), StoreError>;

    async fn delete_task(&self, id: TaskId) -> Result<(), StoreError>;

    async fn set_task_failed(
        &self,
        id: TaskId,
        message: &str,
        task: Option<&EncodedTask>,
    ) -> Result<(), StoreError>;

    /// Newest first.
    async fn tasks(&self) -> Result<Vec<TaskRecord>, StoreError>;

    /// Append an event. When `task_id` names a task that no longer exists,
    /// nothing is stored and `None` is returned.
    async fn store_event(
        &self,
        task_id: Option<TaskId>,
        event: &Event,
    ) -> Result<Option<EventId>, StoreError>;

    /// Oldest first.
    async fn events(&self) -> Result<Vec<EventRecord>, StoreError>;

    /// Number of stored events, readable or not.
    async fn count_events(&self) -> Result<usize, StoreError>;

    async fn task_events(&self, task_id: TaskId) -> Result<Vec<EventRecord>, StoreError>;

    async fn delete_event(&self, id: EventId) -> Result<(), StoreError>;

    /// Any Queued task with this category?
    async fn has_active_tasks(&self, category: TaskCategory) -> Result<bool, StoreError>;

    /// Remove tasks queued more than `days` ago; returns the number removed.
    async fn delete_tasks_older_than(&self, days: u32) -> Result<usize, StoreError>;

    /// Remove events recorded more than `days` ago; returns the number removed.
    async fn delete_events_older_than(&self, days: u32) -> Result<usize, StoreError>;
}
