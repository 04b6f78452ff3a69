//! WorkerLoop - キュー 1 本分のタスク実行ループ
//!
//! # フロー
//! 1. claim（マネージャのロック内）: `next_task` → 空なら登録解除して終了
//! 2. まだ時刻でなければロックを外して wake / sleep / shutdown を待つ
//! 3. 復元 → 実行中マーカーを立てて TaskContext を作る
//! 4. run（ロック外、別タスク）: `Task::execute`。panic もここで閉じ込める
//! 5. complete（ロック内）: 結果に応じてストアを更新し、マーカーを外す
//!
//! claim / complete の途中でストアが失敗したら、このワーカーだけを止める
//! （同じクリティカルセクション内で登録解除するので、次の enqueue で新しいワーカーが立つ）。

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Notify, watch};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::context::TaskContext;
use super::manager::{ManagerState, QueueManager, RunningTask};
use super::notifier::Topic;
use crate::domain::{
    EncodedTask, Event, QueueName, SchedulerError, TaskRecord, TaskStatus, WorkerId,
};
use crate::typed::{RestoredTask, Task};

const RETRY_LIMIT_EXCEEDED: &str = "Retry limit exceeded";
const DEFAULT_FAILURE: &str = "Task failed";

/// Result of one claim step.
enum Claim {
    /// No Queued rows left; the worker has been deregistered.
    Drained,

    /// The earliest task is not due yet.
    Wait(Duration),

    /// The row could not be restored and was marked Failed.
    Skipped,

    Run {
        task: Box<dyn Task>,
        ctx: TaskContext,
        record: TaskRecord,
    },
}

/// Result of one execution attempt.
struct Attempt {
    /// `None` when the task panicked and its state is lost.
    task: Option<Box<dyn Task>>,
    status: TaskStatus,
}

pub(crate) struct QueueWorker {
    manager: Arc<QueueManager>,
    queue: QueueName,
    worker_id: WorkerId,
    wake: Arc<Notify>,
    shutdown_rx: watch::Receiver<bool>,
}

impl QueueWorker {
    pub(crate) fn new(
        manager: Arc<QueueManager>,
        queue: QueueName,
        worker_id: WorkerId,
        wake: Arc<Notify>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            manager,
            queue,
            worker_id,
            wake,
            shutdown_rx,
        }
    }

    pub(crate) async fn run(mut self) {
        info!(queue = %self.queue, worker = %self.worker_id, "queue worker started");
        if let Err(err) = self.run_loop().await {
            error!(
                queue = %self.queue,
                worker = %self.worker_id,
                error = %err,
                "queue worker stopped on bookkeeping fault"
            );
            self.manager
                .state
                .lock()
                .await
                .on_queue_terminating(&self.queue, self.worker_id);
        }
        info!(queue = %self.queue, worker = %self.worker_id, "queue worker terminated");
    }

    async fn run_loop(&mut self) -> Result<(), SchedulerError> {
        loop {
            match self.claim().await? {
                Claim::Drained => return Ok(()),
                Claim::Wait(wait) => {
                    debug!(queue = %self.queue, ?wait, "next task not due yet");
                    tokio::select! {
                        _ = self.wake.notified() => {}
                        _ = tokio::time::sleep(wait) => {}
                        _ = self.shutdown_rx.changed() => {}
                    }
                }
                Claim::Skipped => {
                    self.manager.notifier.notify(Topic::Events);
                    self.manager.notifier.notify(Topic::Tasks);
                }
                Claim::Run { task, ctx, record } => {
                    let attempt = self.execute(task, &ctx, &record).await;
                    self.complete(attempt, &ctx, &record).await?;
                    self.manager.notifier.notify(Topic::Tasks);
                }
            }
        }
    }

    // ========================================
    // claim
    // ========================================

    async fn claim(&mut self) -> Result<Claim, SchedulerError> {
        let manager = self.manager.clone();
        let mut state = manager.state.lock().await;
        let claim = self.claim_locked(&mut state).await;
        // 空になった／失敗したら同じクリティカルセクション内で抜ける
        if matches!(claim, Ok(Claim::Drained) | Err(_)) {
            state.on_queue_terminating(&self.queue, self.worker_id);
        }
        claim
    }

    async fn claim_locked(&self, state: &mut ManagerState) -> Result<Claim, SchedulerError> {
        let manager = &self.manager;
        if state.is_closed() || *self.shutdown_rx.borrow() {
            return Ok(Claim::Drained);
        }

        let Some(scheduled) = manager.store.next_task(&self.queue).await? else {
            debug!(queue = %self.queue, "queue drained");
            return Ok(Claim::Drained);
        };
        if !scheduled.is_ready() {
            return Ok(Claim::Wait(scheduled.wait));
        }

        let record = scheduled.record;
        match manager.codec.restore(&record) {
            RestoredTask::Legacy { kind, reason } => {
                warn!(task = %record.id, kind = %kind, reason = %reason, "could not restore task");
                let message = format!("could not restore task: {reason}");
                manager
                    .store
                    .set_task_failed(record.id, &message, None)
                    .await?;
                let event = Event::failure(&message)
                    .with_detail(serde_json::json!({ "kind": kind }));
                manager.store.store_event(Some(record.id), &event).await?;
                Ok(Claim::Skipped)
            }
            RestoredTask::Task(task) => {
                let cancel = CancellationToken::new();
                state.set_running(
                    &self.queue,
                    self.worker_id,
                    RunningTask {
                        task_id: record.id,
                        cancel: cancel.clone(),
                    },
                );
                let ctx = TaskContext::new(
                    manager.clone(),
                    record.id,
                    self.queue.clone(),
                    self.worker_id,
                    record.retries,
                    cancel,
                    manager.retry.next_delay(record.retries.saturating_add(1)),
                );
                debug!(task = %record.id, queue = %self.queue, "task claimed");
                Ok(Claim::Run { task, ctx, record })
            }
        }
    }

    // ========================================
    // run
    // ========================================

    async fn execute(&self, mut task: Box<dyn Task>, ctx: &TaskContext, record: &TaskRecord) -> Attempt {
        let span = info_span!(
            "task",
            id = %record.id,
            kind = %record.kind,
            queue = %self.queue,
            retries = record.retries
        );
        let task_ctx = ctx.clone();
        // 別タスクで実行して panic をワーカーに波及させない
        let handle = tokio::spawn(
            async move {
                debug!("task started");
                let result = task.execute(&task_ctx).await;
                (task, result)
            }
            .instrument(span),
        );

        match handle.await {
            Ok((task, Ok(status))) => Attempt {
                task: Some(task),
                status,
            },
            Ok((task, Err(fault))) => {
                if ctx.last_error().is_none() {
                    ctx.set_last_error(fault.to_string());
                }
                Attempt {
                    task: Some(task),
                    status: TaskStatus::Failed,
                }
            }
            Err(join_err) => {
                let message = if join_err.is_panic() {
                    format!("Task panicked: {}", panic_message(join_err.into_panic()))
                } else {
                    "Task was aborted".to_string()
                };
                if ctx.last_error().is_none() {
                    ctx.set_last_error(message);
                }
                Attempt {
                    task: None,
                    status: TaskStatus::Failed,
                }
            }
        }
    }

    // ========================================
    // complete
    // ========================================

    async fn complete(
        &self,
        attempt: Attempt,
        ctx: &TaskContext,
        record: &TaskRecord,
    ) -> Result<(), SchedulerError> {
        let manager = self.manager.clone();
        let mut state = manager.state.lock().await;
        state.clear_running(&self.queue, self.worker_id);
        let result = self.apply_outcome(attempt, ctx, record).await;
        if result.is_err() {
            state.on_queue_terminating(&self.queue, self.worker_id);
        }
        result
    }

    async fn apply_outcome(
        &self,
        attempt: Attempt,
        ctx: &TaskContext,
        record: &TaskRecord,
    ) -> Result<(), SchedulerError> {
        let manager = &self.manager;
        let store = &manager.store;
        let id = record.id;

        // キャンセル要求後の Requeue は削除扱い
        let status = match attempt.status {
            TaskStatus::Requeue if ctx.is_cancelled() => TaskStatus::Cancelled,
            status => status,
        };

        match status {
            TaskStatus::Success => {
                store.set_task_completed(id).await?;
                info!(task = %id, queue = %self.queue, "task completed");
            }
            TaskStatus::Cancelled => {
                store.delete_task(id).await?;
                info!(task = %id, queue = %self.queue, "task cancelled");
            }
            TaskStatus::Requeue => {
                let encoded = self.encode_latest(attempt.task.as_deref());
                if manager.retry.exhausted(record.retries) {
                    store
                        .set_task_failed(id, RETRY_LIMIT_EXCEEDED, encoded.as_ref())
                        .await?;
                    warn!(task = %id, retries = record.retries, "retry limit exceeded");
                } else {
                    let retry_at = retry_at(manager.now(), ctx.retry_delay());
                    let retries = record.retries.saturating_add(1);
                    store
                        .requeue_task(id, retry_at, retries, encoded.as_ref())
                        .await?;
                    info!(task = %id, retries, %retry_at, "task requeued");
                }
            }
            TaskStatus::Failed => {
                let encoded = self.encode_latest(attempt.task.as_deref());
                let message = ctx
                    .last_error()
                    .unwrap_or_else(|| DEFAULT_FAILURE.to_string());
                store.set_task_failed(id, &message, encoded.as_ref()).await?;
                warn!(task = %id, reason = %message, "task failed");
            }
        }
        Ok(())
    }

    /// Re-encode the task after its attempt so progress survives a requeue.
    fn encode_latest(&self, task: Option<&dyn Task>) -> Option<EncodedTask> {
        let task = task?;
        match self.manager.codec.encode(task) {
            Ok(encoded) => Some(encoded),
            Err(err) => {
                warn!(kind = task.kind(), error = %err, "could not re-encode task; keeping stored payload");
                None
            }
        }
    }
}

fn retry_at(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    let delay = chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::days(36_500));
    now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
