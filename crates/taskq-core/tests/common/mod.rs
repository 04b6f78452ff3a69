#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use taskq_core::domain::TaskCategory;
use taskq_core::impls::InMemoryTaskStore;
use taskq_core::ports::TaskStore;
use taskq_core::typed::{CodecError, encode_json};
use taskq_core::{
    Event, QueueManager, SchedulerBuilder, Task, TaskContext, TaskError, TaskStatus, TypedTask,
};

// ========================================
// Gauge: タスクはストアから復元されるので、観測用の状態は名前で共有する
// ========================================

#[derive(Default)]
pub struct Gauge {
    pub running: AtomicUsize,
    pub max_running: AtomicUsize,
    pub runs: AtomicUsize,
}

impl Gauge {
    fn enter(&self) {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        self.runs.fetch_add(1, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

static GAUGES: Lazy<Mutex<HashMap<String, Arc<Gauge>>>> = Lazy::new(Default::default);

pub fn gauge(name: &str) -> Arc<Gauge> {
    GAUGES
        .lock()
        .unwrap()
        .entry(name.to_string())
        .or_default()
        .clone()
}

// ========================================
// Tasks
// ========================================

/// Records one event and succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EchoTask {
    pub message: String,
}

#[async_trait]
impl Task for EchoTask {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn description(&self) -> String {
        format!("echo {}", self.message)
    }

    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        encode_json(self)
    }

    async fn execute(&mut self, ctx: &TaskContext) -> Result<TaskStatus, TaskError> {
        ctx.store_event(Event::progress(self.message.clone())).await?;
        Ok(TaskStatus::Success)
    }
}

impl TypedTask for EchoTask {
    const KIND: &'static str = "test.echo.v1";
}

/// Sleeps while counted by a gauge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlowTask {
    pub gauge: String,
    pub millis: u64,
}

#[async_trait]
impl Task for SlowTask {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn description(&self) -> String {
        format!("sleep {}ms", self.millis)
    }

    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        encode_json(self)
    }

    async fn execute(&mut self, _ctx: &TaskContext) -> Result<TaskStatus, TaskError> {
        let gauge = gauge(&self.gauge);
        gauge.enter();
        tokio::time::sleep(Duration::from_millis(self.millis)).await;
        gauge.exit();
        Ok(TaskStatus::Success)
    }
}

impl TypedTask for SlowTask {
    const KIND: &'static str = "test.slow.v1";
}

/// Requeues itself `fails_left` times, then succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlakyTask {
    pub fails_left: u32,
    pub delay_ms: u64,
}

#[async_trait]
impl Task for FlakyTask {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn description(&self) -> String {
        format!("flaky ({} failures left)", self.fails_left)
    }

    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        encode_json(self)
    }

    async fn execute(&mut self, ctx: &TaskContext) -> Result<TaskStatus, TaskError> {
        ctx.store_event(Event::progress(format!("fails_left={}", self.fails_left)))
            .await?;
        if self.fails_left == 0 {
            return Ok(TaskStatus::Success);
        }
        self.fails_left -= 1;
        ctx.set_retry_delay(Duration::from_millis(self.delay_ms));
        Ok(TaskStatus::Requeue)
    }
}

impl TypedTask for FlakyTask {
    const KIND: &'static str = "test.flaky.v1";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Fault {
    /// `Err(TaskError)` without a message set beforehand.
    Error(String),

    /// Message set through the context, then `Err`.
    ErrorAfterMessage { message: String, error: String },

    /// `Ok(Failed)` without a message.
    FailedStatus,

    Panic(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultTask {
    pub fault: Fault,
}

#[async_trait]
impl Task for FaultTask {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn description(&self) -> String {
        format!("fault {:?}", self.fault)
    }

    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        encode_json(self)
    }

    async fn execute(&mut self, ctx: &TaskContext) -> Result<TaskStatus, TaskError> {
        match &self.fault {
            Fault::Error(error) => Err(TaskError::new(error.clone())),
            Fault::ErrorAfterMessage { message, error } => {
                ctx.set_last_error(message.clone());
                Err(TaskError::new(error.clone()))
            }
            Fault::FailedStatus => Ok(TaskStatus::Failed),
            Fault::Panic(message) => panic!("{}", message),
        }
    }
}

impl TypedTask for FaultTask {
    const KIND: &'static str = "test.fault.v1";
}

/// Runs until cancelled, then lingers before returning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancellableTask {
    pub gauge: String,
    pub category: i64,

    /// Return `Requeue` instead of `Cancelled` after observing cancellation.
    pub requeue_on_cancel: bool,
}

#[async_trait]
impl Task for CancellableTask {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn description(&self) -> String {
        format!("wait for cancel ({})", self.gauge)
    }

    fn category(&self) -> TaskCategory {
        TaskCategory::new(self.category)
    }

    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        encode_json(self)
    }

    async fn execute(&mut self, ctx: &TaskContext) -> Result<TaskStatus, TaskError> {
        let gauge = gauge(&self.gauge);
        gauge.enter();
        let observed = tokio::select! {
            _ = ctx.cancelled() => true,
            _ = tokio::time::sleep(Duration::from_secs(10)) => false,
        };
        // キャンセルを見た後もしばらく行が残ることを確かめるため
        tokio::time::sleep(Duration::from_millis(200)).await;
        gauge.exit();
        if !observed {
            ctx.set_last_error("never cancelled");
            return Ok(TaskStatus::Failed);
        }
        Ok(if self.requeue_on_cancel {
            TaskStatus::Requeue
        } else {
            TaskStatus::Cancelled
        })
    }
}

impl TypedTask for CancellableTask {
    const KIND: &'static str = "test.cancellable.v1";
}

/// Saves progress through the context, then fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepTask {
    pub step: u32,
}

#[async_trait]
impl Task for StepTask {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn description(&self) -> String {
        format!("step {}", self.step)
    }

    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        encode_json(self)
    }

    async fn execute(&mut self, ctx: &TaskContext) -> Result<TaskStatus, TaskError> {
        self.step += 1;
        ctx.save(&*self).await?;
        ctx.set_last_error(format!("stopped at step {}", self.step));
        Ok(TaskStatus::Failed)
    }
}

impl TypedTask for StepTask {
    const KIND: &'static str = "test.step.v1";
}

// ========================================
// Helpers
// ========================================

pub fn builder() -> SchedulerBuilder {
    SchedulerBuilder::new()
        .register::<EchoTask>()
        .and_then(|b| b.register::<SlowTask>())
        .and_then(|b| b.register::<FlakyTask>())
        .and_then(|b| b.register::<FaultTask>())
        .and_then(|b| b.register::<CancellableTask>())
        .and_then(|b| b.register::<StepTask>())
        .unwrap()
}

pub fn manager_with(store: Arc<dyn TaskStore>) -> Arc<QueueManager> {
    builder().store(store).build().unwrap()
}

pub fn manager() -> (Arc<InMemoryTaskStore>, Arc<QueueManager>) {
    let store = Arc::new(InMemoryTaskStore::new());
    let manager = manager_with(store.clone());
    (store, manager)
}

/// Poll `check` until it returns true; panics after five seconds.
pub async fn wait_until<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Wait until every queue worker has exited.
pub async fn wait_idle(manager: &Arc<QueueManager>) {
    wait_until("all queues idle", || {
        let manager = manager.clone();
        async move { manager.active_queues().await.is_empty() }
    })
    .await;
}
