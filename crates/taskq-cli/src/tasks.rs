//! Demo tasks - CLI から投入できるサンプルのタスク種別

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use taskq_core::typed::{CodecError, RegistryError, encode_json};
use taskq_core::{Event, SchedulerBuilder, Task, TaskContext, TaskError, TaskStatus, TypedTask};
use tracing::info;

/// Prints a message and records it as an event.
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
        format!("Echo \"{}\"", self.message)
    }

    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        encode_json(self)
    }

    async fn execute(&mut self, ctx: &TaskContext) -> Result<TaskStatus, TaskError> {
        println!("{}", self.message);
        ctx.store_event(Event::progress(format!("said \"{}\"", self.message)))
            .await?;
        Ok(TaskStatus::Success)
    }
}

impl TypedTask for EchoTask {
    const KIND: &'static str = "demo.echo.v1";
}

/// Asks to be requeued `failures` times before succeeding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlakyTask {
    pub failures: u32,

    /// Overrides the configured backoff when set.
    pub delay_secs: Option<u64>,

    #[serde(default)]
    pub attempts: u32,
}

#[async_trait]
impl Task for FlakyTask {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn description(&self) -> String {
        format!("Flaky ({} of {} failures used)", self.attempts, self.failures)
    }

    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        encode_json(self)
    }

    async fn execute(&mut self, ctx: &TaskContext) -> Result<TaskStatus, TaskError> {
        if self.attempts >= self.failures {
            ctx.store_event(Event::progress(format!(
                "succeeded after {} retries",
                ctx.retries()
            )))
            .await?;
            return Ok(TaskStatus::Success);
        }

        self.attempts += 1;
        if let Some(secs) = self.delay_secs {
            ctx.set_retry_delay(Duration::from_secs(secs));
        }
        ctx.store_event(Event::progress(format!(
            "attempt {} failed on purpose; retrying in {:?}",
            self.attempts,
            ctx.retry_delay()
        )))
        .await?;
        Ok(TaskStatus::Requeue)
    }
}

impl TypedTask for FlakyTask {
    const KIND: &'static str = "demo.flaky.v1";
}

/// Sleeps one second at a time, checkpointing progress; stops on cancel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SleepTask {
    pub total_secs: u64,

    #[serde(default)]
    pub elapsed_secs: u64,
}

#[async_trait]
impl Task for SleepTask {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn description(&self) -> String {
        format!("Sleep {}/{}s", self.elapsed_secs, self.total_secs)
    }

    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        encode_json(self)
    }

    async fn execute(&mut self, ctx: &TaskContext) -> Result<TaskStatus, TaskError> {
        while self.elapsed_secs < self.total_secs {
            tokio::select! {
                _ = ctx.cancelled() => {
                    info!(elapsed = self.elapsed_secs, "sleep cancelled");
                    return Ok(TaskStatus::Cancelled);
                }
                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
            }
            self.elapsed_secs += 1;
            // 再起動後は続きから眠る
            ctx.save(&*self).await?;
        }
        ctx.store_event(Event::progress(format!("slept {}s", self.total_secs)))
            .await?;
        Ok(TaskStatus::Success)
    }
}

impl TypedTask for SleepTask {
    const KIND: &'static str = "demo.sleep.v1";
}

/// Builder with every demo kind registered.
pub fn builder() -> Result<SchedulerBuilder, RegistryError> {
    SchedulerBuilder::new()
        .register::<EchoTask>()?
        .register::<FlakyTask>()?
        .register::<SleepTask>()
        .map(|builder| builder.expect_kinds(&[EchoTask::KIND, FlakyTask::KIND, SleepTask::KIND]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use taskq_core::domain::TaskState;
    use taskq_core::impls::InMemoryTaskStore;

    #[test]
    fn all_demo_kinds_register() {
        let manager = builder()
            .unwrap()
            .store(Arc::new(InMemoryTaskStore::new()))
            .build();
        assert!(manager.is_ok());
    }

    #[test]
    fn descriptions_show_progress() {
        let sleep = SleepTask {
            total_secs: 5,
            elapsed_secs: 2,
        };
        assert_eq!(sleep.description(), "Sleep 2/5s");

        let flaky = FlakyTask {
            failures: 3,
            delay_secs: None,
            attempts: 1,
        };
        assert_eq!(flaky.description(), "Flaky (1 of 3 failures used)");
    }

    #[tokio::test]
    async fn flaky_task_requeues_then_succeeds() {
        let manager = builder()
            .unwrap()
            .store(Arc::new(InMemoryTaskStore::new()))
            .build()
            .unwrap();
        manager
            .enqueue_task(
                "demo",
                FlakyTask {
                    failures: 1,
                    delay_secs: Some(0),
                    attempts: 0,
                },
            )
            .await
            .unwrap();

        for _ in 0..200 {
            if manager.tasks().await.unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(manager.tasks().await.unwrap().is_empty());
        assert_eq!(manager.events().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn sleep_task_is_cancelled_by_delete() {
        let manager = builder()
            .unwrap()
            .store(Arc::new(InMemoryTaskStore::new()))
            .build()
            .unwrap();
        let id = manager
            .enqueue_task(
                "demo",
                SleepTask {
                    total_secs: 60,
                    elapsed_secs: 0,
                },
            )
            .await
            .unwrap();

        for _ in 0..200 {
            if manager.status().await.unwrap().queues.iter().any(|q| q.running == Some(id)) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let tasks = manager.tasks().await.unwrap();
        assert_eq!(tasks[0].state, TaskState::Queued);

        manager.delete_task(id).await.unwrap();
        for _ in 0..200 {
            if manager.tasks().await.unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(manager.tasks().await.unwrap().is_empty());
    }
}
