//! Errors - エラー型と分類
//!
//! # 分類
//! - `StoreError`: 永続化層の障害（SQLite, ロック, blocking タスク）
//! - `TaskError`: タスク本体が返す失敗。Failed として記録され、自動リトライはしない
//! - `SchedulerError`: マネージャ／ワーカーの操作エラーをまとめた上位型
//!
//! コーデック・レジストリ・ビルド・設定のエラーはそれぞれのモジュールに置いています。

use thiserror::Error;

use crate::app::builder::BuildError;
use crate::config::ConfigError;
use crate::typed::{CodecError, RegistryError};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store lock poisoned")]
    Lock,

    #[error("blocking store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Fault raised by a task body.
///
/// The message ends up as the task's failure reason unless the task already
/// set one through `TaskContext::set_last_error`.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),
}

impl TaskError {
    pub fn new(message: impl Into<String>) -> Self {
        TaskError::Failed(message.into())
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("queue manager has not been started")]
    NotStarted,

    #[error("queue manager is shut down")]
    ShutDown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_error_message_is_plain_text() {
        let err = TaskError::new("disk full");
        assert_eq!(err.to_string(), "disk full");
    }

    #[test]
    fn store_error_converts_into_scheduler_error() {
        let err: SchedulerError = StoreError::Lock.into();
        assert!(matches!(err, SchedulerError::Store(StoreError::Lock)));
        assert_eq!(err.to_string(), "store lock poisoned");
    }

    #[test]
    fn scheduler_error_propagates_through_task_error() {
        fn body() -> Result<(), TaskError> {
            let shut_down: Result<(), SchedulerError> = Err(SchedulerError::ShutDown);
            shut_down?;
            Ok(())
        }
        assert_eq!(body().unwrap_err().to_string(), "queue manager is shut down");
    }
}
