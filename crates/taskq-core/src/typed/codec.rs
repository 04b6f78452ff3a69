//! PayloadCodec - Task と保存用ペイロードの相互変換
//!
//! # 復元フロー
//! 1. TaskRecord の kind でレジストリからデコーダを引く
//! 2. serde_json で payload を具体型にデシリアライズ
//! 3. 失敗時（未登録の kind、壊れたバイト列）は `RestoredTask::Legacy` を返す

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use super::registry::TaskRegistry;
use super::task::Task;
use crate::domain::{EncodedTask, TaskRecord};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("task kind '{0}' is not registered")]
    UnknownKind(String),
}

/// Serialize a task as JSON; the usual body of `Task::encode`.
pub fn encode_json<T: Serialize + ?Sized>(task: &T) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(task)?)
}

/// Outcome of restoring a stored task.
pub enum RestoredTask {
    Task(Box<dyn Task>),

    /// The payload could not be turned back into a task. The row is kept
    /// visible as a placeholder and is never executed.
    Legacy { kind: String, reason: String },
}

impl RestoredTask {
    pub fn description(&self) -> String {
        match self {
            RestoredTask::Task(task) => task.description(),
            RestoredTask::Legacy { kind, reason } => format!("legacy task '{kind}': {reason}"),
        }
    }
}

impl fmt::Debug for RestoredTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestoredTask::Task(task) => f
                .debug_struct("Task")
                .field("kind", &task.kind())
                .field("description", &task.description())
                .finish(),
            RestoredTask::Legacy { kind, reason } => f
                .debug_struct("Legacy")
                .field("kind", kind)
                .field("reason", reason)
                .finish(),
        }
    }
}

#[derive(Clone)]
pub struct PayloadCodec {
    registry: Arc<TaskRegistry>,
}

impl PayloadCodec {
    pub fn new(registry: TaskRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    /// Encode a task for the store. Unregistered kinds are rejected so that
    /// everything persisted can be restored after a restart.
    pub fn encode(&self, task: &dyn Task) -> Result<EncodedTask, CodecError> {
        let kind = task.kind();
        if !self.registry.contains(kind) {
            return Err(CodecError::UnknownKind(kind.to_string()));
        }
        Ok(EncodedTask {
            kind: kind.to_string(),
            description: task.description(),
            category: task.category(),
            priority: task.priority(),
            payload: task.encode()?,
        })
    }

    pub fn restore(&self, record: &TaskRecord) -> RestoredTask {
        match self.registry.decode(&record.kind, &record.payload) {
            Ok(task) => RestoredTask::Task(task),
            Err(err) => RestoredTask::Legacy {
                kind: record.kind.clone(),
                reason: err.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{QueueName, TaskCategory, TaskId, TaskState};
    use crate::typed::TypedTask;
    use crate::typed::registry::test_tasks::{CountTask, LabelTask};
    use chrono::Utc;

    fn codec() -> PayloadCodec {
        let mut registry = TaskRegistry::new();
        registry.register::<CountTask>().unwrap();
        registry.register::<LabelTask>().unwrap();
        PayloadCodec::new(registry)
    }

    fn record_of(encoded: &EncodedTask) -> TaskRecord {
        let now = Utc::now();
        TaskRecord {
            id: TaskId::from_raw(1),
            queue: QueueName::main(),
            kind: encoded.kind.clone(),
            description: encoded.description.clone(),
            category: encoded.category,
            priority: encoded.priority,
            state: TaskState::Queued,
            queued_at: now,
            retry_at: now,
            retries: 0,
            failure_reason: None,
            event_count: 0,
            payload: encoded.payload.clone(),
        }
    }

    #[test]
    fn encode_captures_metadata() {
        let encoded = codec().encode(&LabelTask { name: "covers".into() }).unwrap();
        assert_eq!(encoded.kind, LabelTask::KIND);
        assert_eq!(encoded.description, "label covers");
        assert_eq!(encoded.category, TaskCategory::new(7));
        assert_eq!(encoded.priority, -1);
    }

    #[test]
    fn encode_rejects_unregistered_kind() {
        let codec = PayloadCodec::new(TaskRegistry::new());
        let result = codec.encode(&CountTask { value: 1 });
        assert!(matches!(result, Err(CodecError::UnknownKind(_))));
    }

    #[test]
    fn restore_registered_payload() {
        let codec = codec();
        let encoded = codec.encode(&CountTask { value: 41 }).unwrap();

        match codec.restore(&record_of(&encoded)) {
            RestoredTask::Task(task) => assert_eq!(task.description(), "count to 41"),
            other => panic!("expected task, got {other:?}"),
        }
    }

    #[test]
    fn unknown_kind_restores_as_legacy() {
        let codec = codec();
        let mut record = record_of(&codec.encode(&CountTask { value: 1 }).unwrap());
        record.kind = "retired.kind.v0".into();

        match codec.restore(&record) {
            RestoredTask::Legacy { kind, reason } => {
                assert_eq!(kind, "retired.kind.v0");
                assert!(reason.contains("not registered"));
            }
            other => panic!("expected legacy, got {other:?}"),
        }
    }

    #[test]
    fn corrupt_payload_restores_as_legacy() {
        let codec = codec();
        let mut record = record_of(&codec.encode(&CountTask { value: 1 }).unwrap());
        record.payload = b"\xff\xfe not json".to_vec();

        let restored = codec.restore(&record);
        assert!(matches!(restored, RestoredTask::Legacy { .. }));
        assert!(restored.description().starts_with("legacy task"));
    }
}
