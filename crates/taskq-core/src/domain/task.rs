//! Task record: persisted metadata + opaque payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{QueueName, TaskCategory, TaskId, TaskState};

/// A task row as stored by a `TaskStore`.
///
/// Design:
/// - `payload` is opaque to the scheduler; only the registry decodes it.
/// - `kind` + `description` are captured at enqueue so listings never decode.
/// - `last_error` is not stored here; it lives in the `TaskContext` for one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub queue: QueueName,
    pub kind: String,
    pub description: String,
    pub category: TaskCategory,

    /// Lower runs first among tasks with the same `retry_at`.
    pub priority: i32,

    pub state: TaskState,
    pub queued_at: DateTime<Utc>,

    /// The task is not claimed before this instant.
    pub retry_at: DateTime<Utc>,

    /// Number of requeues so far.
    pub retries: u32,

    /// Written when the task is marked Failed.
    pub failure_reason: Option<String>,

    /// Number of events recorded against this task.
    pub event_count: usize,

    #[serde(with = "payload_bytes")]
    pub payload: Vec<u8>,
}

impl TaskRecord {
    pub fn is_runnable_at(&self, now: DateTime<Utc>) -> bool {
        self.state.is_runnable() && self.retry_at <= now
    }
}

/// Serialized form of a task handed to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedTask {
    pub kind: String,
    pub description: String,
    pub category: TaskCategory,
    pub priority: i32,
    pub payload: Vec<u8>,
}

/// Result of `TaskStore::next_task`.
///
/// `wait` is zero when the task can run now; otherwise it is the time left
/// until `record.retry_at`.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub record: TaskRecord,
    pub wait: Duration,
}

impl ScheduledTask {
    pub fn new(record: TaskRecord, now: DateTime<Utc>) -> Self {
        let wait = (record.retry_at - now).to_std().unwrap_or(Duration::ZERO);
        Self { record, wait }
    }

    pub fn is_ready(&self) -> bool {
        self.wait.is_zero()
    }
}

// JSON 上では payload をそのまま数値配列にせず、UTF-8 なら文字列として出す
mod payload_bytes {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Text(String),
        Bytes(Vec<u8>),
    }

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        match std::str::from_utf8(bytes) {
            Ok(text) => Repr::Text(text.to_owned()).serialize(s),
            Err(_) => Repr::Bytes(bytes.to_vec()).serialize(s),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        Ok(match Repr::deserialize(d)? {
            Repr::Text(text) => text.into_bytes(),
            Repr::Bytes(bytes) => bytes,
        })
    }
}
