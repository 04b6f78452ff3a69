//! Events - タスク／キューの実行ログ
//!
//! イベントは一度書かれたら変更されない記録です。
//! 保存されたバイト列が読めなくても読み出しはエラーにせず、
//! `EventBody::Unreadable` のプレースホルダとして返します。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EventId, TaskId};

/// A log record, serialized into the store's opaque payload column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Short machine-friendly tag ("progress", "failed", ...).
    pub kind: String,

    pub description: String,

    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub detail: serde_json::Value,
}

impl Event {
    pub fn new(kind: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            description: description.into(),
            detail: serde_json::Value::Null,
        }
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }

    pub fn progress(description: impl Into<String>) -> Self {
        Self::new("progress", description)
    }

    pub fn failure(description: impl Into<String>) -> Self {
        Self::new("failed", description)
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Decoded event payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventBody {
    Event(Event),

    /// Stored bytes could not be deserialized.
    Unreadable { reason: String },
}

impl EventBody {
    /// Never fails; bad bytes become `Unreadable`.
    pub fn decode(bytes: &[u8]) -> Self {
        match serde_json::from_slice::<Event>(bytes) {
            Ok(event) => EventBody::Event(event),
            Err(err) => EventBody::Unreadable {
                reason: format!("could not read event payload: {err}"),
            },
        }
    }

    pub fn description(&self) -> &str {
        match self {
            EventBody::Event(event) => &event.description,
            EventBody::Unreadable { reason } => reason,
        }
    }

    pub fn is_readable(&self) -> bool {
        matches!(self, EventBody::Event(_))
    }
}

/// An event row as returned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: EventId,

    /// `None` for queue-level events.
    pub task_id: Option<TaskId>,

    pub timestamp: DateTime<Utc>,
    pub body: EventBody,
}
