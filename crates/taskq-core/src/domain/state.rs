//! Task state machine: persisted row state and per-attempt outcome.

use serde::{Deserialize, Serialize};

/// Persisted state of a task row.
///
/// Row lifecycle:
/// - Queued -> (Success) -> row deleted
/// - Queued -> (Cancelled) -> row deleted
/// - Queued -> (Requeue) -> Queued with a later `retry_at`
/// - Queued -> (Failed / fault / retry limit) -> Failed, kept for inspection
///
/// Success and cancellation never leave a row behind, so there is no
/// `Completed` state to store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting for (or eligible for) its queue's worker.
    Queued,

    /// Failed permanently; retained with a failure message.
    Failed,
}

impl TaskState {
    /// Is this task eligible for claiming once its `retry_at` arrives?
    pub fn is_runnable(self) -> bool {
        matches!(self, TaskState::Queued)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Queued => "queued",
            TaskState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(TaskState::Queued),
            "failed" => Some(TaskState::Failed),
            _ => None,
        }
    }
}

/// Result of one execution attempt, returned by `Task::execute`.
///
/// An `Err(TaskError)` (or a panic) from the task body is handled like
/// `Failed`, with the fault text as the failure message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Work done; the row is deleted.
    Success,

    /// Run again later; the row stays with a new `retry_at`.
    Requeue,

    /// The task observed its cancel flag; the row is deleted.
    Cancelled,

    /// Give up; the row is kept as Failed with a message.
    Failed,
}

impl TaskStatus {
    /// Does this outcome remove the row from the store?
    pub fn deletes_row(self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Cancelled)
    }
}
