//! Status - キューごとの集計
//!
//! CLI の `status` 表示用。ストアの一覧とマネージャの active テーブルから組み立てる。

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{QueueName, TaskId, TaskRecord, TaskState};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    /// Queued and due now.
    pub ready: usize,

    /// Queued with `retry_at` in the future.
    pub waiting: usize,

    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub name: QueueName,

    /// Has a live worker.
    pub active: bool,

    pub running: Option<TaskId>,
    pub counts: QueueCounts,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub queues: Vec<QueueStatus>,
    pub events: usize,
}

impl SchedulerStatus {
    pub(crate) fn collect(
        names: &[QueueName],
        tasks: &[TaskRecord],
        active: &[QueueName],
        running: &HashMap<QueueName, TaskId>,
        events: usize,
        now: DateTime<Utc>,
    ) -> Self {
        let mut counts: BTreeMap<QueueName, QueueCounts> = names
            .iter()
            .chain(active)
            .map(|name| (name.clone(), QueueCounts::default()))
            .collect();

        for task in tasks {
            let entry = counts.entry(task.queue.clone()).or_default();
            match task.state {
                TaskState::Failed => entry.failed += 1,
                TaskState::Queued if task.is_runnable_at(now) => entry.ready += 1,
                TaskState::Queued => entry.waiting += 1,
            }
        }

        let queues = counts
            .into_iter()
            .map(|(name, counts)| QueueStatus {
                active: active.contains(&name),
                running: running.get(&name).copied(),
                name,
                counts,
            })
            .collect();

        Self { queues, events }
    }

    pub fn total(&self) -> QueueCounts {
        self.queues
            .iter()
            .fold(QueueCounts::default(), |mut acc, queue| {
                acc.ready += queue.counts.ready;
                acc.waiting += queue.counts.waiting;
                acc.failed += queue.counts.failed;
                acc
            })
    }
}
