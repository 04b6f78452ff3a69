use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of a logical queue (one independent lane of sequential execution).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueName(String);

impl QueueName {
    /// Queue for long-running work, or work that can just wait.
    pub const MAIN: &'static str = "main";

    /// Queue for trivial background jobs that only take a few seconds.
    pub const SMALL_JOBS: &'static str = "small_jobs";

    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn main() -> Self {
        Self::new(Self::MAIN)
    }

    pub fn small_jobs() -> Self {
        Self::new(Self::SMALL_JOBS)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for QueueName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for QueueName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&QueueName> for QueueName {
    fn from(q: &QueueName) -> Self {
        q.clone()
    }
}

/// Caller-defined tag used to ask "is anything of kind X still pending?".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskCategory(i64);

impl TaskCategory {
    pub const GENERAL: TaskCategory = TaskCategory(0);

    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl Default for TaskCategory {
    fn default() -> Self {
        Self::GENERAL
    }
}

impl fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
