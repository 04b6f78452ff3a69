//! Domain identifiers (strongly-typed IDs).
//!
//! # ストアが採番する ID + ジェネリック実装
//! Task と Event の ID は永続化時にストアが採番する整数です。
//! `Id<T>` というジェネリック型で共通実装を提供し、
//! `T` は PhantomData のマーカー型としてコンパイル時の型安全性だけを担います。
//!
//! Worker の ID だけはストアに保存されないため、ULID で生成します
//! （`WorkerId`、`ports::IdGenerator` 参照）。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
///
/// Display で使うプレフィックス（"task-", "event-"）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// Store-assigned identifier.
///
/// `TaskId` and `EventId` are distinct types even though both wrap an `i64`.
#[repr(transparent)]
#[derive(Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    raw: i64,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub const fn from_raw(raw: i64) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    pub const fn get(self) -> i64 {
        self.raw
    }
}

// derive だと `T: Clone` などの余計な境界が付くので手書きする
impl<T: IdMarker> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: IdMarker> Copy for Id<T> {}

impl<T: IdMarker> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T: IdMarker> Eq for Id<T> {}

impl<T: IdMarker> std::hash::Hash for Id<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<T: IdMarker> PartialOrd for Id<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: IdMarker> Ord for Id<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.raw.cmp(&other.raw)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.raw)
    }
}

// ========================================
// マーカー型の定義
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Task {}

impl IdMarker for Task {
    fn prefix() -> &'static str {
        "task-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Event {}

impl IdMarker for Event {
    fn prefix() -> &'static str {
        "event-"
    }
}

/// Identifier of a persisted task row.
pub type TaskId = Id<Task>;

/// Identifier of a persisted event row.
pub type EventId = Id<Event>;

/// Identity of one queue worker instance.
///
/// A queue name can be served by successive workers over the process lifetime;
/// the manager compares worker ids so a terminating worker never removes its
/// successor from the active table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerId(Ulid);

impl WorkerId {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl From<Ulid> for WorkerId {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_display_with_prefix() {
        let task = TaskId::from_raw(42);
        let event = EventId::from_raw(7);

        assert_eq!(task.to_string(), "task-42");
        assert_eq!(event.to_string(), "event-7");
        assert_eq!(task.get(), 42);

        // let _: TaskId = event; // <- does not compile
    }

    #[test]
    fn ids_serialize_as_plain_integers() {
        let task = TaskId::from_raw(99);
        let json = serde_json::to_string(&task).unwrap();
        assert_eq!(json, "99");

        let back: TaskId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, task);
    }

    #[test]
    fn ids_order_by_raw_value() {
        let mut ids = vec![TaskId::from_raw(3), TaskId::from_raw(1), TaskId::from_raw(2)];
        ids.sort();
        assert_eq!(ids, vec![TaskId::from_raw(1), TaskId::from_raw(2), TaskId::from_raw(3)]);
    }

    #[test]
    fn phantom_data_does_not_consume_memory() {
        use std::mem::size_of;
        assert_eq!(size_of::<TaskId>(), size_of::<i64>());
        assert_eq!(size_of::<EventId>(), size_of::<i64>());
    }

    #[test]
    fn worker_ids_are_distinct() {
        let a = WorkerId::from_ulid(Ulid::new());
        let b = WorkerId::from_ulid(Ulid::new());
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("worker-"));
    }
}
