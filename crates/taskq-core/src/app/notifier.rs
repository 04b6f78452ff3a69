//! Notifier - 変更通知の配送
//!
//! # フロー
//! 1. `notify(topic)` はトピックをチャネルに積むだけ（ロック中でも呼べる）
//! 2. 配送タスクが 1 本だけチャネルを読み、登録順にリスナーを呼ぶ
//! 3. リスナーは `Weak` で保持し、配送時に死んだものを掃除する
//!
//! 配送タスクは最初の `notify` で起動するので、ランタイム外で構築しても構わない。

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::ports::ChangeListener;

/// Which listener registry a notification is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Tasks,
    Events,
}

#[derive(Default)]
struct ListenerRegistry {
    tasks: Mutex<Vec<Weak<dyn ChangeListener>>>,
    events: Mutex<Vec<Weak<dyn ChangeListener>>>,
}

impl ListenerRegistry {
    fn list(&self, topic: Topic) -> MutexGuard<'_, Vec<Weak<dyn ChangeListener>>> {
        let list = match topic {
            Topic::Tasks => &self.tasks,
            Topic::Events => &self.events,
        };
        list.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Live listeners in registration order; dead entries are dropped.
    fn snapshot(&self, topic: Topic) -> Vec<Arc<dyn ChangeListener>> {
        let mut list = self.list(topic);
        let mut live = Vec::with_capacity(list.len());
        list.retain(|weak| match weak.upgrade() {
            Some(listener) => {
                live.push(listener);
                true
            }
            None => false,
        });
        live
    }
}

pub struct Notifier {
    registry: Arc<ListenerRegistry>,
    tx: mpsc::UnboundedSender<Topic>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Topic>>>,
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            registry: Arc::new(ListenerRegistry::default()),
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Registering the same listener twice has no effect.
    pub fn register(&self, topic: Topic, listener: &Arc<dyn ChangeListener>) {
        let mut list = self.registry.list(topic);
        let target = Arc::as_ptr(listener);
        if list
            .iter()
            .any(|weak| std::ptr::addr_eq(weak.as_ptr(), target))
        {
            return;
        }
        list.push(Arc::downgrade(listener));
    }

    /// Unknown listeners are ignored.
    pub fn unregister(&self, topic: Topic, listener: &Arc<dyn ChangeListener>) {
        let target = Arc::as_ptr(listener);
        self.registry
            .list(topic)
            .retain(|weak| !std::ptr::addr_eq(weak.as_ptr(), target));
    }

    /// Number of registered listeners that are still alive.
    pub fn listener_count(&self, topic: Topic) -> usize {
        self.registry
            .list(topic)
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Queue a notification. Must be called from within a tokio runtime.
    pub fn notify(&self, topic: Topic) {
        self.ensure_delivery();
        if self.tx.send(topic).is_err() {
            debug!(?topic, "notification dropped: delivery task gone");
        }
    }

    fn ensure_delivery(&self) {
        let rx = self
            .rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(rx) = rx {
            tokio::spawn(deliver(rx, self.registry.clone()));
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

async fn deliver(mut rx: mpsc::UnboundedReceiver<Topic>, registry: Arc<ListenerRegistry>) {
    while let Some(topic) = rx.recv().await {
        for listener in registry.snapshot(topic) {
            if catch_unwind(AssertUnwindSafe(|| listener.on_change())).is_err() {
                warn!(?topic, "change listener panicked");
            }
        }
    }
    debug!("notification delivery stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counting() -> (Arc<AtomicUsize>, Arc<dyn ChangeListener>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let listener: Arc<dyn ChangeListener> = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (hits, listener)
    }

    async fn wait_for(hits: &AtomicUsize, expected: usize) {
        for _ in 0..200 {
            if hits.load(Ordering::SeqCst) >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {expected} hits, saw {}", hits.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn notifications_reach_matching_topic_only() {
        let notifier = Notifier::new();
        let (task_hits, task_listener) = counting();
        let (event_hits, event_listener) = counting();
        notifier.register(Topic::Tasks, &task_listener);
        notifier.register(Topic::Events, &event_listener);

        notifier.notify(Topic::Tasks);
        notifier.notify(Topic::Tasks);
        wait_for(&task_hits, 2).await;
        assert_eq!(event_hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn duplicate_registration_is_ignored() {
        let notifier = Notifier::new();
        let (hits, listener) = counting();
        notifier.register(Topic::Tasks, &listener);
        notifier.register(Topic::Tasks, &listener);
        assert_eq!(notifier.listener_count(Topic::Tasks), 1);

        notifier.notify(Topic::Tasks);
        wait_for(&hits, 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropped_listener_is_pruned() {
        let notifier = Notifier::new();
        let (_, listener) = counting();
        let (keep_hits, keeper) = counting();
        notifier.register(Topic::Events, &listener);
        notifier.register(Topic::Events, &keeper);

        drop(listener);
        assert_eq!(notifier.listener_count(Topic::Events), 1);

        notifier.notify(Topic::Events);
        wait_for(&keep_hits, 1).await;
        assert_eq!(notifier.registry.list(Topic::Events).len(), 1);
    }

    #[tokio::test]
    async fn unregister_stops_delivery() {
        let notifier = Notifier::new();
        let (hits, listener) = counting();
        notifier.register(Topic::Tasks, &listener);
        notifier.unregister(Topic::Tasks, &listener);
        notifier.unregister(Topic::Tasks, &listener);
        assert_eq!(notifier.listener_count(Topic::Tasks), 0);

        let (gauge_hits, gauge) = counting();
        notifier.register(Topic::Tasks, &gauge);
        notifier.notify(Topic::Tasks);
        wait_for(&gauge_hits, 1).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    struct Panicky;

    impl ChangeListener for Panicky {
        fn on_change(&self) {
            panic!("listener bug");
        }
    }

    #[tokio::test]
    async fn panicking_listener_does_not_stop_others() {
        let notifier = Notifier::new();
        let bad: Arc<dyn ChangeListener> = Arc::new(Panicky);
        let (hits, good) = counting();
        notifier.register(Topic::Tasks, &bad);
        notifier.register(Topic::Tasks, &good);

        notifier.notify(Topic::Tasks);
        notifier.notify(Topic::Tasks);
        wait_for(&hits, 2).await;
    }
}
