//! ChangeListener port - 変更通知の受け手
//!
//! 通知はペイロードを持たず「何か変わった」だけを伝えます。
//! 受け手は必要ならマネージャに問い合わせ直します。

/// Receives "tasks changed" / "events changed" signals.
///
/// Listeners are held weakly by the manager: dropping the last `Arc` stops
/// delivery without an explicit unregister.
pub trait ChangeListener: Send + Sync {
    fn on_change(&self);
}

impl<F> ChangeListener for F
where
    F: Fn() + Send + Sync,
{
    fn on_change(&self) {
        self()
    }
}
