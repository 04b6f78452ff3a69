//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 永続化・時刻・ID 生成・変更通知の受け手を trait として切り出し、
//! テストではそれぞれを差し替えられるようにしています。

pub mod clock;
pub mod id_generator;
pub mod listener;
pub mod task_store;

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::listener::ChangeListener;
pub use self::task_store::TaskStore;
