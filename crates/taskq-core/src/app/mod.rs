//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてスケジューラ本体を実装します。
//!
//! # 主要コンポーネント
//! - **SchedulerBuilder**: QueueManager の構築とワイヤリング
//! - **QueueManager**: キューとワーカーの監督、投入・削除・通知
//! - **QueueWorker**: キュー 1 本分の実行ループ（claim→run→complete）
//! - **Notifier**: 変更通知の配送
//! - **global**: プロセス全体のシングルトン

pub mod builder;
pub mod context;
pub mod global;
pub mod manager;
pub mod notifier;
pub mod status;
mod worker_loop;

pub use self::builder::{BuildError, SchedulerBuilder};
pub use self::context::TaskContext;
pub use self::manager::QueueManager;
pub use self::notifier::{Notifier, Topic};
pub use self::status::{QueueCounts, QueueStatus, SchedulerStatus};
