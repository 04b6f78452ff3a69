//! Task trait - キューで実行される処理単位
//!
//! # 二層構造
//! - **Dyn**: `Task` trait - object-safe。ワーカーは `Box<dyn Task>` として実行する
//! - **Typed**: `TypedTask` trait - `const KIND` で種別と型を対応付け、レジストリが復元に使う

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::app::TaskContext;
use crate::domain::{TaskCategory, TaskError, TaskStatus};
use crate::typed::CodecError;

/// A unit of background work.
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Echo { message: String }
///
/// #[async_trait]
/// impl Task for Echo {
///     fn kind(&self) -> &'static str { Self::KIND }
///     fn description(&self) -> String { format!("echo {}", self.message) }
///     fn encode(&self) -> Result<Vec<u8>, CodecError> { encode_json(self) }
///
///     async fn execute(&mut self, ctx: &TaskContext) -> Result<TaskStatus, TaskError> {
///         ctx.store_event(Event::progress(&self.message)).await?;
///         Ok(TaskStatus::Success)
///     }
/// }
///
/// impl TypedTask for Echo {
///     const KIND: &'static str = "demo.echo.v1";
/// }
/// ```
///
/// The scheduler never aborts `execute`; a task that wants to be cancellable
/// polls `ctx.is_cancelled()` (or awaits `ctx.cancelled()`) and returns
/// `TaskStatus::Cancelled`.
#[async_trait]
pub trait Task: Send + Sync + 'static {
    /// Registry key stored next to the payload.
    fn kind(&self) -> &'static str;

    fn description(&self) -> String;

    fn category(&self) -> TaskCategory {
        TaskCategory::GENERAL
    }

    /// Lower runs first among tasks due at the same instant.
    fn priority(&self) -> i32 {
        0
    }

    fn encode(&self) -> Result<Vec<u8>, CodecError>;

    async fn execute(&mut self, ctx: &TaskContext) -> Result<TaskStatus, TaskError>;
}

/// TypedTask は kind と型を対応付ける
///
/// # 命名規約
/// - `{namespace}.{action}.v{major}`
/// - 例: `catalog.import_covers.v1`
///
/// # Trait Bounds
/// - `Serialize`: ストアへの保存のため
/// - `DeserializeOwned`: 再起動後の復元のため
pub trait TypedTask: Task + Serialize + DeserializeOwned {
    const KIND: &'static str;
}
