//! Typed - 型付き Task API
//!
//! このモジュールはタスク種別（kind）の typo を型で排除し、
//! 保存済みペイロードと具体型との対応付けを静的に保証します。
//!
//! # 二層構造
//! - **表層（Typed）**: `TypedTask` trait - `const KIND` を持つ具体型
//! - **内部（Dyn）**: `Task` trait - object-safe, ワーカーが `Box<dyn Task>` で実行

pub mod codec;
pub mod registry;
pub mod task;

pub use self::codec::{CodecError, PayloadCodec, RestoredTask, encode_json};
pub use self::registry::{RegistryError, TaskRegistry};
pub use self::task::{Task, TypedTask};
