//! taskq-core
//!
//! Persistent multi-queue background task scheduler.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, queue, state, task, event, retry, errors）
//! - **ports**: 抽象化レイヤー（TaskStore, Clock, IdGenerator, ChangeListener）
//! - **app**: スケジューラ本体（builder, manager, worker_loop, notifier, context, global）
//! - **typed**: 型付き Task API（Task trait, TypedTask, TaskRegistry, PayloadCodec）
//! - **impls**: 実装（SqliteTaskStore, InMemoryTaskStore）
//! - **config**: TOML 設定

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod typed;

pub use app::{QueueManager, SchedulerBuilder, TaskContext};
pub use config::SchedulerConfig;
pub use domain::{Event, QueueName, SchedulerError, TaskError, TaskId, TaskStatus};
pub use typed::{Task, TypedTask};
