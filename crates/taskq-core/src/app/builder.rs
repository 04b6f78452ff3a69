//! SchedulerBuilder - QueueManager の構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - 差し替え可能なポート（store / clock）とデフォルト実装

use std::sync::Arc;

use super::QueueManager;
use crate::config::SchedulerConfig;
use crate::domain::StoreError;
use crate::impls::SqliteTaskStore;
use crate::ports::{Clock, SystemClock, TaskStore, UlidGenerator};
use crate::typed::{PayloadCodec, RegistryError, TaskRegistry, TypedTask};

/// SchedulerBuilder は QueueManager を構築
///
/// # 使用例
/// ```ignore
/// let manager = SchedulerBuilder::new()
///     .register::<ImportCovers>()?
///     .expect_kinds(&["catalog.import_covers.v1"])
///     .config(SchedulerConfig::from_file(path)?)
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - expect_kinds() で期待される kind を登録
/// - build() 時に「期待集合 ⊆ 登録済み集合」をチェック
/// - 不足があれば BuildError を返す
///
/// store を渡さなければ `config.database_path` の SQLite を開きます。
pub struct SchedulerBuilder {
    registry: TaskRegistry,
    expected_kinds: Option<Vec<String>>,
    store: Option<Arc<dyn TaskStore>>,
    clock: Option<Arc<dyn Clock>>,
    config: SchedulerConfig,
}

/// BuildError は QueueManager 構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing task kinds: {0:?}. These kinds were expected but not registered.")]
    MissingTaskKinds(Vec<String>),

    #[error("could not open task store: {0}")]
    Store(#[from] StoreError),
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self {
            registry: TaskRegistry::new(),
            expected_kinds: None,
            store: None,
            clock: None,
            config: SchedulerConfig::default(),
        }
    }

    /// Task 型を登録
    pub fn register<T: TypedTask>(mut self) -> Result<Self, RegistryError> {
        self.registry.register::<T>()?;
        Ok(self)
    }

    /// 期待される kind のリストを設定
    pub fn expect_kinds(mut self, kinds: &[&str]) -> Self {
        self.expected_kinds = Some(kinds.iter().map(|kind| kind.to_string()).collect());
        self
    }

    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// # 検証
    /// - expect_kinds() で設定された kind が全て登録されているかチェック
    /// - 不足があれば BuildError::MissingTaskKinds を返す
    pub fn build(self) -> Result<Arc<QueueManager>, BuildError> {
        if let Some(expected) = &self.expected_kinds {
            let missing: Vec<String> = expected
                .iter()
                .filter(|kind| !self.registry.contains(kind))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingTaskKinds(missing));
            }
        }

        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let store = match self.store {
            Some(store) => store,
            None => Arc::new(
                SqliteTaskStore::open(&self.config.database_path)?.with_clock(clock.clone()),
            ),
        };

        Ok(Arc::new(QueueManager::new(
            store,
            PayloadCodec::new(self.registry),
            clock.clone(),
            Arc::new(UlidGenerator::new(clock)),
            self.config.retry_policy(),
        )))
    }
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
