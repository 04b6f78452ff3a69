//! プロセス全体で 1 つの QueueManager
//!
//! アプリケーションはここから起動・取得できます。
//! テストは `SchedulerBuilder::build` で独立したインスタンスを作ってください。

use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::error;

use super::{QueueManager, SchedulerBuilder};
use crate::domain::{SchedulerError, StoreError};

static MANAGER: OnceCell<Arc<QueueManager>> = OnceCell::new();

/// Build the process-wide manager and bootstrap it on a spawned task.
///
/// Idempotent: later calls ignore their builder and return the running
/// instance. The store is opened on the blocking pool, so the caller's
/// thread never touches the database file.
pub async fn start(builder: SchedulerBuilder) -> Result<Arc<QueueManager>, SchedulerError> {
    if let Some(manager) = MANAGER.get() {
        return Ok(manager.clone());
    }

    let built = tokio::task::spawn_blocking(move || builder.build())
        .await
        .map_err(StoreError::from)??;

    // 同時に呼ばれた場合は先に入った方が残り、負けた方は捨てる
    let mut initialized = false;
    let manager = MANAGER
        .get_or_init(|| {
            initialized = true;
            built
        })
        .clone();

    if initialized {
        let bootstrapping = manager.clone();
        tokio::spawn(async move {
            if let Err(err) = bootstrapping.bootstrap().await {
                error!(error = %err, "queue manager bootstrap failed");
            }
        });
    }
    Ok(manager)
}

/// The manager created by `start`.
pub fn instance() -> Result<Arc<QueueManager>, SchedulerError> {
    MANAGER.get().cloned().ok_or(SchedulerError::NotStarted)
}
