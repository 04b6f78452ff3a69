//! IdGenerator port - ワーカー ID 生成の抽象化
//!
//! Task / Event の ID はストアが採番するので、ここで作るのはワーカーの ID だけです。
//! 同じキュー名に対して世代の違うワーカーが入れ替わるため、
//! マネージャはこの ID で「自分のエントリか」を判定します。

use crate::domain::WorkerId;
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator はワーカー ID を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（マネージャから共有される）
pub trait IdGenerator: Send + Sync {
    fn generate_worker_id(&self) -> WorkerId;
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// Clock を使って現在時刻ベースの ULID を生成します。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_worker_id(&self) -> WorkerId {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        let ulid = Ulid::from_parts(timestamp_ms, rand::random());
        WorkerId::from(ulid)
    }
}
