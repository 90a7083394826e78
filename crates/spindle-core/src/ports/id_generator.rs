//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: Clock のミリ秒 + 80 bit 乱数

use std::sync::Arc;

use ulid::Ulid;

use crate::domain::TaskId;
use crate::ports::Clock;

/// IdGenerator はタスク ID を生成
///
/// `url` is a hint only; uniqueness comes from the random part, so two
/// submissions of the same URL in the same millisecond still differ.
pub trait IdGenerator: Send + Sync {
    fn generate_task_id(&self, url: &str) -> TaskId;
}

pub struct UlidGenerator {
    clock: Arc<dyn Clock>,
}

impl UlidGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl IdGenerator for UlidGenerator {
    fn generate_task_id(&self, _url: &str) -> TaskId {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        let ulid = Ulid::from_parts(timestamp_ms, rand::random::<u128>());
        TaskId::from_ulid(ulid)
    }
}
