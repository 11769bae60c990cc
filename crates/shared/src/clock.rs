//! 时钟抽象
//!
//! 引擎内所有"当前时间"都通过 `Clock` 能力获取，而非直接调用
//! `Utc::now()`，使退避延迟和 `not_before` 判定在测试中可控。

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

/// 时钟能力
///
/// 生产环境注入 [`SystemClock`]，测试中注入 [`ManualClock`]。
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// 系统时钟
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 手动时钟
///
/// 时间只在调用 `advance`/`set` 时前进，用于验证退避调度等
/// 依赖时间的逻辑而无需真实等待。
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    /// 以当前系统时间为起点创建
    pub fn from_system() -> Self {
        Self::new(Utc::now())
    }

    /// 将时间前进指定时长
    pub fn advance(&self, duration: Duration) {
        *self.now.write() += duration;
    }

    /// 直接设置当前时间
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.write() = now;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}

/// 共享时钟句柄类型别名
pub type SharedClock = Arc<dyn Clock>;
