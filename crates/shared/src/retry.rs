//! 重试策略
//!
//! 提供指数退避计算，用于瞬时投递失败（网络抖动、服务商 5xx、超时）的
//! 自动恢复。永久性失败（无效收件人等）不应被重试——由调度器根据
//! 失败分类决定，策略本身只负责次数上限和延迟计算。

use std::time::Duration;

use rand::Rng;

// ---------------------------------------------------------------------------
// RetryPolicy — 重试策略配置
// ---------------------------------------------------------------------------

/// 重试策略配置
///
/// 使用指数退避避免重试风暴：第 1 次失败后等 base_delay，第 2 次等
/// 2 倍，第 3 次等 4 倍...直到达到延迟上限或尝试次数上限。
/// 可选的抖动在 ±jitter 比例内随机缩放延迟，避免批量失败的通知
/// 在同一时刻涌回队列。
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 总尝试次数上限（含首次投递）
    pub max_attempts: u32,
    /// 首次重试前的基础等待时间
    pub base_delay: Duration,
    /// 退避时间上限，防止等待过长
    pub max_delay: Duration,
    /// 抖动比例（0.0 表示禁用，0.2 表示 ±20%）
    pub jitter: f64,
}

impl Default for RetryPolicy {
    /// 默认策略：最多尝试 5 次，基础延迟 1 秒，上限 5 分钟，抖动 ±20%
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// 计算第 N 次尝试失败后的退避时间（attempt_number 从 1 开始）
    ///
    /// 公式: base_delay * 2^(attempt_number-1)，结果不超过 max_delay。
    /// 使用 f64 运算后再转回 Duration，接受微秒级精度损失——
    /// 对秒级退避场景而言完全可接受。该值未加抖动，保证
    /// 延迟随尝试次数单调不减。
    pub fn delay_for_attempt(&self, attempt_number: u32) -> Duration {
        let exponent = attempt_number.saturating_sub(1).min(63);
        let base_ms = self.base_delay.as_millis() as f64;
        let delay_ms = base_ms * 2f64.powi(exponent as i32);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }

    /// 在退避时间上应用随机抖动
    ///
    /// 返回 [delay*(1-jitter), delay*(1+jitter)] 内的均匀随机值，
    /// jitter 为 0 时原样返回。
    pub fn jittered_delay(&self, attempt_number: u32) -> Duration {
        let delay = self.delay_for_attempt(attempt_number);
        if self.jitter <= 0.0 {
            return delay;
        }

        let factor = rand::rng().random_range(1.0 - self.jitter..=1.0 + self.jitter);
        Duration::from_millis((delay.as_millis() as f64 * factor) as u64)
    }

    /// 第 N 次尝试失败后是否还允许再次尝试
    ///
    /// attempt_number 为刚刚失败的尝试序号（1-based），
    /// 当 attempt_number < max_attempts 时返回 true。
    pub fn should_retry(&self, attempt_number: u32) -> bool {
        attempt_number < self.max_attempts
    }
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------
