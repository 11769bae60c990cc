//! 重试调度器
//!
//! 根据失败分类和已尝试次数决定失败投递的去向：
//! 计算退避延迟并给出下一次的 `not_before`，或宣告终态失败。
//! 永久性失败不消耗重试额度，直接终态。

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::debug;

use notify_shared::retry::RetryPolicy;

use crate::types::FailureKind;

/// 调度决定
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// 退避后重试：调用方把条目以新的尝试序号重新入队
    Retry {
        not_before: DateTime<Utc>,
        next_attempt: u32,
    },
    /// 放弃：调用方将通知转为终态 Failed
    GiveUp,
}

/// 重试调度器
///
/// 无状态，可廉价克隆：退避策略是唯一配置，
/// 当前时间由调用方传入以便测试。
#[derive(Debug, Clone)]
pub struct RetryScheduler {
    policy: RetryPolicy,
}

impl RetryScheduler {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn with_defaults() -> Self {
        Self::new(RetryPolicy::default())
    }

    /// 评估一次失败的投递尝试
    ///
    /// attempt_number 为刚刚失败的尝试序号（1-based）。
    /// 永久失败或尝试次数已达上限时放弃；否则按指数退避
    /// （带抖动）给出下一次的最早投递时间。
    pub fn evaluate(
        &self,
        attempt_number: u32,
        kind: FailureKind,
        now: DateTime<Utc>,
    ) -> RetryDecision {
        if kind == FailureKind::Permanent {
            debug!(attempt_number, "永久性失败，跳过重试");
            return RetryDecision::GiveUp;
        }

        if !self.policy.should_retry(attempt_number) {
            debug!(
                attempt_number,
                max_attempts = self.policy.max_attempts,
                "已达尝试次数上限，放弃重试"
            );
            return RetryDecision::GiveUp;
        }

        let delay = self.policy.jittered_delay(attempt_number);
        let not_before = now
            + ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::seconds(1));

        debug!(
            attempt_number,
            delay_ms = delay.as_millis() as u64,
            "安排退避重试"
        );

        RetryDecision::Retry {
            not_before,
            next_attempt: attempt_number + 1,
        }
    }

    /// 尝试次数上限（含首次投递）
    pub fn max_attempts(&self) -> u32 {
        self.policy.max_attempts
    }
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------
