//! 渠道发送器
//!
//! 通过 `ChannelSender` trait 抽象单次投递行为，各渠道（邮件、短信、
//! 站内信）提供独立实现。当前自带的实现为模拟发送（仅记录日志），
//! 便于在无外部依赖的情况下验证调度管道的完整性；接入真实服务商
//! （SMTP 中继、短信网关、推送服务）时只需实现同一 trait。
//!
//! 引擎通过 Sending 状态门保证同一通知至多一个并发调用，但不保证
//! 跨重试恰好一次：超时但实际已送达的尝试可能造成服务商侧重复，
//! 这是已接受的风险，可用服务商幂等键缓解。

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use crate::types::{Channel, FailureKind, Notification};

// ---------------------------------------------------------------------------
// 发送结果
// ---------------------------------------------------------------------------

/// 发送回执
#[derive(Debug, Clone)]
pub struct SendReceipt {
    /// 外部渠道返回的消息标识，用于追踪投递状态
    pub message_id: String,
}

/// 发送失败
///
/// 按可否重试分类：Transient 进入退避重试，Permanent 直接终态失败。
/// 这是投递路径内部的错误表示，不会以异常形式回到提交方。
#[derive(Debug, Clone)]
pub struct SendError {
    pub kind: FailureKind,
    pub detail: String,
}

impl SendError {
    /// 瞬时失败（网络抖动、服务商 5xx、超时）
    pub fn transient(detail: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            detail: detail.into(),
        }
    }

    /// 永久失败（无效收件人、地址格式错误）
    pub fn permanent(detail: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Permanent,
            detail: detail.into(),
        }
    }
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.detail)
    }
}

// ---------------------------------------------------------------------------
// ChannelSender trait
// ---------------------------------------------------------------------------

/// 渠道发送器 trait，各渠道实现具体的投递逻辑
///
/// 实现应当是无状态的，便于并发调用；同一通知重复调用必须安全。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChannelSender: Send + Sync {
    /// 该发送器支持的渠道
    fn channel(&self) -> Channel;

    /// 执行一次投递尝试
    async fn send(&self, notification: &Notification) -> Result<SendReceipt, SendError>;
}

// ---------------------------------------------------------------------------
// 邮件发送器
// ---------------------------------------------------------------------------

/// 模拟邮件发送器
///
/// 生产环境中替换为 SMTP 中继或邮件服务商（如 SendGrid）的 API 调用
pub struct EmailSender;

#[async_trait]
impl ChannelSender for EmailSender {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(&self, notification: &Notification) -> Result<SendReceipt, SendError> {
        let message_id = Uuid::now_v7().to_string();

        info!(
            channel = "email",
            notification_id = %notification.id,
            user_id = %notification.user_id,
            message_id = %message_id,
            subject = notification.subject.as_deref().unwrap_or_default(),
            "模拟发送邮件通知"
        );

        Ok(SendReceipt { message_id })
    }
}

// ---------------------------------------------------------------------------
// 短信发送器
// ---------------------------------------------------------------------------

/// 模拟短信发送器
///
/// 生产环境中替换为短信网关（如 Twilio）的 API 调用
pub struct SmsSender;

#[async_trait]
impl ChannelSender for SmsSender {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    async fn send(&self, notification: &Notification) -> Result<SendReceipt, SendError> {
        let message_id = Uuid::now_v7().to_string();

        info!(
            channel = "sms",
            notification_id = %notification.id,
            user_id = %notification.user_id,
            message_id = %message_id,
            body = %notification.body,
            "模拟发送短信通知"
        );

        Ok(SendReceipt { message_id })
    }
}

// ---------------------------------------------------------------------------
// 站内信发送器
// ---------------------------------------------------------------------------

/// 模拟站内信发送器
///
/// 生产环境中替换为推送服务或收件箱写入
pub struct InAppSender;

#[async_trait]
impl ChannelSender for InAppSender {
    fn channel(&self) -> Channel {
        Channel::InApp
    }

    async fn send(&self, notification: &Notification) -> Result<SendReceipt, SendError> {
        let message_id = Uuid::now_v7().to_string();

        info!(
            channel = "in-app",
            notification_id = %notification.id,
            user_id = %notification.user_id,
            message_id = %message_id,
            "模拟投递站内信"
        );

        Ok(SendReceipt { message_id })
    }
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------
