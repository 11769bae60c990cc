//! 通知类型定义
//!
//! 定义通知记录、渠道、状态机和投递尝试相关的数据结构。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use notify_shared::error::{NotifyError, Result};

// ---------------------------------------------------------------------------
// Channel — 投递渠道
// ---------------------------------------------------------------------------

/// 投递渠道
///
/// 封闭的渠道集合：新增渠道时在此处加变体并注册对应的发送器即可，
/// 调用方不需要散落的条件分支。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Channel {
    Email,
    Sms,
    InApp,
}

impl Channel {
    /// 全部渠道，用于构建 per-channel 队列和工作者池
    pub const ALL: [Channel; 3] = [Channel::Email, Channel::Sms, Channel::InApp];

    /// 渠道标识（用于日志和指标标签）
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
            Self::InApp => "in-app",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// NotificationStatus — 状态机
// ---------------------------------------------------------------------------

/// 通知状态
///
/// 状态机: Pending -> Queued -> Sending -> {Delivered, Failed}；
/// Delivered -> Read 仅限站内信。终态不可再变更。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Queued,
    Sending,
    Delivered,
    Failed,
    Read,
}

impl NotificationStatus {
    /// 状态标识（用于日志和错误信息）
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Sending => "sending",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::Read => "read",
        }
    }

    /// 是否为终态
    ///
    /// Delivered 对站内信而言还有 Read 一条出路，由 mark_read 单独管控，
    /// 投递路径上视同终态。
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Failed | Self::Read)
    }
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// 投递尝试记录
// ---------------------------------------------------------------------------

/// 发送失败分类
///
/// Transient（网络/超时/服务商 5xx 级别）允许退避重试；
/// Permanent（无效收件人、地址格式错误）直接终态失败，不浪费重试额度。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Transient,
    Permanent,
}

/// 单次投递尝试的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", content = "kind", rename_all = "lowercase")]
pub enum AttemptOutcome {
    Success,
    Failure(FailureKind),
}

/// 投递尝试记录
///
/// 按发生顺序追加到通知的 attempts 历史中，
/// 长度不会超过配置的尝试次数上限。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecord {
    /// 尝试发生时间
    pub timestamp: DateTime<Utc>,
    /// 尝试结果
    pub outcome: AttemptOutcome,
    /// 失败详情（成功时为空）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl AttemptRecord {
    /// 创建成功记录
    pub fn success(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            outcome: AttemptOutcome::Success,
            error_detail: None,
        }
    }

    /// 创建失败记录
    pub fn failure(timestamp: DateTime<Utc>, kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            timestamp,
            outcome: AttemptOutcome::Failure(kind),
            error_detail: Some(detail.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == AttemptOutcome::Success
    }
}

// ---------------------------------------------------------------------------
// Notification — 通知记录
// ---------------------------------------------------------------------------

/// 通知记录
///
/// 存储层独占持有的完整表示；其他组件只持有 id 和本次操作所需字段，
/// 所有变更都经由存储层的条件更新接口完成。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// 通知唯一标识（UUIDv7，创建时分配，不可变）
    pub id: String,
    /// 目标用户 ID
    pub user_id: String,
    /// 投递渠道（创建后不可变）
    pub channel: Channel,
    /// 邮件主题（仅 email 渠道存在）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// 通知正文
    pub body: String,
    /// 当前状态
    pub status: NotificationStatus,
    /// 投递尝试历史，按发生顺序排列
    pub attempts: Vec<AttemptRecord>,
    /// 创建时间
    pub created_at: DateTime<Utc>,
    /// 最后更新时间
    pub updated_at: DateTime<Utc>,
    /// 已读时间（仅站内信，至多设置一次）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// NewNotification — 提交请求
// ---------------------------------------------------------------------------

/// 通知提交请求
///
/// 经过校验后由协调器持久化为 Pending 记录。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNotification {
    pub user_id: String,
    pub channel: Channel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub body: String,
}

impl NewNotification {
    pub fn new(user_id: impl Into<String>, channel: Channel, body: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            channel,
            subject: None,
            body: body.into(),
        }
    }

    /// 设置邮件主题
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// 校验提交请求
    ///
    /// 规则：user_id 和 body 非空；subject 当且仅当渠道为 email 时存在。
    /// 校验失败的请求在持久化之前即被拒绝，永远不会进入重试。
    pub fn validate(&self) -> Result<()> {
        if self.user_id.trim().is_empty() {
            return Err(NotifyError::Validation("userId 不能为空".to_string()));
        }

        if self.body.trim().is_empty() {
            return Err(NotifyError::Validation("message 不能为空".to_string()));
        }

        match (self.channel, &self.subject) {
            (Channel::Email, None) => Err(NotifyError::Validation(
                "email 渠道必须提供 subject".to_string(),
            )),
            (Channel::Email, Some(subject)) if subject.trim().is_empty() => Err(
                NotifyError::Validation("email 渠道的 subject 不能为空".to_string()),
            ),
            (channel, Some(_)) if channel != Channel::Email => Err(NotifyError::Validation(
                format!("{channel} 渠道不支持 subject"),
            )),
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// QueueItem — 队列条目
// ---------------------------------------------------------------------------

/// 调度队列条目
///
/// 短暂存在的工作单元：只携带 id 和本次投递所需的调度信息，
/// 完整记录始终由存储层持有。进程重启后由恢复流程从存储层重建。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    pub notification_id: String,
    pub channel: Channel,
    /// 本次投递的尝试序号（1-based）
    pub attempt_number: u32,
    /// 最早可投递时间，重试退避通过推迟该时间实现
    pub not_before: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------
