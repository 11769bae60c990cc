//! 对外数据传输对象
//!
//! 提交请求与各类响应视图的线格式定义，统一 camelCase 命名。
//! 内部记录（`Notification`）不直接暴露，视图只带调用方需要的字段。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Channel, NewNotification, Notification, NotificationStatus};

// ---------------------------------------------------------------------------
// 请求
// ---------------------------------------------------------------------------

/// 提交通知的请求体
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub user_id: String,
    /// 投递渠道，线格式字段名沿用 `type`
    #[serde(rename = "type")]
    pub channel: Channel,
    pub message: String,
    /// 仅邮件渠道使用
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

impl From<SubmitRequest> for NewNotification {
    fn from(req: SubmitRequest) -> Self {
        NewNotification {
            user_id: req.user_id,
            channel: req.channel,
            subject: req.subject,
            body: req.message,
        }
    }
}

// ---------------------------------------------------------------------------
// 响应
// ---------------------------------------------------------------------------

/// 提交成功的受理凭据
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAccepted {
    pub id: String,
    pub status: NotificationStatus,
    pub created_at: DateTime<Utc>,
}

impl From<&Notification> for SubmitAccepted {
    fn from(n: &Notification) -> Self {
        Self {
            id: n.id.clone(),
            status: n.status,
            created_at: n.created_at,
        }
    }
}

/// 用户视角的通知视图，用于列表查询
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationView {
    pub id: String,
    #[serde(rename = "type")]
    pub channel: Channel,
    pub message: String,
    pub status: NotificationStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
}

impl From<&Notification> for NotificationView {
    fn from(n: &Notification) -> Self {
        Self {
            id: n.id.clone(),
            channel: n.channel,
            message: n.body.clone(),
            status: n.status,
            created_at: n.created_at,
            read_at: n.read_at,
        }
    }
}

/// 标记已读的回执
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub id: String,
    pub status: NotificationStatus,
    pub read_at: Option<DateTime<Utc>>,
}

impl From<&Notification> for ReadReceipt {
    fn from(n: &Notification) -> Self {
        Self {
            id: n.id.clone(),
            status: n.status,
            read_at: n.read_at,
        }
    }
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------
