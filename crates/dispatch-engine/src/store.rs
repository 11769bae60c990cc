//! 通知存储
//!
//! 通知记录的唯一持有者：所有状态变更都必须经过这里的条件更新接口。
//! 基于 DashMap 的分片锁实现，`get_mut` 返回的 entry guard 在持有期间
//! 独占该记录，使"仅当当前状态为 X 时更新为 Y"成为真正的原子
//! compare-and-set，而非先读后写。
//!
//! 这是整个引擎并发安全的两根支柱之一（另一根是队列的原子认领）：
//! 两个工作者竞争同一通知时，只有一个能完成 Sending 之后的转移，
//! 败者得到 InvalidState 并丢弃自己的结果。

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use notify_shared::error::{NotifyError, Result};

use crate::types::{AttemptRecord, Channel, NewNotification, Notification, NotificationStatus};

/// 通知存储
#[derive(Default)]
pub struct NotificationStore {
    records: DashMap<String, Notification>,
}

impl NotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 持久化一条新通知，初始状态 Pending
    ///
    /// 调用方负责预先校验请求；id 使用 UUIDv7，按时间有序，
    /// 使 list_for_user 的排序在同一毫秒内也稳定。
    pub fn insert(&self, request: &NewNotification, now: DateTime<Utc>) -> Notification {
        let notification = Notification {
            id: Uuid::now_v7().to_string(),
            user_id: request.user_id.clone(),
            channel: request.channel,
            subject: request.subject.clone(),
            body: request.body.clone(),
            status: NotificationStatus::Pending,
            attempts: Vec::new(),
            created_at: now,
            updated_at: now,
            read_at: None,
        };

        self.records
            .insert(notification.id.clone(), notification.clone());
        notification
    }

    /// 按 id 查询通知
    pub fn get(&self, id: &str) -> Result<Notification> {
        self.records
            .get(id)
            .map(|entry| entry.clone())
            .ok_or_else(|| Self::not_found(id))
    }

    /// 查询某用户的全部通知，可按渠道过滤，按创建时间倒序
    pub fn list_for_user(&self, user_id: &str, channel: Option<Channel>) -> Vec<Notification> {
        let mut notifications: Vec<Notification> = self
            .records
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .filter(|entry| channel.is_none_or(|c| entry.channel == c))
            .map(|entry| entry.clone())
            .collect();

        notifications.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        notifications
    }

    /// 按状态查询通知（用于进程重启后的队列恢复）
    pub fn find_by_status(&self, status: NotificationStatus) -> Vec<Notification> {
        self.records
            .iter()
            .filter(|entry| entry.status == status)
            .map(|entry| entry.clone())
            .collect()
    }

    /// 原子条件状态转移："仅当当前状态为 from 时更新为 to"
    ///
    /// 当前状态不符时返回 InvalidState 且不做任何修改，
    /// 调用方据此实现"终态写入者胜出、非终态写入者退让"。
    pub fn transition(
        &self,
        id: &str,
        from: NotificationStatus,
        to: NotificationStatus,
        now: DateTime<Utc>,
    ) -> Result<Notification> {
        let mut entry = self.records.get_mut(id).ok_or_else(|| Self::not_found(id))?;

        if entry.status != from {
            return Err(NotifyError::InvalidState {
                id: id.to_string(),
                current: entry.status.as_str().to_string(),
                operation: format!("transition {from} -> {to}"),
            });
        }

        entry.status = to;
        entry.updated_at = now;
        Ok(entry.clone())
    }

    /// 工作者在调用发送器之前标记投递中（Queued -> Sending）
    ///
    /// CAS 失败说明该条目已被并发处理（重复出队或已终态），
    /// 调用方应将本次认领作废。
    pub fn begin_send(&self, id: &str, now: DateTime<Utc>) -> Result<Notification> {
        self.transition(
            id,
            NotificationStatus::Queued,
            NotificationStatus::Sending,
            now,
        )
    }

    /// 结束一次投递尝试：原子地追加尝试记录并离开 Sending 状态
    ///
    /// 仅当当前状态为 Sending 时生效；目标状态只能是 Delivered（成功）、
    /// Failed（终态失败）或 Queued（等待重试）。竞争中的败者在此处
    /// 得到 InvalidState——它的尝试记录不会被追加，保证历史中只保留
    /// 被采纳的那一次结果。
    pub fn complete_send(
        &self,
        id: &str,
        to: NotificationStatus,
        record: AttemptRecord,
        now: DateTime<Utc>,
    ) -> Result<Notification> {
        if !matches!(
            to,
            NotificationStatus::Delivered | NotificationStatus::Failed | NotificationStatus::Queued
        ) {
            return Err(NotifyError::Internal(format!(
                "complete_send 不允许的目标状态: {to}"
            )));
        }

        let mut entry = self.records.get_mut(id).ok_or_else(|| Self::not_found(id))?;

        if entry.status != NotificationStatus::Sending {
            return Err(NotifyError::InvalidState {
                id: id.to_string(),
                current: entry.status.as_str().to_string(),
                operation: format!("complete_send -> {to}"),
            });
        }

        entry.attempts.push(record);
        entry.status = to;
        entry.updated_at = now;
        Ok(entry.clone())
    }

    /// 标记站内信已读（Delivered -> Read）
    ///
    /// 仅站内信且当前状态恰为 Delivered 时合法；read_at 至多设置一次。
    pub fn mark_read(&self, id: &str, now: DateTime<Utc>) -> Result<Notification> {
        let mut entry = self.records.get_mut(id).ok_or_else(|| Self::not_found(id))?;

        if entry.channel != Channel::InApp {
            return Err(NotifyError::InvalidState {
                id: id.to_string(),
                current: entry.status.as_str().to_string(),
                operation: format!("mark_read（{} 渠道不支持已读）", entry.channel),
            });
        }

        if entry.status != NotificationStatus::Delivered {
            return Err(NotifyError::InvalidState {
                id: id.to_string(),
                current: entry.status.as_str().to_string(),
                operation: "mark_read".to_string(),
            });
        }

        entry.status = NotificationStatus::Read;
        entry.read_at = Some(now);
        entry.updated_at = now;
        Ok(entry.clone())
    }

    /// 当前记录总数
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn not_found(id: &str) -> NotifyError {
        NotifyError::NotFound {
            entity: "Notification".to_string(),
            id: id.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------
