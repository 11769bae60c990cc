//! 调度协调器
//!
//! 对外入口：接收提交、查询状态、按用户列出、标记已读。
//! 协调器只负责校验、落库和入队，真正的投递由工作者池完成；
//! 提交在入队成功后即返回，不等待投递结果。

use std::sync::Arc;

use tracing::{error, info};

use notify_shared::clock::SharedClock;
use notify_shared::error::Result;
use notify_shared::observability::metric_names;

use crate::queue::DispatchQueues;
use crate::store::NotificationStore;
use crate::types::{Channel, NewNotification, Notification, NotificationStatus, QueueItem};

/// 通知调度协调器
#[derive(Clone)]
pub struct DispatchCoordinator {
    store: Arc<NotificationStore>,
    queues: Arc<DispatchQueues>,
    clock: SharedClock,
}

impl DispatchCoordinator {
    pub fn new(store: Arc<NotificationStore>, queues: Arc<DispatchQueues>, clock: SharedClock) -> Self {
        Self {
            store,
            queues,
            clock,
        }
    }

    // -----------------------------------------------------------------------
    // 提交
    // -----------------------------------------------------------------------

    /// 提交一条新通知
    ///
    /// 校验 -> 落库（Pending）-> 标记 Queued -> 入队，
    /// 返回入队完成后的记录快照。入队失败时回滚为 Pending 并返回错误，
    /// 调用方可稍后重新提交。
    pub fn submit(&self, new: NewNotification) -> Result<Notification> {
        new.validate()?;

        let now = self.clock.now();
        let notification = self.store.insert(&new, now);
        let id = notification.id.clone();

        // 先置 Queued 再入队：避免工作者在记录仍为 Pending 时
        // 就认领到条目。入队失败的窗口由回滚兜底。
        self.store.transition(
            &id,
            NotificationStatus::Pending,
            NotificationStatus::Queued,
            now,
        )?;

        let item = QueueItem {
            notification_id: id.clone(),
            channel: new.channel,
            attempt_number: 1,
            not_before: now,
        };

        if let Err(e) = self.queues.get(new.channel).push(item) {
            // 队列已满：回滚状态，让调用方重试提交
            error!(notification_id = %id, channel = %new.channel, error = %e, "入队失败，已回滚为待处理");
            self.store.transition(
                &id,
                NotificationStatus::Queued,
                NotificationStatus::Pending,
                now,
            )?;
            return Err(e);
        }

        metrics::counter!(
            metric_names::SUBMITTED_TOTAL,
            "channel" => new.channel.as_str()
        )
        .increment(1);

        info!(
            notification_id = %id,
            user_id = %new.user_id,
            channel = %new.channel,
            "通知已提交并入队"
        );

        self.store.get(&id)
    }

    // -----------------------------------------------------------------------
    // 查询
    // -----------------------------------------------------------------------

    /// 按 ID 查询通知的当前状态快照
    pub fn get_status(&self, id: &str) -> Result<Notification> {
        self.store.get(id)
    }

    /// 列出某用户的通知，按创建时间从新到旧
    pub fn list_for_user(&self, user_id: &str, channel: Option<Channel>) -> Vec<Notification> {
        self.store.list_for_user(user_id, channel)
    }

    // -----------------------------------------------------------------------
    // 已读
    // -----------------------------------------------------------------------

    /// 标记站内通知为已读
    ///
    /// 仅对 Delivered 状态的站内通知有效；Read 是终态，不可逆。
    pub fn mark_read(&self, id: &str) -> Result<Notification> {
        let notification = self.store.mark_read(id, self.clock.now())?;
        info!(notification_id = %id, "通知已标记为已读");
        Ok(notification)
    }

    // -----------------------------------------------------------------------
    // 启动恢复
    // -----------------------------------------------------------------------

    /// 启动时恢复中断的投递
    ///
    /// 上次进程退出时可能留下两类记录：
    /// - Sending：发送被打断，结果未知，按未发送处理回退为 Queued；
    /// - Queued：已入队但队列内容随进程消失。
    /// 两类最终都重新入队，尝试序号接在已有记录之后。
    /// 入队失败的记录保持 Queued（留待下次恢复），不中断启动。
    /// 返回重新入队的数量。
    pub fn recover(&self) -> Result<usize> {
        let now = self.clock.now();

        for n in self.store.find_by_status(NotificationStatus::Sending) {
            self.store.transition(
                &n.id,
                NotificationStatus::Sending,
                NotificationStatus::Queued,
                now,
            )?;
        }

        let queued = self.store.find_by_status(NotificationStatus::Queued);
        let mut recovered = 0;

        for n in queued {
            let item = QueueItem {
                notification_id: n.id.clone(),
                channel: n.channel,
                attempt_number: n.attempts.len() as u32 + 1,
                not_before: now,
            };
            match self.queues.get(n.channel).push(item) {
                Ok(()) => recovered += 1,
                Err(e) => {
                    // 队列已满不致命：记录留在 Queued，下次恢复再试
                    error!(notification_id = %n.id, error = %e, "恢复入队失败，记录保持 Queued");
                }
            }
        }

        if recovered > 0 {
            info!(recovered, "已恢复中断的投递");
        }
        Ok(recovered)
    }
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------
