//! 投递工作者池
//!
//! 每个渠道固定数量的并发工作者，循环执行：认领队列条目 ->
//! 标记 Sending -> 带超时调用渠道发送器 -> 依据重试调度器的决定
//! 重新入队或写入终态 -> 追加尝试记录。工作者在迭代之间不保留
//! 任何状态，崩溃至多丢失手上的一个条目，由启动恢复流程重建。
//!
//! 收到关闭信号后工作者不再认领新条目；进行中的发送会自然完成。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use notify_shared::clock::SharedClock;
use notify_shared::config::DispatchConfig;
use notify_shared::observability::metric_names;

use crate::queue::DispatchQueues;
use crate::scheduler::{RetryDecision, RetryScheduler};
use crate::sender::ChannelSender;
use crate::store::NotificationStore;
use crate::types::{AttemptRecord, Channel, FailureKind, NotificationStatus, QueueItem};

// ---------------------------------------------------------------------------
// DispatchContext — 工作者共享上下文
// ---------------------------------------------------------------------------

/// 工作者共享的调度上下文
///
/// 所有可变状态都在存储和队列里，上下文本身只是只读句柄的集合。
pub struct DispatchContext {
    pub store: Arc<NotificationStore>,
    pub queues: Arc<DispatchQueues>,
    senders: HashMap<Channel, Arc<dyn ChannelSender>>,
    pub scheduler: RetryScheduler,
    pub clock: SharedClock,
    /// 单次发送的超时时间，超时按瞬时失败处理
    pub send_timeout: Duration,
}

impl DispatchContext {
    pub fn new(
        store: Arc<NotificationStore>,
        queues: Arc<DispatchQueues>,
        senders: Vec<Arc<dyn ChannelSender>>,
        scheduler: RetryScheduler,
        clock: SharedClock,
        send_timeout: Duration,
    ) -> Self {
        let senders = senders
            .into_iter()
            .map(|sender| (sender.channel(), sender))
            .collect();

        Self {
            store,
            queues,
            senders,
            scheduler,
            clock,
            send_timeout,
        }
    }

    fn sender_for(&self, channel: Channel) -> Option<&Arc<dyn ChannelSender>> {
        self.senders.get(&channel)
    }
}

// ---------------------------------------------------------------------------
// DeliveryWorkerPool
// ---------------------------------------------------------------------------

/// 投递工作者池
///
/// 各渠道独立配置工作者数量——渠道的吞吐/延迟特征不同。
pub struct DeliveryWorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl DeliveryWorkerPool {
    /// 启动全部工作者
    ///
    /// shutdown 变为 true 后工作者停止认领新条目并退出循环。
    pub fn spawn(
        ctx: Arc<DispatchContext>,
        config: &DispatchConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let mut handles = Vec::new();

        for channel in Channel::ALL {
            let count = match channel {
                Channel::Email => config.email_workers,
                Channel::Sms => config.sms_workers,
                Channel::InApp => config.in_app_workers,
            };

            for worker_id in 0..count {
                let ctx = ctx.clone();
                let shutdown = shutdown.clone();
                handles.push(tokio::spawn(worker_loop(ctx, channel, worker_id, shutdown)));
            }
        }

        info!(workers = handles.len(), "投递工作者池已启动");
        Self { handles }
    }

    /// 等待全部工作者退出
    ///
    /// 应在发出关闭信号后调用；进行中的发送会先完成。
    pub async fn join(self) {
        for result in futures::future::join_all(self.handles).await {
            if let Err(e) = result {
                error!(error = %e, "工作者任务异常退出");
            }
        }
        info!("投递工作者池已停止");
    }
}

/// 单个工作者的主循环
async fn worker_loop(
    ctx: Arc<DispatchContext>,
    channel: Channel,
    worker_id: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(channel = %channel, worker_id, "投递工作者已启动");

    let queue = ctx.queues.get(channel).clone();

    while let Some(item) = queue.claim(&mut shutdown, ctx.clock.as_ref()).await {
        process_item(&ctx, item).await;
    }

    info!(channel = %channel, worker_id, "投递工作者已停止");
}

// ---------------------------------------------------------------------------
// 条目处理
// ---------------------------------------------------------------------------

/// 处理一个已认领的队列条目
///
/// 拆分为独立函数而非方法，便于在测试中直接调用而无需启动完整的池。
pub(crate) async fn process_item(ctx: &DispatchContext, item: QueueItem) {
    let id = item.notification_id.as_str();

    // Queued -> Sending 状态门：CAS 失败说明条目已被并发处理
    // （重复出队）或记录已是终态，本次认领作废。
    let notification = match ctx.store.begin_send(id, ctx.clock.now()) {
        Ok(n) => n,
        Err(e) => {
            debug!(
                notification_id = id,
                error = %e,
                "条目已被并发处理，放弃本次认领"
            );
            return;
        }
    };

    let Some(sender) = ctx.sender_for(item.channel) else {
        // 没有注册对应渠道的发送器：不可能靠重试恢复，按永久失败处理
        error!(channel = %item.channel, notification_id = id, "未找到该渠道的发送器");
        handle_failure(ctx, &item, FailureKind::Permanent, "渠道发送器未注册".to_string()).await;
        return;
    };

    let started = Instant::now();
    let outcome = tokio::time::timeout(ctx.send_timeout, sender.send(&notification)).await;

    metrics::histogram!(
        metric_names::SEND_DURATION_SECONDS,
        "channel" => item.channel.as_str()
    )
    .record(started.elapsed().as_secs_f64());

    match outcome {
        Ok(Ok(receipt)) => {
            let now = ctx.clock.now();
            match ctx.store.complete_send(
                id,
                NotificationStatus::Delivered,
                AttemptRecord::success(now),
                now,
            ) {
                Ok(_) => {
                    metrics::counter!(
                        metric_names::DELIVERED_TOTAL,
                        "channel" => item.channel.as_str()
                    )
                    .increment(1);
                    info!(
                        notification_id = id,
                        channel = %item.channel,
                        attempt_number = item.attempt_number,
                        message_id = %receipt.message_id,
                        "通知投递成功"
                    );
                }
                Err(e) => {
                    // 竞争中败给了另一个写入者，丢弃本次结果
                    warn!(notification_id = id, error = %e, "投递结果写入被拒绝，已丢弃");
                }
            }
        }
        Ok(Err(send_err)) => {
            handle_failure(ctx, &item, send_err.kind, send_err.detail).await;
        }
        Err(_elapsed) => {
            let detail = format!("发送超时（{}ms）", ctx.send_timeout.as_millis());
            handle_failure(ctx, &item, FailureKind::Transient, detail).await;
        }
    }
}

/// 处理一次失败的投递尝试
///
/// 由重试调度器决定去向：重新入队等待退避，或写入终态 Failed。
async fn handle_failure(ctx: &DispatchContext, item: &QueueItem, kind: FailureKind, detail: String) {
    let id = item.notification_id.as_str();
    let now = ctx.clock.now();
    let record = AttemptRecord::failure(now, kind, detail.clone());

    match ctx.scheduler.evaluate(item.attempt_number, kind, now) {
        RetryDecision::Retry {
            not_before,
            next_attempt,
        } => {
            // 先把记录写回 Queued，再入队：即便进程在两步之间崩溃，
            // Queued 状态也能被启动恢复流程重新入队。
            if let Err(e) = ctx
                .store
                .complete_send(id, NotificationStatus::Queued, record, now)
            {
                debug!(notification_id = id, error = %e, "重试写入被拒绝，已丢弃");
                return;
            }

            metrics::counter!(
                metric_names::RETRIES_TOTAL,
                "channel" => item.channel.as_str()
            )
            .increment(1);

            let retry_item = QueueItem {
                notification_id: item.notification_id.clone(),
                channel: item.channel,
                attempt_number: next_attempt,
                not_before,
            };

            if let Err(e) = ctx.queues.get(item.channel).push(retry_item) {
                // 队列已满，无法兑现重试：转为终态失败，避免记录滞留
                error!(notification_id = id, error = %e, "重试入队失败，通知转为终态失败");
                if let Err(e) = ctx.store.transition(
                    id,
                    NotificationStatus::Queued,
                    NotificationStatus::Failed,
                    now,
                ) {
                    warn!(notification_id = id, error = %e, "终态回退写入被拒绝，已丢弃");
                }
                return;
            }

            warn!(
                notification_id = id,
                channel = %item.channel,
                attempt_number = item.attempt_number,
                next_attempt,
                not_before = %not_before,
                error = %detail,
                "投递失败，已安排退避重试"
            );
        }
        RetryDecision::GiveUp => {
            match ctx
                .store
                .complete_send(id, NotificationStatus::Failed, record, now)
            {
                Ok(_) => {
                    metrics::counter!(
                        metric_names::FAILED_TOTAL,
                        "channel" => item.channel.as_str()
                    )
                    .increment(1);
                    warn!(
                        notification_id = id,
                        channel = %item.channel,
                        attempt_number = item.attempt_number,
                        error = %detail,
                        "重试已耗尽或失败不可恢复，通知终态失败"
                    );
                }
                Err(e) => {
                    debug!(notification_id = id, error = %e, "终态写入被拒绝，已丢弃");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::{SendError, SendReceipt};
    use crate::types::{AttemptOutcome, NewNotification, Notification};
    use async_trait::async_trait;
    use notify_shared::clock::SystemClock;
    use notify_shared::retry::RetryPolicy;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// 按脚本依次返回结果的发送器，脚本耗尽后恒成功
    struct ScriptedSender {
        channel: Channel,
        script: Mutex<VecDeque<Result<SendReceipt, SendError>>>,
    }

    impl ScriptedSender {
        fn new(channel: Channel, script: Vec<Result<SendReceipt, SendError>>) -> Self {
            Self {
                channel,
                script: Mutex::new(script.into()),
            }
        }

        fn always_ok(channel: Channel) -> Self {
            Self::new(channel, vec![])
        }
    }

    #[async_trait]
    impl ChannelSender for ScriptedSender {
        fn channel(&self) -> Channel {
            self.channel
        }

        async fn send(&self, _notification: &Notification) -> Result<SendReceipt, SendError> {
            self.script.lock().pop_front().unwrap_or_else(|| {
                Ok(SendReceipt {
                    message_id: "msg-ok".to_string(),
                })
            })
        }
    }

    /// 永远不在超时前返回的发送器
    struct SlowSender(Channel);

    #[async_trait]
    impl ChannelSender for SlowSender {
        fn channel(&self) -> Channel {
            self.0
        }

        async fn send(&self, _notification: &Notification) -> Result<SendReceipt, SendError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(SendReceipt {
                message_id: "never".to_string(),
            })
        }
    }

    fn build_ctx(sender: Arc<dyn ChannelSender>, max_attempts: u32) -> Arc<DispatchContext> {
        let policy = RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            jitter: 0.0,
        };

        Arc::new(DispatchContext::new(
            Arc::new(NotificationStore::new()),
            Arc::new(DispatchQueues::new(100)),
            vec![sender],
            RetryScheduler::new(policy),
            Arc::new(SystemClock),
            Duration::from_millis(50),
        ))
    }

    /// 插入一条 Queued 状态的短信通知并返回对应的队列条目
    fn enqueue_notification(ctx: &DispatchContext) -> QueueItem {
        let now = ctx.clock.now();
        let n = ctx
            .store
            .insert(&NewNotification::new("u1", Channel::Sms, "hello"), now);
        ctx.store
            .transition(
                &n.id,
                NotificationStatus::Pending,
                NotificationStatus::Queued,
                now,
            )
            .unwrap();

        QueueItem {
            notification_id: n.id,
            channel: Channel::Sms,
            attempt_number: 1,
            not_before: now,
        }
    }

    #[tokio::test]
    async fn test_process_item_success() {
        let ctx = build_ctx(Arc::new(ScriptedSender::always_ok(Channel::Sms)), 5);
        let item = enqueue_notification(&ctx);
        let id = item.notification_id.clone();

        process_item(&ctx, item).await;

        let n = ctx.store.get(&id).unwrap();
        assert_eq!(n.status, NotificationStatus::Delivered);
        assert_eq!(n.attempts.len(), 1);
        assert!(n.attempts[0].is_success());
    }

    #[tokio::test]
    async fn test_permanent_failure_skips_retries() {
        let sender = ScriptedSender::new(
            Channel::Sms,
            vec![Err(SendError::permanent("无效的手机号"))],
        );
        let ctx = build_ctx(Arc::new(sender), 5);
        let item = enqueue_notification(&ctx);
        let id = item.notification_id.clone();

        process_item(&ctx, item).await;

        // 首次尝试即终态失败，恰好一条尝试记录，不重新入队
        let n = ctx.store.get(&id).unwrap();
        assert_eq!(n.status, NotificationStatus::Failed);
        assert_eq!(n.attempts.len(), 1);
        assert_eq!(
            n.attempts[0].outcome,
            AttemptOutcome::Failure(FailureKind::Permanent)
        );
        assert_eq!(ctx.queues.get(Channel::Sms).len(), 0);
    }

    #[tokio::test]
    async fn test_transient_failure_requeues_with_next_attempt() {
        let sender = ScriptedSender::new(Channel::Sms, vec![Err(SendError::transient("网关 503"))]);
        let ctx = build_ctx(Arc::new(sender), 3);
        let item = enqueue_notification(&ctx);
        let id = item.notification_id.clone();

        process_item(&ctx, item).await;

        let n = ctx.store.get(&id).unwrap();
        assert_eq!(n.status, NotificationStatus::Queued);
        assert_eq!(n.attempts.len(), 1);

        // 重新入队的条目携带下一个尝试序号
        let queue = ctx.queues.get(Channel::Sms);
        assert_eq!(queue.len(), 1);
        let (_tx, mut shutdown) = watch::channel(false);
        let retry_item = queue.claim(&mut shutdown, &SystemClock).await.unwrap();
        assert_eq!(retry_item.attempt_number, 2);
        assert_eq!(retry_item.notification_id, id);
    }

    #[tokio::test]
    async fn test_transient_failure_at_max_attempts_fails() {
        let sender = ScriptedSender::new(Channel::Sms, vec![Err(SendError::transient("网关 503"))]);
        let ctx = build_ctx(Arc::new(sender), 1);
        let item = enqueue_notification(&ctx);
        let id = item.notification_id.clone();

        process_item(&ctx, item).await;

        let n = ctx.store.get(&id).unwrap();
        assert_eq!(n.status, NotificationStatus::Failed);
        assert_eq!(n.attempts.len(), 1);
        assert_eq!(ctx.queues.get(Channel::Sms).len(), 0);
    }

    #[tokio::test]
    async fn test_retry_enqueue_failure_falls_back_to_failed() {
        // 容量为 0 的队列让重试入队必然失败
        let sender = ScriptedSender::new(Channel::Sms, vec![Err(SendError::transient("网关 503"))]);
        let ctx = Arc::new(DispatchContext::new(
            Arc::new(NotificationStore::new()),
            Arc::new(DispatchQueues::new(0)),
            vec![Arc::new(sender)],
            RetryScheduler::new(RetryPolicy {
                max_attempts: 5,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(10),
                jitter: 0.0,
            }),
            Arc::new(SystemClock),
            Duration::from_millis(50),
        ));
        let item = enqueue_notification(&ctx);
        let id = item.notification_id.clone();

        process_item(&ctx, item).await;

        // 无法兑现重试的通知转为终态失败而非滞留在 Queued
        let n = ctx.store.get(&id).unwrap();
        assert_eq!(n.status, NotificationStatus::Failed);
        assert_eq!(n.attempts.len(), 1);
    }

    #[tokio::test]
    async fn test_send_timeout_treated_as_transient() {
        let ctx = build_ctx(Arc::new(SlowSender(Channel::Sms)), 2);
        let item = enqueue_notification(&ctx);
        let id = item.notification_id.clone();

        process_item(&ctx, item).await;

        let n = ctx.store.get(&id).unwrap();
        // 超时按瞬时失败处理：记录一次失败并安排重试
        assert_eq!(n.status, NotificationStatus::Queued);
        assert_eq!(n.attempts.len(), 1);
        assert_eq!(
            n.attempts[0].outcome,
            AttemptOutcome::Failure(FailureKind::Transient)
        );
        assert!(
            n.attempts[0]
                .error_detail
                .as_deref()
                .unwrap()
                .contains("超时")
        );
    }

    #[tokio::test]
    async fn test_missing_sender_is_permanent_failure() {
        // 上下文里只注册了 email 发送器，条目却是短信渠道
        let ctx = build_ctx(Arc::new(ScriptedSender::always_ok(Channel::Email)), 5);
        let item = enqueue_notification(&ctx);
        let id = item.notification_id.clone();

        process_item(&ctx, item).await;

        let n = ctx.store.get(&id).unwrap();
        assert_eq!(n.status, NotificationStatus::Failed);
        assert_eq!(n.attempts.len(), 1);
    }

    #[tokio::test]
    async fn test_forced_double_claim_converges() {
        let ctx = build_ctx(Arc::new(ScriptedSender::always_ok(Channel::Sms)), 5);
        let item = enqueue_notification(&ctx);
        let id = item.notification_id.clone();

        // 模拟重复出队：同一条目被两个工作者同时处理
        let first = {
            let ctx = ctx.clone();
            let item = item.clone();
            tokio::spawn(async move { process_item(&ctx, item).await })
        };
        let second = {
            let ctx = ctx.clone();
            let item = item.clone();
            tokio::spawn(async move { process_item(&ctx, item).await })
        };
        first.await.unwrap();
        second.await.unwrap();

        // 幂等收敛：恰好一个终态，恰好一条被采纳的尝试记录
        let n = ctx.store.get(&id).unwrap();
        assert_eq!(n.status, NotificationStatus::Delivered);
        assert_eq!(n.attempts.len(), 1);
    }

    #[tokio::test]
    async fn test_pool_spawn_and_shutdown() {
        let ctx = build_ctx(Arc::new(ScriptedSender::always_ok(Channel::Sms)), 5);
        let (tx, shutdown) = watch::channel(false);

        let config = DispatchConfig {
            email_workers: 1,
            sms_workers: 2,
            in_app_workers: 1,
            ..DispatchConfig::default()
        };
        let pool = DeliveryWorkerPool::spawn(ctx.clone(), &config, shutdown);

        let item = enqueue_notification(&ctx);
        let id = item.notification_id.clone();
        ctx.queues.get(Channel::Sms).push(item).unwrap();

        // 等待池子把通知送达
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            if ctx.store.get(&id).unwrap().status == NotificationStatus::Delivered {
                break;
            }
            assert!(Instant::now() < deadline, "等待投递超时");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        tx.send(true).unwrap();
        pool.join().await;
    }
}
