//! 端到端调度流程测试
//!
//! 启动真实的工作者池，验证从提交到终态的完整链路：
//! 成功投递、瞬时失败后的退避重试、永久失败、已读标记。

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_test::assert_ok;

use notify_dispatch::coordinator::DispatchCoordinator;
use notify_dispatch::queue::DispatchQueues;
use notify_dispatch::scheduler::RetryScheduler;
use notify_dispatch::sender::{ChannelSender, SendError, SendReceipt};
use notify_dispatch::store::NotificationStore;
use notify_dispatch::types::{
    AttemptOutcome, Channel, FailureKind, NewNotification, Notification, NotificationStatus,
};
use notify_dispatch::worker::{DeliveryWorkerPool, DispatchContext};
use notify_shared::clock::SystemClock;
use notify_shared::config::DispatchConfig;
use notify_shared::retry::RetryPolicy;

/// 前 N 次返回瞬时失败，之后恒成功
struct FlakySender {
    channel: Channel,
    failures_remaining: AtomicU32,
}

impl FlakySender {
    fn new(channel: Channel, failures: u32) -> Self {
        Self {
            channel,
            failures_remaining: AtomicU32::new(failures),
        }
    }
}

#[async_trait]
impl ChannelSender for FlakySender {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(&self, _notification: &Notification) -> Result<SendReceipt, SendError> {
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0
            && self
                .failures_remaining
                .compare_exchange(remaining, remaining - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            return Err(SendError::transient("网关暂时不可用"));
        }
        Ok(SendReceipt {
            message_id: "msg-e2e".to_string(),
        })
    }
}

/// 永远返回永久失败的发送器
struct RejectingSender(Channel);

#[async_trait]
impl ChannelSender for RejectingSender {
    fn channel(&self) -> Channel {
        self.0
    }

    async fn send(&self, _notification: &Notification) -> Result<SendReceipt, SendError> {
        Err(SendError::permanent("收件地址不存在"))
    }
}

struct Harness {
    coordinator: DispatchCoordinator,
    store: Arc<NotificationStore>,
    pool: DeliveryWorkerPool,
    shutdown_tx: watch::Sender<bool>,
}

impl Harness {
    /// 毫秒级退避、零抖动，让重试在测试时限内跑完
    fn start(sender: Arc<dyn ChannelSender>, max_attempts: u32) -> Self {
        let store = Arc::new(NotificationStore::new());
        let queues = Arc::new(DispatchQueues::new(100));
        let clock = Arc::new(SystemClock);

        let policy = RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(50),
            jitter: 0.0,
        };

        let ctx = Arc::new(DispatchContext::new(
            store.clone(),
            queues.clone(),
            vec![sender],
            RetryScheduler::new(policy),
            clock.clone(),
            Duration::from_millis(200),
        ));

        let config = DispatchConfig {
            email_workers: 2,
            sms_workers: 2,
            in_app_workers: 2,
            ..DispatchConfig::default()
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let pool = DeliveryWorkerPool::spawn(ctx, &config, shutdown_rx);
        let coordinator = DispatchCoordinator::new(store.clone(), queues, clock);

        Self {
            coordinator,
            store,
            pool,
            shutdown_tx,
        }
    }

    /// 轮询等待通知到达终态
    async fn wait_terminal(&self, id: &str) -> Notification {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let n = self.store.get(id).unwrap();
            if n.status.is_terminal() {
                return n;
            }
            assert!(Instant::now() < deadline, "等待终态超时: {}", n.status);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn stop(self) {
        self.shutdown_tx.send(true).unwrap();
        self.pool.join().await;
    }
}

#[tokio::test]
async fn test_flaky_sender_recovers_after_retries() {
    // 前两次瞬时失败，第三次成功
    let harness = Harness::start(Arc::new(FlakySender::new(Channel::Email, 2)), 5);

    let n = harness
        .coordinator
        .submit(NewNotification::new("u1", Channel::Email, "Welcome").with_subject("Hi"))
        .unwrap();

    let done = harness.wait_terminal(&n.id).await;
    assert_eq!(done.status, NotificationStatus::Delivered);
    assert_eq!(done.attempts.len(), 3);
    assert_eq!(
        done.attempts[0].outcome,
        AttemptOutcome::Failure(FailureKind::Transient)
    );
    assert_eq!(
        done.attempts[1].outcome,
        AttemptOutcome::Failure(FailureKind::Transient)
    );
    assert!(done.attempts[2].is_success());

    harness.stop().await;
}

#[tokio::test]
async fn test_permanent_failure_terminates_immediately() {
    let harness = Harness::start(Arc::new(RejectingSender(Channel::Email)), 5);

    let n = harness
        .coordinator
        .submit(
            NewNotification::new("u1", Channel::Email, "您的账单已生成")
                .with_subject("八月账单"),
        )
        .unwrap();

    let done = harness.wait_terminal(&n.id).await;
    // 永久失败不消耗剩余重试次数
    assert_eq!(done.status, NotificationStatus::Failed);
    assert_eq!(done.attempts.len(), 1);
    assert_eq!(
        done.attempts[0].outcome,
        AttemptOutcome::Failure(FailureKind::Permanent)
    );

    harness.stop().await;
}

#[tokio::test]
async fn test_retries_exhausted_ends_failed() {
    // 永远瞬时失败，最多尝试 3 次
    let harness = Harness::start(Arc::new(FlakySender::new(Channel::Sms, u32::MAX)), 3);

    let n = harness
        .coordinator
        .submit(NewNotification::new("u1", Channel::Sms, "不会送达"))
        .unwrap();

    let done = harness.wait_terminal(&n.id).await;
    assert_eq!(done.status, NotificationStatus::Failed);
    assert_eq!(done.attempts.len(), 3);
    assert!(done.attempts.iter().all(|a| !a.is_success()));

    harness.stop().await;
}

#[tokio::test]
async fn test_in_app_delivery_then_mark_read() {
    let harness = Harness::start(Arc::new(FlakySender::new(Channel::InApp, 0)), 5);

    let n = harness
        .coordinator
        .submit(NewNotification::new("u1", Channel::InApp, "欢迎回来"))
        .unwrap();

    let done = harness.wait_terminal(&n.id).await;
    assert_eq!(done.status, NotificationStatus::Delivered);

    let read = tokio_test::assert_ok!(harness.coordinator.mark_read(&n.id));
    assert_eq!(read.status, NotificationStatus::Read);
    assert!(read.read_at.is_some());

    // 已读后出现在用户列表里且状态正确
    let list = harness.coordinator.list_for_user("u1", Some(Channel::InApp));
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].status, NotificationStatus::Read);

    harness.stop().await;
}
