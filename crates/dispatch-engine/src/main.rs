//! 通知调度服务
//!
//! 进程入口：加载配置、初始化可观测性、恢复中断的投递、
//! 启动按渠道的投递工作者池，收到关闭信号后优雅退出。

use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tokio::sync::watch;
use tracing::info;

use notify_shared::clock::SystemClock;
use notify_shared::config::AppConfig;
use notify_shared::observability;

use notify_dispatch::coordinator::DispatchCoordinator;
use notify_dispatch::queue::DispatchQueues;
use notify_dispatch::sender::{ChannelSender, EmailSender, InAppSender, SmsSender};
use notify_dispatch::store::NotificationStore;
use notify_dispatch::worker::{DeliveryWorkerPool, DispatchContext};
use notify_shared::retry::RetryPolicy;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 统一加载配置：config/default.toml + 环境覆盖 + NOTIFY_ 环境变量
    let config = AppConfig::load("notify-dispatch").unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {e}");
        AppConfig::default()
    });

    // 2. 初始化日志与指标
    observability::init(&config.observability)?;
    observability::describe_metrics();

    info!("Starting notify-dispatch...");
    info!(environment = %config.environment, "Configuration loaded");

    // 3. 核心组件：存储、按渠道队列、发送器、重试调度器
    let store = Arc::new(NotificationStore::new());
    let queues = Arc::new(DispatchQueues::new(config.dispatch.queue_capacity));
    let clock = Arc::new(SystemClock);

    let senders: Vec<Arc<dyn ChannelSender>> = vec![
        Arc::new(EmailSender),
        Arc::new(SmsSender),
        Arc::new(InAppSender),
    ];

    let policy: RetryPolicy = config.retry.to_policy();
    let ctx = Arc::new(DispatchContext::new(
        store.clone(),
        queues.clone(),
        senders,
        notify_dispatch::scheduler::RetryScheduler::new(policy),
        clock.clone(),
        config.dispatch.send_timeout(),
    ));
    info!("Core components initialized");

    // 4. 启动恢复：把上次进程退出时滞留的记录重新入队
    let coordinator = DispatchCoordinator::new(store, queues, clock);
    let recovered = coordinator.recover()?;
    info!(recovered, "Startup recovery complete");

    // 5. 启动投递工作者池
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let pool = DeliveryWorkerPool::spawn(ctx, &config.dispatch, shutdown_rx);

    // 6. 等待关闭信号，优雅退出：停止认领新条目，等进行中的发送完成
    shutdown_signal().await;
    shutdown_tx.send(true)?;
    pool.join().await;

    info!("Service shutdown complete");
    Ok(())
}

/// 优雅关闭信号处理
///
/// 监听 Ctrl+C 和 SIGTERM 信号
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
