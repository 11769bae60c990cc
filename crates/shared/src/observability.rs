//! 统一可观测性模块
//!
//! 提供日志（tracing）初始化和指标名称的集中定义。
//! 指标通过 metrics facade 记录，由部署环境决定安装何种 recorder；
//! 引擎内部只负责以一致的名称和标签打点。

use anyhow::Result;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::ObservabilityConfig;

/// 初始化 tracing 日志
///
/// 日志级别优先取 RUST_LOG 环境变量，其次取配置中的 log_level。
/// log_format 为 "json" 时输出结构化日志，否则输出人类可读格式。
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = if config.json_logs() {
        fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .boxed()
    } else {
        fmt::layer().with_target(true).with_ansi(true).boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}

/// 集中管理指标名称，防止字符串散落在各模块中导致拼写不一致
pub mod metric_names {
    pub const SUBMITTED_TOTAL: &str = "notifications_submitted_total";
    pub const DELIVERED_TOTAL: &str = "notifications_delivered_total";
    pub const FAILED_TOTAL: &str = "notifications_failed_total";
    pub const RETRIES_TOTAL: &str = "notification_retries_total";
    pub const SEND_DURATION_SECONDS: &str = "notification_send_duration_seconds";
}

/// 注册引擎指标的描述信息
///
/// 描述会出现在 recorder 导出的 HELP 注释中，应在启动时调用一次。
pub fn describe_metrics() {
    metrics::describe_counter!(
        metric_names::SUBMITTED_TOTAL,
        "Total number of accepted notification submissions"
    );
    metrics::describe_counter!(
        metric_names::DELIVERED_TOTAL,
        "Total number of notifications delivered"
    );
    metrics::describe_counter!(
        metric_names::FAILED_TOTAL,
        "Total number of notifications terminally failed"
    );
    metrics::describe_counter!(
        metric_names::RETRIES_TOTAL,
        "Total number of delivery attempts scheduled for retry"
    );
    metrics::describe_histogram!(
        metric_names::SEND_DURATION_SECONDS,
        "Channel send attempt duration in seconds"
    );
}
