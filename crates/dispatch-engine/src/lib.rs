//! 通知调度引擎
//!
//! 多渠道通知的调度与重试：接收提交、按渠道排队、
//! 工作者池并发投递、失败按指数退避重试直至终态。
//!
//! 核心组件：
//! - `coordinator`: 对外入口（提交/查询/已读/启动恢复）
//! - `store`: 通知记录的唯一持有者，条件状态更新
//! - `queue`: 按渠道的延迟队列，FIFO + not_before
//! - `scheduler`: 重试决策（指数退避 + 抖动）
//! - `worker`: 按渠道的投递工作者池
//! - `sender`: 渠道发送器抽象与内置实现

pub mod api;
pub mod coordinator;
pub mod queue;
pub mod scheduler;
pub mod sender;
pub mod store;
pub mod types;
pub mod worker;

pub use coordinator::DispatchCoordinator;
pub use queue::{DispatchQueue, DispatchQueues};
pub use scheduler::{RetryDecision, RetryScheduler};
pub use sender::ChannelSender;
pub use store::NotificationStore;
pub use types::{Channel, NewNotification, Notification, NotificationStatus};
pub use worker::{DeliveryWorkerPool, DispatchContext};
