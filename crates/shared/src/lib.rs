//! 共享库
//!
//! 包含调度引擎各组件共用的配置、错误处理、重试策略、时钟抽象
//! 和可观测性初始化等基础设施代码。

pub mod clock;
pub mod config;
pub mod error;
pub mod observability;
pub mod retry;
