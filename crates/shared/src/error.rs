//! 统一错误处理模块
//!
//! 定义调度引擎对外暴露的错误类型，使用 thiserror 提供良好的错误信息。
//! 投递路径上的瞬时/永久发送失败不在此处建模——它们由重试调度器在
//! 引擎内部消化，只通过通知的状态和尝试历史对外可见。

use thiserror::Error;

/// 系统错误类型
#[derive(Debug, Error)]
pub enum NotifyError {
    // ==================== 校验错误 ====================
    #[error("参数验证失败: {0}")]
    Validation(String),

    #[error("无效的参数: {field} - {message}")]
    InvalidArgument { field: String, message: String },

    // ==================== 查询错误 ====================
    #[error("记录未找到: {entity} id={id}")]
    NotFound { entity: String, id: String },

    // ==================== 状态机错误 ====================
    #[error("状态不允许该操作: id={id}, 当前状态={current}, 操作={operation}")]
    InvalidState {
        id: String,
        current: String,
        operation: String,
    },

    // ==================== 调度错误 ====================
    #[error("调度失败: {0}")]
    Dispatch(String),

    // ==================== 通用错误 ====================
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, NotifyError>;

impl NotifyError {
    /// 获取错误码
    ///
    /// 供上层 API 网关映射为 HTTP 状态码：
    /// VALIDATION_ERROR/INVALID_ARGUMENT -> 400，NOT_FOUND -> 404，
    /// INVALID_STATE -> 409/422，DISPATCH_ERROR -> 503。
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::InvalidState { .. } => "INVALID_STATE",
            Self::Dispatch(_) => "DISPATCH_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为可重试错误
    ///
    /// 校验和状态类错误重试也不会成功；调度错误由外部监督者重新提交。
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Dispatch(_) | Self::Internal(_))
    }
}
