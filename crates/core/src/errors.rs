use thiserror::Error;

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("无效的调度表达式: {expr} - {message}")]
    InvalidSchedule { expr: String, message: String },

    #[error("任务执行超时 ({timeout_seconds}s)")]
    HandlerTimeout { timeout_seconds: i32 },

    #[error("任务处理器执行失败: {0}")]
    HandlerFailure(String),

    #[error("未注册的任务处理器: {0}")]
    HandlerNotFound(String),

    #[error("任务 {task_id} 已有执行中的实例，跳过重复分发")]
    ConcurrentDispatchConflict { task_id: i64 },

    #[error("存储不可用: {0}")]
    StoreUnavailable(String),

    #[error("数据库错误: {0}")]
    Database(String),

    #[error("任务未找到: {id}")]
    TaskNotFound { id: i64 },

    #[error("执行记录未找到: {id}")]
    ExecutionNotFound { id: i64 },

    #[error("非法的状态流转: {from} -> {to}")]
    InvalidStatusTransition { from: String, to: String },

    #[error("无效的任务参数: {0}")]
    InvalidTaskParams(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl SchedulerError {
    pub fn invalid_schedule(expr: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidSchedule {
            expr: expr.into(),
            message: message.into(),
        }
    }

    pub fn invalid_transition(from: impl std::fmt::Debug, to: impl std::fmt::Debug) -> Self {
        Self::InvalidStatusTransition {
            from: format!("{from:?}"),
            to: format!("{to:?}"),
        }
    }

    /// 存储层不可达时，调度循环需要中止本轮并在恢复后重建内存队列
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

impl From<sqlx::Error> for SchedulerError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                SchedulerError::StoreUnavailable(err.to_string())
            }
            other => SchedulerError::Database(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlx_pool_errors_map_to_store_unavailable() {
        let err: SchedulerError = sqlx::Error::PoolTimedOut.into();
        assert!(err.is_store_unavailable());

        let err: SchedulerError = sqlx::Error::RowNotFound.into();
        assert!(!err.is_store_unavailable());
        assert!(matches!(err, SchedulerError::Database(_)));
    }

    #[test]
    fn test_invalid_schedule_message_is_descriptive() {
        let err = SchedulerError::invalid_schedule("* * *", "expected 5 or 6 fields");
        let message = err.to_string();
        assert!(message.contains("* * *"));
        assert!(message.contains("expected 5 or 6 fields"));
    }
}
