use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use scheduler_core::SchedulerError;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("调度器错误: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("未找到资源")]
    NotFound,

    #[error("请求超时")]
    Timeout,

    #[error("内部服务器错误: {0}")]
    Internal(String),
}

impl ApiError {
    /// HTTP 状态码、错误类型与返回给调用方的消息
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::Scheduler(err) => match err {
                SchedulerError::InvalidSchedule { .. } => {
                    (StatusCode::BAD_REQUEST, "INVALID_SCHEDULE", err.to_string())
                }
                SchedulerError::InvalidTaskParams(_) => {
                    (StatusCode::BAD_REQUEST, "INVALID_TASK_PARAMS", err.to_string())
                }
                SchedulerError::Serialization(_) => {
                    (StatusCode::BAD_REQUEST, "SERIALIZATION_ERROR", err.to_string())
                }
                SchedulerError::TaskNotFound { .. } => {
                    (StatusCode::NOT_FOUND, "TASK_NOT_FOUND", err.to_string())
                }
                SchedulerError::ExecutionNotFound { .. } => {
                    (StatusCode::NOT_FOUND, "EXECUTION_NOT_FOUND", err.to_string())
                }
                SchedulerError::ConcurrentDispatchConflict { .. } => {
                    (StatusCode::CONFLICT, "DISPATCH_CONFLICT", err.to_string())
                }
                SchedulerError::InvalidStatusTransition { .. } => {
                    (StatusCode::CONFLICT, "INVALID_STATUS_TRANSITION", err.to_string())
                }
                SchedulerError::StoreUnavailable(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "STORE_UNAVAILABLE",
                    "存储暂时不可用，请稍后重试".to_string(),
                ),
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "系统内部错误".to_string(),
                ),
            },
            ApiError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", format!("请求参数错误: {msg}"))
            }
            ApiError::NotFound => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                "请求的资源不存在".to_string(),
            ),
            ApiError::Timeout => (
                StatusCode::REQUEST_TIMEOUT,
                "REQUEST_TIMEOUT",
                "请求处理超时".to_string(),
            ),
            ApiError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "系统内部错误".to_string(),
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = self.parts();

        if status.is_server_error() {
            tracing::error!("请求处理失败: {}", self);
        } else {
            tracing::debug!("请求被拒绝: {}", self);
        }

        let body = Json(json!({
            "success": false,
            "data": null,
            "message": message,
            "error": {
                "type": error_type,
                "code": status.as_u16(),
            },
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
