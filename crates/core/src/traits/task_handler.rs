//! 任务处理器接口定义
//!
//! 处理器是实际完成任务工作的组件，按名称注册到 [`HandlerRegistry`](crate::HandlerRegistry)，
//! 任务通过 `handler` 字段引用处理器。
//!
//! ## 取消协作
//!
//! 每次调用都会收到一个 [`CancellationToken`]。超时或外部取消发生时令牌被触发，
//! 处理器应尽快返回；宽限期过后执行器会直接丢弃处理器的 future。
//!
//! ## 实现自定义处理器
//!
//! ```rust,ignore
//! use async_trait::async_trait;
//! use scheduler_core::traits::{HandlerContext, TaskHandler, TaskResult};
//! use scheduler_core::SchedulerResult;
//!
//! struct EchoHandler;
//!
//! #[async_trait]
//! impl TaskHandler for EchoHandler {
//!     fn name(&self) -> &str {
//!         "echo"
//!     }
//!
//!     async fn execute(&self, ctx: &HandlerContext) -> SchedulerResult<TaskResult> {
//!         Ok(TaskResult::success(ctx.payload.clone()))
//!     }
//! }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::SchedulerResult;

/// 处理器调用上下文
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub execution_id: i64,
    pub task_id: i64,
    pub task_name: String,
    /// 执行时的输入快照
    pub payload: String,
    pub retry_count: i32,
    pub worker_id: String,
    pub timeout_seconds: i32,
    /// 超时或取消时被触发
    pub cancellation: CancellationToken,
}

impl HandlerContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// 将载荷解析为 JSON，空载荷视为 `null`
    pub fn payload_json(&self) -> SchedulerResult<serde_json::Value> {
        if self.payload.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        Ok(serde_json::from_str(&self.payload)?)
    }
}

/// 处理器执行结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskResult {
    pub success: bool,
    pub output: Option<String>,
    pub error_message: Option<String>,
    pub exit_code: Option<i32>,
}

impl TaskResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            error_message: None,
            exit_code: Some(0),
        }
    }

    pub fn failure(error_message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error_message: Some(error_message.into()),
            exit_code: None,
        }
    }

    pub fn with_exit_code(mut self, exit_code: Option<i32>) -> Self {
        self.exit_code = exit_code;
        self
    }
}

/// 任务处理器核心接口
///
/// 返回 `Ok(TaskResult { success: false, .. })` 与返回 `Err` 都会把执行记录为 `Failed`，
/// 区别只在于错误信息的来源。
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// 处理器名称，即任务 `handler` 字段引用的值
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    async fn execute(&self, ctx: &HandlerContext) -> SchedulerResult<TaskResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(payload: &str) -> HandlerContext {
        HandlerContext {
            execution_id: 1,
            task_id: 1,
            task_name: "t".to_string(),
            payload: payload.to_string(),
            retry_count: 0,
            worker_id: "w-0".to_string(),
            timeout_seconds: 30,
            cancellation: CancellationToken::new(),
        }
    }

    #[test]
    fn test_empty_payload_parses_as_null() {
        assert_eq!(context("  ").payload_json().unwrap(), serde_json::Value::Null);
        assert_eq!(
            context(r#"{"command":"echo"}"#).payload_json().unwrap()["command"],
            "echo"
        );
        assert!(context("not json").payload_json().is_err());
    }
}
