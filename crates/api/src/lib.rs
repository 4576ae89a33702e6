//! # Scheduler API
//!
//! 任务调度引擎的 REST 接口，基于 Axum 构建，只做请求解析与错误映射，
//! 业务语义全部委托给 [`TaskService`](scheduler_dispatcher::TaskService)。
//!
//! ## API 端点
//!
//! ### 任务管理
//! - `GET /api/tasks` - 获取任务列表（`status`、`task_type`、`keyword`、`page`、`page_size`）
//! - `POST /api/tasks` - 创建新任务
//! - `GET /api/tasks/{id}` - 获取任务详情
//! - `PUT /api/tasks/{id}` - 更新任务
//! - `DELETE /api/tasks/{id}` - 删除任务
//! - `POST /api/tasks/{id}/execute` - 立即执行
//! - `POST /api/tasks/{id}/pause` - 暂停任务
//! - `POST /api/tasks/{id}/resume` - 恢复任务
//! - `POST /api/tasks/{id}/cancel` - 取消任务
//! - `GET /api/tasks/{id}/executions` - 任务的执行历史
//!
//! ### 执行记录
//! - `GET /api/executions` - 查询执行记录
//! - `GET /api/executions/{id}` - 获取执行详情
//! - `POST /api/executions/{id}/cancel` - 取消执行
//!
//! ### 系统
//! - `GET /health` - 健康检查
//!
//! ## 响应格式
//!
//! 成功与失败都使用同一个信封：
//!
//! ```json
//! { "success": true, "data": { ... }, "message": null, "timestamp": "2024-01-01T00:00:00Z" }
//! ```
//!
//! 错误状态码：参数或调度表达式无效 400，资源不存在 404，
//! 分发冲突或非法状态流转 409，存储不可用 503。

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

use std::time::Duration;

use anyhow::Context;
use axum::Router;
use scheduler_core::config::ApiConfig;
use tokio::sync::broadcast;
use tracing::info;

pub use error::{ApiError, ApiResult};
pub use response::{ApiResponse, PaginatedResponse};
pub use routes::{create_routes, AppState};

/// 按配置创建应用
pub fn create_app(state: AppState, config: &ApiConfig) -> Router {
    create_routes(state, Duration::from_secs(config.request_timeout_seconds))
}

/// 启动 HTTP 服务，收到关闭信号后停止接收新连接
pub async fn serve(
    state: AppState,
    config: &ApiConfig,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("无法绑定API地址 {}", config.bind_address))?;
    info!("API服务监听于 {}", config.bind_address);

    axum::serve(listener, create_app(state, config))
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("API服务收到关闭信号");
        })
        .await
        .context("API服务异常退出")?;

    Ok(())
}
