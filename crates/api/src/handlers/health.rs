use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::routes::AppState;

/// 健康检查
///
/// 存储不可达时返回 503。
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let queue_depth = state.queue.len();
    let active_executions = state.coordinator.active_count();
    let scheduler_state = format!("{:?}", state.scheduler.state());

    match state.service.task_summary().await {
        Ok(summary) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "service": "task-scheduler",
                "version": env!("CARGO_PKG_VERSION"),
                "scheduler": {
                    "state": scheduler_state,
                    "needs_rebuild": state.scheduler.needs_rebuild(),
                    "queue_depth": queue_depth,
                    "active_executions": active_executions,
                },
                "tasks": summary,
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "unavailable",
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "service": "task-scheduler",
                "version": env!("CARGO_PKG_VERSION"),
                "error": e.to_string(),
            })),
        ),
    }
}
