use std::sync::Arc;
use std::time::Duration;

use axum::{
    error_handling::HandleErrorLayer,
    middleware,
    routing::{get, post},
    Router,
};
use scheduler_dispatcher::{
    CancellationCoordinator, DispatchQueue, SchedulerLoop, SchedulingEngine, TaskService,
};

use crate::handlers::{
    executions::{cancel_execution, get_execution, list_executions, list_task_executions},
    health::health_check,
    tasks::{
        cancel_task, create_task, delete_task, execute_task, get_task, list_tasks, pause_task,
        resume_task, update_task,
    },
};
use tower::ServiceBuilder;

use crate::middleware::{cors_layer, handle_middleware_error, request_logging, trace_layer};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<TaskService>,
    pub queue: Arc<DispatchQueue>,
    pub coordinator: Arc<CancellationCoordinator>,
    pub scheduler: Arc<SchedulerLoop>,
}

impl AppState {
    pub fn from_engine(engine: &SchedulingEngine) -> Self {
        Self {
            service: engine.service.clone(),
            queue: engine.queue.clone(),
            coordinator: engine.coordinator.clone(),
            scheduler: engine.scheduler.clone(),
        }
    }
}

/// 创建API路由
pub fn create_routes(state: AppState, request_timeout_after: Duration) -> Router {
    Router::new()
        // 健康检查
        .route("/health", get(health_check))
        // 任务管理
        .route("/api/tasks", get(list_tasks).post(create_task))
        .route(
            "/api/tasks/{id}",
            get(get_task).put(update_task).delete(delete_task),
        )
        .route("/api/tasks/{id}/execute", post(execute_task))
        .route("/api/tasks/{id}/pause", post(pause_task))
        .route("/api/tasks/{id}/resume", post(resume_task))
        .route("/api/tasks/{id}/cancel", post(cancel_task))
        .route("/api/tasks/{id}/executions", get(list_task_executions))
        // 执行记录
        .route("/api/executions", get(list_executions))
        .route("/api/executions/{id}", get(get_execution))
        .route("/api/executions/{id}/cancel", post(cancel_execution))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_middleware_error))
                .timeout(request_timeout_after),
        )
        .layer(middleware::from_fn(request_logging))
        .layer(trace_layer())
        .layer(cors_layer())
        .with_state(state)
}
