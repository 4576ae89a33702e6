use std::collections::HashMap;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use scheduler_core::models::{NewTask, TaskFilter, TaskStatus, TaskType, TaskUpdate};
use serde::Deserialize;

use crate::{
    error::{ApiError, ApiResult},
    response::{accepted, created, success, success_with_message, Page},
    routes::AppState,
};

/// 任务创建请求
#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub name: String,
    pub description: Option<String>,
    pub task_type: TaskType,
    pub schedule: Option<String>,
    pub handler: String,
    /// 字符串原样保存，其他 JSON 值序列化后保存
    pub payload: Option<serde_json::Value>,
    pub timeout_seconds: Option<i32>,
    pub max_retries: Option<i32>,
    pub metadata: Option<HashMap<String, String>>,
}

impl From<CreateTaskRequest> for NewTask {
    fn from(request: CreateTaskRequest) -> Self {
        NewTask {
            name: request.name,
            description: request.description.unwrap_or_default(),
            task_type: request.task_type,
            schedule: request.schedule.unwrap_or_default(),
            handler: request.handler,
            payload: request.payload.map(payload_text).unwrap_or_default(),
            timeout_seconds: request.timeout_seconds,
            max_retries: request.max_retries,
            metadata: request.metadata.unwrap_or_default(),
        }
    }
}

/// 任务更新请求
#[derive(Debug, Deserialize)]
pub struct UpdateTaskRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub schedule: Option<String>,
    pub payload: Option<serde_json::Value>,
    pub timeout_seconds: Option<i32>,
    pub max_retries: Option<i32>,
    pub metadata: Option<HashMap<String, String>>,
}

impl From<UpdateTaskRequest> for TaskUpdate {
    fn from(request: UpdateTaskRequest) -> Self {
        TaskUpdate {
            name: request.name,
            description: request.description,
            schedule: request.schedule,
            payload: request.payload.map(payload_text),
            timeout_seconds: request.timeout_seconds,
            max_retries: request.max_retries,
            metadata: request.metadata,
        }
    }
}

/// 立即执行请求，`payload` 覆盖任务定义中的载荷
#[derive(Debug, Default, Deserialize)]
pub struct ExecuteTaskRequest {
    pub payload: Option<serde_json::Value>,
}

/// 任务查询参数
#[derive(Debug, Deserialize)]
pub struct TaskQueryParams {
    pub status: Option<String>,
    pub task_type: Option<String>,
    pub keyword: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

pub(crate) fn payload_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(text) => text,
        other => other.to_string(),
    }
}

/// 创建任务
pub async fn create_task(
    State(state): State<AppState>,
    Json(request): Json<CreateTaskRequest>,
) -> ApiResult<impl IntoResponse> {
    let task = state.service.create_task(request.into()).await?;
    Ok(created(task))
}

/// 获取任务列表
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(params): Query<TaskQueryParams>,
) -> ApiResult<impl IntoResponse> {
    let page = Page::new(params.page, params.page_size);
    let filter = TaskFilter {
        status: params
            .status
            .as_deref()
            .map(str::parse::<TaskStatus>)
            .transpose()
            .map_err(ApiError::BadRequest)?,
        task_type: params
            .task_type
            .as_deref()
            .map(str::parse::<TaskType>)
            .transpose()
            .map_err(ApiError::BadRequest)?,
        keyword: params.keyword,
        limit: Some(page.page_size),
        offset: Some(page.offset()),
    };

    let (tasks, total) = state.service.list_tasks(&filter).await?;
    Ok(success(page.wrap(tasks, total)))
}

/// 获取单个任务
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    Ok(success(state.service.get_task(id).await?))
}

/// 更新任务
pub async fn update_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<UpdateTaskRequest>,
) -> ApiResult<impl IntoResponse> {
    Ok(success(state.service.update_task(id, request.into()).await?))
}

/// 删除任务，执行历史保留
pub async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    state.service.delete_task(id).await?;
    Ok(success_with_message(id, "任务已删除"))
}

/// 立即执行任务
///
/// 请求体可以为空。
pub async fn execute_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let request: ExecuteTaskRequest = if body.iter().all(u8::is_ascii_whitespace) {
        ExecuteTaskRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?
    };

    let execution = state
        .service
        .execute_task_now(id, request.payload.map(payload_text))
        .await?;
    Ok(accepted(execution))
}

pub async fn pause_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    Ok(success(state.service.pause_task(id).await?))
}

pub async fn resume_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    Ok(success(state.service.resume_task(id).await?))
}

/// 取消任务及其活跃执行
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    Ok(success(state.service.cancel_task(id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_text_keeps_strings_verbatim() {
        assert_eq!(payload_text(json!("echo hi")), "echo hi");
        assert_eq!(payload_text(json!(null)), "");
        assert_eq!(
            payload_text(json!({"command": "echo"})),
            r#"{"command":"echo"}"#
        );
    }

    #[test]
    fn test_create_request_defaults() {
        let request: CreateTaskRequest = serde_json::from_value(json!({
            "name": "now",
            "task_type": "IMMEDIATE",
            "handler": "shell"
        }))
        .unwrap();
        let task: NewTask = request.into();

        assert_eq!(task.schedule, "");
        assert_eq!(task.payload, "");
        assert!(task.metadata.is_empty());
        assert_eq!(task.task_type, TaskType::Immediate);
    }
}
