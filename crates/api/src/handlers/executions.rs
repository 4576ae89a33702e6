use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
};
use scheduler_core::models::{ExecutionFilter, ExecutionStatus};
use serde::Deserialize;

use crate::{
    error::{ApiError, ApiResult},
    response::{success, Page},
    routes::AppState,
};

/// 执行记录查询参数
#[derive(Debug, Deserialize)]
pub struct ExecutionQueryParams {
    pub task_id: Option<i64>,
    pub status: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

impl ExecutionQueryParams {
    fn into_filter(self, page: &Page) -> ApiResult<ExecutionFilter> {
        let status = self
            .status
            .as_deref()
            .map(str::parse::<ExecutionStatus>)
            .transpose()
            .map_err(ApiError::BadRequest)?;

        Ok(ExecutionFilter {
            task_id: self.task_id,
            status,
            limit: Some(page.page_size),
            offset: Some(page.offset()),
        })
    }
}

/// 查询执行记录
pub async fn list_executions(
    State(state): State<AppState>,
    Query(params): Query<ExecutionQueryParams>,
) -> ApiResult<impl IntoResponse> {
    let page = Page::new(params.page, params.page_size);
    let filter = params.into_filter(&page)?;
    let (executions, total) = state.service.list_executions(&filter).await?;
    Ok(success(page.wrap(executions, total)))
}

/// 查询任务的执行历史
pub async fn list_task_executions(
    State(state): State<AppState>,
    Path(task_id): Path<i64>,
    Query(mut params): Query<ExecutionQueryParams>,
) -> ApiResult<impl IntoResponse> {
    params.task_id = Some(task_id);
    let page = Page::new(params.page, params.page_size);
    let filter = params.into_filter(&page)?;
    let (executions, total) = state.service.list_executions(&filter).await?;
    Ok(success(page.wrap(executions, total)))
}

pub async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    Ok(success(state.service.get_execution(id).await?))
}

/// 取消执行，对已结束的执行返回其当前状态
pub async fn cancel_execution(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    Ok(success(state.service.cancel_execution(id).await?))
}
