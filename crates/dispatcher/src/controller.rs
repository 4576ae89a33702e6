use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use scheduler_core::models::{
    ExecutionFilter, NewTask, Task, TaskExecution, TaskFilter, TaskStatus, TaskType, TaskUpdate,
};
use scheduler_core::traits::{ExecutionRepository, TaskRepository};
use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_infrastructure::{MetricsCollector, StructuredLogger};

use crate::cancellation::CancellationCoordinator;
use crate::queue::DispatchTicket;
use crate::schedule;

/// 任务状态汇总
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize)]
pub struct TaskStatusSummary {
    pub pending: usize,
    pub running: usize,
    pub paused: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl TaskStatusSummary {
    pub fn total(&self) -> usize {
        self.pending + self.running + self.paused + self.completed + self.failed + self.cancelled
    }

    pub fn active(&self) -> usize {
        self.pending + self.running + self.paused
    }

    fn record(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Pending => self.pending += 1,
            TaskStatus::Running => self.running += 1,
            TaskStatus::Paused => self.paused += 1,
            TaskStatus::Completed => self.completed += 1,
            TaskStatus::Failed => self.failed += 1,
            TaskStatus::Cancelled => self.cancelled += 1,
        }
    }
}

/// 任务服务
///
/// 传输层（REST）调用的全部语义操作：任务的增删改查、立即执行、暂停/恢复、取消，
/// 以及执行记录的查询与取消。
pub struct TaskService {
    tasks: Arc<dyn TaskRepository>,
    executions: Arc<dyn ExecutionRepository>,
    coordinator: Arc<CancellationCoordinator>,
    metrics: MetricsCollector,
}

impl TaskService {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        executions: Arc<dyn ExecutionRepository>,
        coordinator: Arc<CancellationCoordinator>,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            tasks,
            executions,
            coordinator,
            metrics,
        }
    }

    /// 创建任务，校验调度表达式并计算首次执行时间
    pub async fn create_task(&self, request: NewTask) -> SchedulerResult<Task> {
        validate_definition(&request.name, &request.handler)?;
        let timeout_seconds = request
            .timeout_seconds
            .unwrap_or(scheduler_core::models::DEFAULT_TIMEOUT_SECONDS);
        let max_retries = request.max_retries.unwrap_or(0);
        validate_limits(timeout_seconds, max_retries)?;

        let now = Utc::now();
        let next_run_time = initial_run_time(request.task_type, &request.schedule)?;

        let mut task = Task::new(
            request.name,
            request.task_type,
            request.schedule,
            request.handler,
        );
        task.description = request.description;
        task.payload = request.payload;
        task.timeout_seconds = timeout_seconds;
        task.max_retries = max_retries;
        task.metadata = request.metadata;
        task.next_run_time = next_run_time;
        task.created_at = now;
        task.updated_at = now;

        let created = self.tasks.create(&task).await?;
        StructuredLogger::log_task_created(&created);
        Ok(created)
    }

    pub async fn get_task(&self, id: i64) -> SchedulerResult<Task> {
        self.tasks
            .get_by_id(id)
            .await?
            .ok_or(SchedulerError::TaskNotFound { id })
    }

    /// 更新任务定义，调度表达式变化时重新计算下次执行时间
    ///
    /// 只写入定义字段，状态与计数器保持存储中的当前值；新的下次执行时间
    /// 仅在任务处于 `Pending` 或 `Paused` 时写入，执行中的任务由调度路径推进。
    pub async fn update_task(&self, id: i64, update: TaskUpdate) -> SchedulerResult<Task> {
        let mut task = self.get_task(id).await?;

        if let Some(name) = update.name {
            validate_definition(&name, &task.handler)?;
            task.name = name;
        }
        if let Some(description) = update.description {
            task.description = description;
        }
        if let Some(payload) = update.payload {
            task.payload = payload;
        }
        if let Some(metadata) = update.metadata {
            task.metadata = metadata;
        }
        let timeout_seconds = update.timeout_seconds.unwrap_or(task.timeout_seconds);
        let max_retries = update.max_retries.unwrap_or(task.max_retries);
        validate_limits(timeout_seconds, max_retries)?;
        task.timeout_seconds = timeout_seconds;
        task.max_retries = max_retries;

        let rescheduled = match update.schedule {
            Some(schedule) => {
                let next_run_time = initial_run_time(task.task_type, &schedule)?;
                task.schedule = schedule;
                Some(next_run_time)
            }
            None => None,
        };

        self.tasks.update_definition(&task).await?;
        if let Some(next_run_time) = rescheduled {
            let written = self
                .tasks
                .compare_and_set_next_run_time(
                    id,
                    &[TaskStatus::Pending, TaskStatus::Paused],
                    next_run_time,
                )
                .await?;
            if !written {
                debug!("任务 {} 不处于待执行或暂停状态，保留原有下次执行时间", id);
            }
        }
        debug!("{} 已更新", task.entity_description());
        self.get_task(id).await
    }

    /// 删除任务，先取消其活跃执行；执行历史保留
    pub async fn delete_task(&self, id: i64) -> SchedulerResult<()> {
        let task = self.get_task(id).await?;
        self.coordinator.cancel_task(id).await?;
        self.tasks.delete(id).await?;
        info!("{} 已删除", task.entity_description());
        Ok(())
    }

    pub async fn list_tasks(&self, filter: &TaskFilter) -> SchedulerResult<(Vec<Task>, i64)> {
        self.tasks.list(filter).await
    }

    pub async fn task_summary(&self) -> SchedulerResult<TaskStatusSummary> {
        let (tasks, _) = self.tasks.list(&TaskFilter::default()).await?;
        let mut summary = TaskStatusSummary::default();
        for task in &tasks {
            summary.record(task.status);
        }
        Ok(summary)
    }

    /// 立即执行一次，不影响任务的下次计划执行时间
    ///
    /// 任务已有活跃执行时返回 [`SchedulerError::ConcurrentDispatchConflict`]。
    pub async fn execute_task_now(
        &self,
        id: i64,
        payload_override: Option<String>,
    ) -> SchedulerResult<TaskExecution> {
        let task = self.get_task(id).await?;
        if task.status == TaskStatus::Cancelled {
            return Err(SchedulerError::invalid_transition(
                task.status,
                TaskStatus::Running,
            ));
        }

        let now = Utc::now();
        let payload = payload_override.unwrap_or_else(|| task.payload.clone());
        let execution = TaskExecution::queued(&task, now).with_payload(payload);

        let created = self
            .executions
            .create_if_no_active(&execution)
            .await?
            .ok_or_else(|| {
                self.metrics.record_dispatch_conflict();
                SchedulerError::ConcurrentDispatchConflict { task_id: id }
            })?;

        // 先切换状态再入队，保证执行结束时任务已处于 Running
        if task.status == TaskStatus::Pending {
            self.tasks
                .compare_and_set_status(id, TaskStatus::Pending, TaskStatus::Running)
                .await?;
        }

        self.coordinator
            .admit(DispatchTicket::new(id, created.id, now));
        self.metrics.record_task_dispatched();
        StructuredLogger::log_task_dispatched(&task, created.id, now, task.next_run_time);
        Ok(created)
    }

    pub async fn pause_task(&self, id: i64) -> SchedulerResult<Task> {
        self.transition_task(id, TaskStatus::Pending, TaskStatus::Paused)
            .await
    }

    /// 恢复暂停的任务，保留原有的下次执行时间
    pub async fn resume_task(&self, id: i64) -> SchedulerResult<Task> {
        self.transition_task(id, TaskStatus::Paused, TaskStatus::Pending)
            .await
    }

    /// 取消任务：任务置为 `Cancelled` 后取消其活跃执行，重复取消返回当前状态
    pub async fn cancel_task(&self, id: i64) -> SchedulerResult<Task> {
        loop {
            let task = self.get_task(id).await?;
            if task.status == TaskStatus::Cancelled {
                self.coordinator.cancel_task(id).await?;
                return Ok(task);
            }
            if self
                .tasks
                .compare_and_set_status(id, task.status, TaskStatus::Cancelled)
                .await?
            {
                StructuredLogger::log_task_status_changed(
                    id,
                    task.status.as_str(),
                    TaskStatus::Cancelled.as_str(),
                );
                self.coordinator.cancel_task(id).await?;
                return self.get_task(id).await;
            }
            debug!("任务 {} 状态在取消过程中发生变化，重试", id);
        }
    }

    pub async fn get_execution(&self, id: i64) -> SchedulerResult<TaskExecution> {
        self.executions
            .get_by_id(id)
            .await?
            .ok_or(SchedulerError::ExecutionNotFound { id })
    }

    pub async fn list_executions(
        &self,
        filter: &ExecutionFilter,
    ) -> SchedulerResult<(Vec<TaskExecution>, i64)> {
        if let Some(task_id) = filter.task_id {
            self.get_task(task_id).await?;
        }
        self.executions.list(filter).await
    }

    /// 取消执行，已处于终态时原样返回
    pub async fn cancel_execution(&self, id: i64) -> SchedulerResult<TaskExecution> {
        self.coordinator.cancel(id).await
    }

    async fn transition_task(
        &self,
        id: i64,
        from: TaskStatus,
        to: TaskStatus,
    ) -> SchedulerResult<Task> {
        let task = self.get_task(id).await?;
        if task.status != from
            || !self
                .tasks
                .compare_and_set_status(id, from, to)
                .await?
        {
            let current = self.get_task(id).await?;
            return Err(SchedulerError::invalid_transition(current.status, to));
        }
        StructuredLogger::log_task_status_changed(id, from.as_str(), to.as_str());
        self.get_task(id).await
    }
}

fn validate_definition(name: &str, handler: &str) -> SchedulerResult<()> {
    if name.trim().is_empty() {
        return Err(SchedulerError::InvalidTaskParams(
            "任务名称不能为空".to_string(),
        ));
    }
    if handler.trim().is_empty() {
        return Err(SchedulerError::InvalidTaskParams(
            "处理器名称不能为空".to_string(),
        ));
    }
    Ok(())
}

fn validate_limits(timeout_seconds: i32, max_retries: i32) -> SchedulerResult<()> {
    if timeout_seconds <= 0 {
        return Err(SchedulerError::InvalidTaskParams(format!(
            "超时时间必须大于0: {timeout_seconds}"
        )));
    }
    if max_retries < 0 {
        return Err(SchedulerError::InvalidTaskParams(format!(
            "最大重试次数不能为负数: {max_retries}"
        )));
    }
    Ok(())
}

/// 校验调度表达式并计算首次执行时间，指定时间已过去时拒绝
fn initial_run_time(
    task_type: TaskType,
    expr: &str,
) -> SchedulerResult<Option<chrono::DateTime<Utc>>> {
    schedule::validate_schedule(task_type, expr)?;
    let now = Utc::now();
    if task_type == TaskType::ScheduledAt && schedule::parse_scheduled_at(expr)? < now {
        return Err(SchedulerError::invalid_schedule(expr, "指定的执行时间已过去"));
    }
    schedule::next_run(task_type, expr, now, None)
}
