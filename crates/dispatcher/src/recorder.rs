//! 执行结果记录
//!
//! 执行器池和取消协调器共用同一个记录器，执行记录的每一次状态写入都是
//! `(id, 期望状态)` 上的比较并交换，两条路径同时收尾时只有一方的终态生效。
//!
//! 终态写入之后的计数与任务收尾可以重复执行：计数按执行 ID 去重，
//! 任务状态同样通过比较并交换推进。写入终态后存储中断时，
//! 以相同终态再次调用即可补齐剩余步骤。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use scheduler_core::config::WorkerConfig;
use scheduler_core::models::{ExecutionStatus, Task, TaskExecution, TaskStatus};
use scheduler_core::traits::{ExecutionRepository, TaskRepository};
use scheduler_core::SchedulerResult;
use scheduler_infrastructure::{MetricsCollector, StructuredLogger};

use crate::queue::DispatchTicket;

/// 重试退避策略
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 基础重试间隔
    pub base_interval: Duration,
    /// 最大重试间隔
    pub max_interval: Duration,
    /// 指数退避倍数
    pub backoff_multiplier: f64,
    /// 重试间隔的随机抖动范围（0.0-1.0）
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(300),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            base_interval: Duration::from_secs(config.retry_backoff_seconds),
            max_interval: Duration::from_secs(config.max_retry_backoff_seconds),
            ..Self::default()
        }
    }

    /// 第 `retry_count` 次失败后的等待时间
    pub fn backoff(&self, retry_count: i32) -> Duration {
        let base = self.base_interval.as_secs_f64();
        let max = self.max_interval.as_secs_f64().max(base);

        let exponential = base * self.backoff_multiplier.powi(retry_count.max(0));
        let capped = exponential.min(max);

        // 添加随机抖动以避免雷群效应
        let jitter = capped * self.jitter_factor * (rand::random::<f64>() - 0.5) * 2.0;
        let delay = (capped + jitter).max(base);

        Duration::try_from_secs_f64(delay).unwrap_or(self.max_interval)
    }
}

/// 一次执行的结果
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub duration: Option<Duration>,
    /// 失败时是否允许按任务的 `max_retries` 重试
    pub retryable: bool,
}

impl ExecutionOutcome {
    pub fn success(result: Option<String>) -> Self {
        Self {
            status: ExecutionStatus::Success,
            result,
            error: None,
            duration: None,
            retryable: false,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Failed,
            result: None,
            error: Some(error.into()),
            duration: None,
            retryable: true,
        }
    }

    pub fn timed_out(error: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::TimedOut,
            result: None,
            error: Some(error.into()),
            duration: None,
            retryable: true,
        }
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Cancelled,
            result: None,
            error: Some(reason.into()),
            duration: None,
            retryable: false,
        }
    }

    pub fn with_result(mut self, result: Option<String>) -> Self {
        self.result = result;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn not_retryable(mut self) -> Self {
        self.retryable = false;
        self
    }
}

/// 收尾结果
#[derive(Debug, Clone)]
pub struct Settlement {
    /// 写入后的执行记录；`applied` 为 `false` 时是存储中的当前记录
    pub execution: TaskExecution,
    /// 本次写入是否生效
    pub applied: bool,
    /// 需要重新分发的重试执行
    pub retry: Option<DispatchTicket>,
}

/// 执行结果记录器
pub struct ExecutionRecorder {
    tasks: Arc<dyn TaskRepository>,
    executions: Arc<dyn ExecutionRepository>,
    retry_policy: RetryPolicy,
    metrics: MetricsCollector,
}

impl ExecutionRecorder {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        executions: Arc<dyn ExecutionRepository>,
        retry_policy: RetryPolicy,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            tasks,
            executions,
            retry_policy,
            metrics,
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// `Queued → Executing`，交换失败返回 `None`
    pub async fn start(
        &self,
        execution: &TaskExecution,
        worker_id: &str,
        at: DateTime<Utc>,
    ) -> SchedulerResult<Option<TaskExecution>> {
        let mut started = execution.clone();
        started.start(worker_id, at);

        if self
            .executions
            .transition(&started, &[ExecutionStatus::Queued])
            .await?
        {
            self.metrics.execution_started();
            StructuredLogger::log_execution_started(&started, worker_id);
            Ok(Some(started))
        } else {
            debug!("执行 {} 已不处于排队状态，放弃领取", execution.id);
            Ok(None)
        }
    }

    /// 将执行中的记录写入终态，并据此更新任务计数、安排重试或重新挂起任务
    pub async fn finish(
        &self,
        execution: &TaskExecution,
        outcome: ExecutionOutcome,
    ) -> SchedulerResult<Settlement> {
        let end_time = match (execution.start_time, outcome.duration) {
            (Some(start), Some(elapsed)) => chrono::Duration::from_std(elapsed)
                .map(|elapsed| start + elapsed)
                .unwrap_or_else(|_| Utc::now()),
            _ => Utc::now(),
        };
        let duration_ms = outcome
            .duration
            .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX));

        let mut finished = execution.clone();
        finished.finish(
            outcome.status,
            end_time,
            duration_ms,
            outcome.result.clone(),
            outcome.error.clone(),
        );

        self.apply(finished, &[ExecutionStatus::Executing], outcome.retryable, true)
            .await
    }

    /// 上一个进程遗留在执行中的记录，`Executing → Failed`，失败计数照常递增
    pub async fn fail_orphaned(
        &self,
        execution: &TaskExecution,
        error: impl Into<String>,
    ) -> SchedulerResult<Settlement> {
        let mut failed = execution.clone();
        failed.finish(
            ExecutionStatus::Failed,
            Utc::now(),
            None,
            None,
            Some(error.into()),
        );
        self.apply(failed, &[ExecutionStatus::Executing], true, false)
            .await
    }

    /// 处理器开始前即失败（例如任务已被删除），`Queued → Failed`
    pub async fn fail_before_start(
        &self,
        execution: &TaskExecution,
        error: impl Into<String>,
    ) -> SchedulerResult<Settlement> {
        let mut failed = execution.clone();
        failed.finish(
            ExecutionStatus::Failed,
            Utc::now(),
            None,
            None,
            Some(error.into()),
        );
        self.apply(failed, &[ExecutionStatus::Queued], false, false)
            .await
    }

    /// 取消尚未被领取的执行，`Queued → Cancelled`
    pub async fn cancel_queued(
        &self,
        execution: &TaskExecution,
        reason: &str,
    ) -> SchedulerResult<Settlement> {
        let mut cancelled = execution.clone();
        cancelled.finish(
            ExecutionStatus::Cancelled,
            Utc::now(),
            None,
            None,
            Some(reason.to_string()),
        );
        self.apply(cancelled, &[ExecutionStatus::Queued], false, false)
            .await
    }

    /// 宽限期后仍未结束的执行强制取消，`Executing → Cancelled`
    pub async fn force_cancel(
        &self,
        execution: &TaskExecution,
        reason: &str,
    ) -> SchedulerResult<Settlement> {
        let mut cancelled = execution.clone();
        cancelled.finish(
            ExecutionStatus::Cancelled,
            Utc::now(),
            None,
            None,
            Some(reason.to_string()),
        );
        self.apply(cancelled, &[ExecutionStatus::Executing], false, true)
            .await
    }

    /// 补齐已处于终态的执行的计数与任务收尾
    ///
    /// 用于终态已写入但后续步骤未完成的执行（例如进程在收尾中途退出），不会安排重试。
    pub async fn resume_settlement(
        &self,
        execution: &TaskExecution,
    ) -> SchedulerResult<Option<DispatchTicket>> {
        if !execution.status.is_terminal() {
            return Ok(None);
        }
        self.complete(execution, false).await
    }

    async fn apply(
        &self,
        execution: TaskExecution,
        from: &[ExecutionStatus],
        retryable: bool,
        was_running: bool,
    ) -> SchedulerResult<Settlement> {
        if !self.executions.transition(&execution, from).await? {
            let Some(current) = self.executions.get_by_id(execution.id).await? else {
                return Ok(Settlement {
                    execution,
                    applied: false,
                    retry: None,
                });
            };

            // 相同终态说明写入已生效（可能是本路径上一次调用），继续完成收尾
            let retry = if current.status == execution.status && current.status.is_terminal() {
                debug!("执行 {} 已是 {}，补齐计数与任务收尾", current.id, current.status);
                self.complete(&current, retryable).await?
            } else {
                debug!(
                    "执行 {} 状态已被其他路径更新为 {}，本次写入放弃",
                    current.id, current.status
                );
                None
            };
            return Ok(Settlement {
                execution: current,
                applied: false,
                retry,
            });
        }

        if was_running {
            self.metrics.execution_stopped();
        }
        let duration_seconds = execution.duration_ms.unwrap_or_default() as f64 / 1000.0;
        self.metrics
            .record_execution_finished(execution.status, duration_seconds);
        StructuredLogger::log_execution_finished(&execution);

        let retry = self.complete(&execution, retryable).await?;
        Ok(Settlement {
            execution,
            applied: true,
            retry,
        })
    }

    /// 终态写入之后的步骤，重复执行不会重复计数
    async fn complete(
        &self,
        execution: &TaskExecution,
        retryable: bool,
    ) -> SchedulerResult<Option<DispatchTicket>> {
        match execution.status {
            ExecutionStatus::Success => {
                self.increment_counter(execution, true).await?;
            }
            ExecutionStatus::Failed | ExecutionStatus::TimedOut
                if execution.start_time.is_some() =>
            {
                self.increment_counter(execution, false).await?;
            }
            _ => {}
        }

        self.settle_task(execution, retryable).await
    }

    async fn increment_counter(
        &self,
        execution: &TaskExecution,
        success: bool,
    ) -> SchedulerResult<()> {
        match self
            .tasks
            .increment_execution_count(execution.task_id, execution.id, success)
            .await
        {
            Ok(true) => Ok(()),
            Ok(false) => {
                debug!("执行 {} 已计数，跳过", execution.id);
                Ok(())
            }
            Err(scheduler_core::SchedulerError::TaskNotFound { .. }) => {
                debug!("任务 {} 已被删除，跳过计数更新", execution.task_id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// 决定任务的后续状态：重试、重新挂起、完成或失败
    async fn settle_task(
        &self,
        execution: &TaskExecution,
        retryable: bool,
    ) -> SchedulerResult<Option<DispatchTicket>> {
        let Some(task) = self.tasks.get_by_id(execution.task_id).await? else {
            return Ok(None);
        };
        if task.status != TaskStatus::Running {
            return Ok(None);
        }
        // 任务已有新的活跃执行（重试或立即执行），由它负责收尾
        if self.executions.find_active_by_task(task.id).await?.is_some() {
            return Ok(None);
        }

        let failed = matches!(
            execution.status,
            ExecutionStatus::Failed | ExecutionStatus::TimedOut
        );
        if failed && retryable && task.allows_retry(execution.retry_count) {
            return self.schedule_retry(&task, execution).await;
        }

        let target = match (task.next_run_time, execution.status) {
            (Some(_), _) => TaskStatus::Pending,
            (None, ExecutionStatus::Success) => TaskStatus::Completed,
            (None, ExecutionStatus::Cancelled) => TaskStatus::Cancelled,
            (None, _) => TaskStatus::Failed,
        };
        if self
            .tasks
            .compare_and_set_status(task.id, TaskStatus::Running, target)
            .await?
        {
            StructuredLogger::log_task_status_changed(
                task.id,
                TaskStatus::Running.as_str(),
                target.as_str(),
            );
        }
        Ok(None)
    }

    async fn schedule_retry(
        &self,
        task: &Task,
        execution: &TaskExecution,
    ) -> SchedulerResult<Option<DispatchTicket>> {
        let delay = self.retry_policy.backoff(execution.retry_count);
        let due_at = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(60));

        let retry = TaskExecution::queued(task, due_at)
            .with_payload(execution.payload.clone())
            .with_retry_count(execution.retry_count + 1);

        match self.executions.create_if_no_active(&retry).await? {
            Some(created) => {
                self.metrics.record_retry();
                StructuredLogger::log_execution_retry(
                    &created,
                    task.max_retries,
                    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                );
                Ok(Some(DispatchTicket::new(task.id, created.id, due_at)))
            }
            None => {
                warn!("任务 {} 已有活跃执行，放弃重试", task.id);
                Ok(None)
            }
        }
    }
}
