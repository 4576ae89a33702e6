use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use scheduler_core::models::{Task, TaskExecution, TaskStatus};
use scheduler_core::traits::{ExecutionRepository, TaskRepository};
use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_infrastructure::{MetricsCollector, StructuredLogger};

use crate::cancellation::CancellationCoordinator;
use crate::queue::DispatchTicket;
use crate::recovery::DispatchRecovery;
use crate::schedule;

/// 调度循环状态，每个周期依次经过 `Idle → Scanning → Dispatching → Idle`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Scanning,
    Dispatching,
}

/// 单个调度周期的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub scanned: usize,
    pub dispatched: usize,
    pub skipped: usize,
    pub failed: usize,
    /// 存储不可用导致本周期提前结束
    pub aborted: bool,
}

enum DispatchOutcome {
    Dispatched,
    Skipped,
    InvalidSchedule,
}

/// 调度循环
///
/// 周期性扫描到期任务，为每个任务创建排队中的执行记录并放入分发队列，
/// 同时推进任务的下次执行时间。
pub struct SchedulerLoop {
    tasks: Arc<dyn TaskRepository>,
    executions: Arc<dyn ExecutionRepository>,
    coordinator: Arc<CancellationCoordinator>,
    recovery: Arc<DispatchRecovery>,
    metrics: MetricsCollector,
    interval: Duration,
    state: watch::Sender<LoopState>,
    needs_rebuild: AtomicBool,
}

impl SchedulerLoop {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        executions: Arc<dyn ExecutionRepository>,
        coordinator: Arc<CancellationCoordinator>,
        recovery: Arc<DispatchRecovery>,
        metrics: MetricsCollector,
        interval: Duration,
    ) -> Self {
        let (state, _) = watch::channel(LoopState::Idle);
        Self {
            tasks,
            executions,
            coordinator,
            recovery,
            metrics,
            interval,
            state,
            needs_rebuild: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<LoopState> {
        self.state.subscribe()
    }

    /// 内存队列是否等待按存储状态重建
    pub fn needs_rebuild(&self) -> bool {
        self.needs_rebuild.load(Ordering::Acquire)
    }

    /// 运行调度循环直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("调度循环启动，扫描间隔: {:?}", self.interval);
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_cycle().await;
                }
                _ = shutdown_rx.recv() => {
                    info!("调度循环收到关闭信号");
                    break;
                }
            }
        }
    }

    pub async fn run_cycle(&self) -> CycleReport {
        self.run_cycle_at(Utc::now()).await
    }

    /// 以 `now` 为当前时间执行一个调度周期
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> CycleReport {
        let start = Instant::now();
        let mut report = CycleReport::default();

        if self.needs_rebuild() {
            match self.recovery.rebuild_queue().await {
                Ok(_) => self.needs_rebuild.store(false, Ordering::Release),
                Err(e) => {
                    self.on_store_error(&e);
                    report.aborted = true;
                    return report;
                }
            }
        }

        self.state.send_replace(LoopState::Scanning);
        let due_tasks = match self.tasks.get_due_tasks(now).await {
            Ok(tasks) => tasks,
            Err(e) => {
                self.on_store_error(&e);
                self.state.send_replace(LoopState::Idle);
                report.aborted = true;
                return report;
            }
        };
        report.scanned = due_tasks.len();

        self.state.send_replace(LoopState::Dispatching);
        for task in &due_tasks {
            match self.dispatch_task(task, now).await {
                Ok(DispatchOutcome::Dispatched) => report.dispatched += 1,
                Ok(DispatchOutcome::Skipped) => report.skipped += 1,
                Ok(DispatchOutcome::InvalidSchedule) => report.failed += 1,
                Err(e) if e.is_store_unavailable() => {
                    self.on_store_error(&e);
                    report.aborted = true;
                    break;
                }
                Err(e) => {
                    error!("分发{}失败: {}", task.entity_description(), e);
                    report.failed += 1;
                }
            }
        }
        self.state.send_replace(LoopState::Idle);

        self.metrics
            .record_cycle_duration(start.elapsed().as_secs_f64());
        StructuredLogger::log_cycle(report.dispatched, report.skipped, report.failed);
        report
    }

    fn on_store_error(&self, error: &SchedulerError) {
        if error.is_store_unavailable() {
            self.needs_rebuild.store(true, Ordering::Release);
            StructuredLogger::log_store_unavailable("scheduler_loop", error);
        } else {
            error!("调度周期失败: {}", error);
        }
    }

    async fn dispatch_task(
        &self,
        task: &Task,
        now: DateTime<Utc>,
    ) -> SchedulerResult<DispatchOutcome> {
        let due_at = task.next_run_time.unwrap_or(now);

        let next_run_time =
            match schedule::next_run(task.task_type, &task.schedule, now, Some(due_at)) {
                Ok(next) => next,
                Err(e) => {
                    if self
                        .tasks
                        .compare_and_set_status(task.id, TaskStatus::Pending, TaskStatus::Failed)
                        .await?
                    {
                        self.tasks
                            .compare_and_set_next_run_time(task.id, &[TaskStatus::Failed], None)
                            .await?;
                    }
                    StructuredLogger::log_schedule_invalid(task.id, &task.schedule, &e.to_string());
                    self.metrics.record_schedule_error();
                    return Ok(DispatchOutcome::InvalidSchedule);
                }
            };

        if !self
            .tasks
            .compare_and_set_status(task.id, TaskStatus::Pending, TaskStatus::Running)
            .await?
        {
            debug!("{} 状态已变化，跳过本次分发", task.entity_description());
            return Ok(DispatchOutcome::Skipped);
        }

        // 先推进下次执行时间再创建执行，任一步失败都恢复原值，同一到期时刻不会分发两次
        if let Err(e) = self
            .tasks
            .compare_and_set_next_run_time(task.id, &[TaskStatus::Running], next_run_time)
            .await
        {
            self.rollback(task).await;
            return Err(e);
        }

        let execution = TaskExecution::queued(task, due_at);
        let created = match self.executions.create_if_no_active(&execution).await {
            Ok(Some(created)) => created,
            Ok(None) => {
                let active = self.executions.find_active_by_task(task.id).await?;
                StructuredLogger::log_dispatch_conflict(task.id, active.map(|e| e.id));
                self.metrics.record_dispatch_conflict();
                self.rollback(task).await;
                return Ok(DispatchOutcome::Skipped);
            }
            Err(e) => {
                self.rollback(task).await;
                return Err(e);
            }
        };

        self.coordinator
            .admit(DispatchTicket::new(task.id, created.id, due_at));
        self.metrics.record_task_dispatched();
        StructuredLogger::log_task_dispatched(task, created.id, due_at, next_run_time);

        Ok(DispatchOutcome::Dispatched)
    }

    /// 分发中途失败时尽力恢复下次执行时间与任务状态
    async fn rollback(&self, task: &Task) {
        let restored = match self.restore_next_run_time(task).await {
            Ok(()) => self.revert_to_pending(task.id).await,
            Err(e) => Err(e),
        };
        if let Err(e) = restored {
            warn!("回滚任务 {} 的分发失败: {}", task.id, e);
        }
    }

    async fn restore_next_run_time(&self, task: &Task) -> SchedulerResult<()> {
        self.tasks
            .compare_and_set_next_run_time(task.id, &[TaskStatus::Running], task.next_run_time)
            .await?;
        Ok(())
    }

    async fn revert_to_pending(&self, task_id: i64) -> SchedulerResult<()> {
        self.tasks
            .compare_and_set_status(task_id, TaskStatus::Running, TaskStatus::Pending)
            .await?;
        Ok(())
    }
}
