//! 分发状态恢复
//!
//! 分发队列和取消登记表只存在于内存中，进程启动或存储中断恢复后需要根据存储状态重建。

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use scheduler_core::models::{ExecutionFilter, ExecutionStatus, TaskFilter, TaskStatus};
use scheduler_core::traits::{ExecutionRepository, TaskRepository};
use scheduler_core::SchedulerResult;
use scheduler_infrastructure::StructuredLogger;

use crate::cancellation::CancellationCoordinator;
use crate::queue::DispatchTicket;
use crate::recorder::ExecutionRecorder;

const ORPHANED_ERROR: &str = "执行节点在执行过程中退出";

/// 恢复报告
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    /// 重新放回分发队列的排队中执行
    pub requeued: usize,
    /// 标记为失败的遗留执行中记录
    pub orphaned: usize,
    /// 没有活跃执行却停留在 `Running` 的任务
    pub released_tasks: usize,
    pub recovery_duration_ms: u64,
}

/// 分发状态恢复服务
pub struct DispatchRecovery {
    tasks: Arc<dyn TaskRepository>,
    executions: Arc<dyn ExecutionRepository>,
    coordinator: Arc<CancellationCoordinator>,
    recorder: Arc<ExecutionRecorder>,
}

impl DispatchRecovery {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        executions: Arc<dyn ExecutionRepository>,
        coordinator: Arc<CancellationCoordinator>,
        recorder: Arc<ExecutionRecorder>,
    ) -> Self {
        Self {
            tasks,
            executions,
            coordinator,
            recorder,
        }
    }

    /// 系统启动时恢复
    ///
    /// 1. 上一个进程遗留的执行中记录标记为失败（按任务配置重试）
    /// 2. 没有活跃执行的 `Running` 任务按最近一次执行补齐收尾，没有执行记录时释放回 `Pending`
    /// 3. 重建分发队列
    pub async fn recover_on_startup(&self) -> SchedulerResult<RecoveryReport> {
        let start = Instant::now();
        info!("开始恢复分发状态");

        let mut report = RecoveryReport::default();

        for execution in self
            .executions
            .get_by_status(ExecutionStatus::Executing)
            .await?
        {
            let settlement = self.recorder.fail_orphaned(&execution, ORPHANED_ERROR).await?;
            if settlement.applied {
                warn!(
                    "执行 {} (任务 {}) 在上次运行中未完成，已标记为失败",
                    execution.id, execution.task_id
                );
                report.orphaned += 1;
            }
        }

        report.released_tasks = self.release_stuck_tasks().await?;
        report.requeued = self.rebuild_queue().await?;
        report.recovery_duration_ms = start.elapsed().as_millis() as u64;

        StructuredLogger::log_recovery(report.requeued, report.orphaned);
        Ok(report)
    }

    /// 清空内存队列，并把存储中所有排队中的执行重新入队
    pub async fn rebuild_queue(&self) -> SchedulerResult<usize> {
        let queued = self
            .executions
            .get_by_status(ExecutionStatus::Queued)
            .await?;

        self.coordinator.reset_queued();
        let mut requeued = 0;
        for execution in queued {
            let ticket =
                DispatchTicket::new(execution.task_id, execution.id, execution.scheduled_at);
            if self.coordinator.admit(ticket) {
                requeued += 1;
            }
        }

        info!("分发队列已重建，重新入队 {} 个执行", requeued);
        Ok(requeued)
    }

    async fn release_stuck_tasks(&self) -> SchedulerResult<usize> {
        let filter = TaskFilter {
            status: Some(TaskStatus::Running),
            ..Default::default()
        };
        let (running, _) = self.tasks.list(&filter).await?;

        let mut released = 0;
        for task in running {
            if self.executions.find_active_by_task(task.id).await?.is_some() {
                continue;
            }

            // 终态已写入但收尾中断的执行：补齐计数并按其结果推进任务状态
            let latest = self
                .executions
                .list(&ExecutionFilter {
                    limit: Some(1),
                    ..ExecutionFilter::for_task(task.id)
                })
                .await?
                .0
                .into_iter()
                .next();
            if let Some(execution) = latest {
                self.recorder.resume_settlement(&execution).await?;
                let settled = self
                    .tasks
                    .get_by_id(task.id)
                    .await?
                    .is_some_and(|current| current.status != TaskStatus::Running);
                if settled {
                    warn!(
                        "{} 的执行 {} 收尾未完成，已补齐",
                        task.entity_description(),
                        execution.id
                    );
                    released += 1;
                    continue;
                }
            }

            let target = if task.next_run_time.is_some() {
                TaskStatus::Pending
            } else {
                TaskStatus::Failed
            };
            if self
                .tasks
                .compare_and_set_status(task.id, TaskStatus::Running, target)
                .await?
            {
                warn!("{} 没有活跃执行，状态恢复为 {}", task.entity_description(), target);
                released += 1;
            }
        }
        Ok(released)
    }
}
