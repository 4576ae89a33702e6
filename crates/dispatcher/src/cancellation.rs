//! 取消协调
//!
//! 维护活跃执行的内存登记表（排队中 / 执行中），并把取消请求传递给排队中的票据
//! 或执行中的处理器。登记表只是存储状态的镜像，最终以执行记录上的比较并交换为准。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use scheduler_core::models::{ExecutionStatus, TaskExecution};
use scheduler_core::traits::ExecutionRepository;
use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_infrastructure::MetricsCollector;

use crate::queue::{DispatchQueue, DispatchTicket};
use crate::recorder::ExecutionRecorder;

const CANCEL_REASON: &str = "执行已被取消";

enum ActiveExecution {
    Queued {
        task_id: i64,
    },
    Executing {
        task_id: i64,
        worker_id: String,
        token: CancellationToken,
        done: watch::Sender<bool>,
    },
}

/// 活跃执行快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActiveState {
    Queued { task_id: i64 },
    Executing { task_id: i64, worker_id: String },
}

/// 取消协调器
pub struct CancellationCoordinator {
    registry: Mutex<HashMap<i64, ActiveExecution>>,
    queue: Arc<DispatchQueue>,
    executions: Arc<dyn ExecutionRepository>,
    recorder: Arc<ExecutionRecorder>,
    metrics: MetricsCollector,
    grace_period: Duration,
}

impl CancellationCoordinator {
    pub fn new(
        queue: Arc<DispatchQueue>,
        executions: Arc<dyn ExecutionRepository>,
        recorder: Arc<ExecutionRecorder>,
        metrics: MetricsCollector,
        grace_period: Duration,
    ) -> Self {
        Self {
            registry: Mutex::new(HashMap::new()),
            queue,
            executions,
            recorder,
            metrics,
            grace_period,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<i64, ActiveExecution>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn queue(&self) -> &Arc<DispatchQueue> {
        &self.queue
    }

    /// 登记排队中的执行
    pub fn register_queued(&self, execution_id: i64, task_id: i64) {
        self.lock()
            .entry(execution_id)
            .or_insert(ActiveExecution::Queued { task_id });
    }

    /// 先登记再入队，保证执行器领取时登记表中已有记录
    pub fn admit(&self, ticket: DispatchTicket) -> bool {
        self.register_queued(ticket.execution_id, ticket.task_id);
        let admitted = self
            .queue
            .enqueue(ticket.task_id, ticket.execution_id, ticket.due_at);
        if !admitted {
            debug!("任务 {} 已在分发队列中", ticket.task_id);
        }
        self.metrics.update_queue_depth(self.queue.len());
        admitted
    }

    /// 执行器领取执行，返回其取消令牌；同一执行已被领取时返回 `None`
    pub fn claim(
        &self,
        execution_id: i64,
        task_id: i64,
        worker_id: &str,
    ) -> Option<CancellationToken> {
        let mut registry = self.lock();
        if matches!(
            registry.get(&execution_id),
            Some(ActiveExecution::Executing { .. })
        ) {
            warn!("执行 {} 已被其他执行器领取", execution_id);
            return None;
        }

        let token = CancellationToken::new();
        let (done, _) = watch::channel(false);
        registry.insert(
            execution_id,
            ActiveExecution::Executing {
                task_id,
                worker_id: worker_id.to_string(),
                token: token.clone(),
                done,
            },
        );
        Some(token)
    }

    /// 执行器写入终态后释放登记，唤醒等待中的取消请求
    pub fn release(&self, execution_id: i64) {
        if let Some(ActiveExecution::Executing { done, .. }) = self.lock().remove(&execution_id) {
            done.send_replace(true);
        }
    }

    pub fn active_state(&self, execution_id: i64) -> Option<ActiveState> {
        self.lock().get(&execution_id).map(|active| match active {
            ActiveExecution::Queued { task_id } => ActiveState::Queued { task_id: *task_id },
            ActiveExecution::Executing {
                task_id, worker_id, ..
            } => ActiveState::Executing {
                task_id: *task_id,
                worker_id: worker_id.clone(),
            },
        })
    }

    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    /// 清空分发队列和所有排队中的登记，执行中的登记保留
    pub fn reset_queued(&self) {
        self.queue.clear();
        self.lock()
            .retain(|_, active| matches!(active, ActiveExecution::Executing { .. }));
        self.metrics.update_queue_depth(0);
    }

    /// 取消执行
    ///
    /// 已处于终态的执行原样返回，重复取消不会报错。
    pub async fn cancel(&self, execution_id: i64) -> SchedulerResult<TaskExecution> {
        let execution = self
            .executions
            .get_by_id(execution_id)
            .await?
            .ok_or(SchedulerError::ExecutionNotFound { id: execution_id })?;

        match execution.status {
            ExecutionStatus::Queued => self.cancel_queued(execution).await,
            ExecutionStatus::Executing => self.cancel_executing(execution).await,
            _ => {
                debug!("执行 {} 已处于终态 {}", execution_id, execution.status);
                Ok(execution)
            }
        }
    }

    /// 取消任务当前的活跃执行
    pub async fn cancel_task(&self, task_id: i64) -> SchedulerResult<Option<TaskExecution>> {
        match self.executions.find_active_by_task(task_id).await? {
            Some(execution) => Ok(Some(self.cancel(execution.id).await?)),
            None => Ok(None),
        }
    }

    async fn cancel_queued(&self, execution: TaskExecution) -> SchedulerResult<TaskExecution> {
        let retracted = self
            .queue
            .remove_execution(execution.task_id, execution.id)
            .is_some();
        {
            let mut registry = self.lock();
            if matches!(
                registry.get(&execution.id),
                Some(ActiveExecution::Queued { .. })
            ) {
                registry.remove(&execution.id);
            }
        }
        self.metrics.update_queue_depth(self.queue.len());

        let settlement = self.recorder.cancel_queued(&execution, CANCEL_REASON).await?;
        if settlement.applied {
            info!(
                execution_id = execution.id,
                task_id = execution.task_id,
                retracted,
                "排队中的执行已取消"
            );
            return Ok(settlement.execution);
        }

        // 执行器抢先完成了领取
        match settlement.execution.status {
            ExecutionStatus::Executing => self.cancel_executing(settlement.execution).await,
            _ => Ok(settlement.execution),
        }
    }

    async fn cancel_executing(&self, execution: TaskExecution) -> SchedulerResult<TaskExecution> {
        let done = {
            let registry = self.lock();
            match registry.get(&execution.id) {
                Some(ActiveExecution::Executing { token, done, .. }) => {
                    token.cancel();
                    Some(done.subscribe())
                }
                _ => None,
            }
        };

        if let Some(mut done) = done {
            let acknowledged =
                tokio::time::timeout(self.grace_period, done.wait_for(|finished| *finished)).await;
            if acknowledged.is_err() {
                warn!(
                    "执行 {} 在 {:?} 宽限期内未响应取消",
                    execution.id, self.grace_period
                );
            }
        }

        let current = self
            .executions
            .get_by_id(execution.id)
            .await?
            .ok_or(SchedulerError::ExecutionNotFound { id: execution.id })?;
        if current.is_terminal() {
            return Ok(current);
        }

        let settlement = self.recorder.force_cancel(&current, CANCEL_REASON).await?;
        self.release(execution.id);
        Ok(settlement.execution)
    }
}
