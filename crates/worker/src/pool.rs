//! 执行器池
//!
//! 固定数量的执行器从分发队列领取票据，在任务的超时预算内调用处理器，
//! 再通过结果记录器写入终态。同一票据只会被一个执行器取出，
//! 执行记录上的比较并交换保证同一执行最多被启动一次。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use scheduler_core::config::WorkerConfig;
use scheduler_core::models::{ExecutionStatus, Task, TaskExecution};
use scheduler_core::traits::{
    ExecutionRepository, HandlerContext, TaskHandler, TaskRepository, TaskResult,
};
use scheduler_core::{HandlerRegistry, SchedulerError, SchedulerResult};
use scheduler_dispatcher::{
    CancellationCoordinator, DispatchQueue, DispatchTicket, ExecutionOutcome, ExecutionRecorder,
    SchedulingEngine, Settlement,
};
use scheduler_infrastructure::MetricsCollector;

const FINISH_ATTEMPTS: u32 = 3;

/// 执行器池
pub struct ExecutorPool {
    worker_id: String,
    size: usize,
    registry: HandlerRegistry,
    tasks: Arc<dyn TaskRepository>,
    executions: Arc<dyn ExecutionRepository>,
    queue: Arc<DispatchQueue>,
    recorder: Arc<ExecutionRecorder>,
    coordinator: Arc<CancellationCoordinator>,
    metrics: MetricsCollector,
    grace_period: Duration,
    store_retry_interval: Duration,
}

impl ExecutorPool {
    pub fn new(engine: &SchedulingEngine, registry: HandlerRegistry, config: &WorkerConfig) -> Self {
        Self {
            worker_id: config.worker_id.clone(),
            size: config.max_concurrent_tasks.max(1),
            registry,
            tasks: engine.tasks.clone(),
            executions: engine.executions.clone(),
            queue: engine.queue.clone(),
            recorder: engine.recorder.clone(),
            coordinator: engine.coordinator.clone(),
            metrics: engine.metrics.clone(),
            grace_period: Duration::from_secs(config.cancel_grace_seconds),
            store_retry_interval: Duration::from_secs(1),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// 启动全部执行器，直到收到关闭信号
    ///
    /// 关闭信号只打断等待中的执行器，正在执行的处理器会跑完并写入终态。
    pub async fn run(self: Arc<Self>, shutdown_rx: broadcast::Receiver<()>) {
        info!(
            "执行器池启动: worker_id={}, size={}",
            self.worker_id, self.size
        );

        let handles: Vec<JoinHandle<()>> = (0..self.size)
            .map(|n| {
                let pool = Arc::clone(&self);
                let worker_name = format!("{}-{}", self.worker_id, n);
                let shutdown_rx = shutdown_rx.resubscribe();
                tokio::spawn(async move { pool.worker_loop(worker_name, shutdown_rx).await })
            })
            .collect();

        for handle in handles {
            if let Err(e) = handle.await {
                error!("执行器异常退出: {}", e);
            }
        }

        info!("执行器池已停止: worker_id={}", self.worker_id);
    }

    async fn worker_loop(&self, worker_name: String, mut shutdown_rx: broadcast::Receiver<()>) {
        debug!("执行器 {} 开始领取任务", worker_name);
        loop {
            let ticket = tokio::select! {
                _ = shutdown_rx.recv() => break,
                ticket = self.queue.dequeue() => ticket,
            };

            if let Err(e) = self.process(ticket, &worker_name).await {
                if e.is_store_unavailable() {
                    warn!(
                        "执行器 {} 处理执行 {} 时存储不可用: {}",
                        worker_name, ticket.execution_id, e
                    );
                } else {
                    error!(
                        "执行器 {} 处理执行 {} 失败: {}",
                        worker_name, ticket.execution_id, e
                    );
                }
            }
        }
        debug!("执行器 {} 已退出", worker_name);
    }

    /// 处理一张票据
    ///
    /// 票据已被取消、被其他执行器领取或执行记录已不处于排队状态时返回 `Ok(None)`。
    pub async fn process(
        &self,
        ticket: DispatchTicket,
        worker_name: &str,
    ) -> SchedulerResult<Option<Settlement>> {
        let Some(token) =
            self.coordinator
                .claim(ticket.execution_id, ticket.task_id, worker_name)
        else {
            return Ok(None);
        };
        self.metrics.update_queue_depth(self.queue.len());

        let result = self.execute_claimed(&ticket, worker_name, token).await;
        self.coordinator.release(ticket.execution_id);

        let settlement = result?;
        if let Some(retry) = settlement.as_ref().and_then(|s| s.retry) {
            self.coordinator.admit(retry);
        }
        Ok(settlement)
    }

    async fn execute_claimed(
        &self,
        ticket: &DispatchTicket,
        worker_name: &str,
        token: CancellationToken,
    ) -> SchedulerResult<Option<Settlement>> {
        let Some(execution) = self.executions.get_by_id(ticket.execution_id).await? else {
            warn!("执行记录 {} 不存在，丢弃票据", ticket.execution_id);
            return Ok(None);
        };
        if execution.status != ExecutionStatus::Queued {
            debug!(
                "执行 {} 当前状态为 {}，跳过",
                execution.id, execution.status
            );
            return Ok(None);
        }

        let Some(task) = self.tasks.get_by_id(execution.task_id).await? else {
            let error = SchedulerError::TaskNotFound {
                id: execution.task_id,
            };
            return self
                .recorder
                .fail_before_start(&execution, error.to_string())
                .await
                .map(Some);
        };

        let Some(started) = self
            .recorder
            .start(&execution, worker_name, Utc::now())
            .await?
        else {
            return Ok(None);
        };

        let outcome = match self.registry.get(&task.handler).await {
            Some(handler) => self.invoke(handler, &task, &started, worker_name, token).await,
            None => {
                warn!(
                    "任务 {} 引用的处理器 '{}' 未注册",
                    task.id, task.handler
                );
                ExecutionOutcome::failed(
                    SchedulerError::HandlerNotFound(task.handler.clone()).to_string(),
                )
                .not_retryable()
                .with_duration(Duration::ZERO)
            }
        };

        self.finish(&started, outcome).await.map(Some)
    }

    /// 在超时预算内调用处理器
    ///
    /// 超时或外部取消时先触发处理器的令牌，宽限期内仍未返回则中止处理器。
    /// 记录的耗时截止到超时或取消发生的时刻。
    async fn invoke(
        &self,
        handler: Arc<dyn TaskHandler>,
        task: &Task,
        execution: &TaskExecution,
        worker_name: &str,
        token: CancellationToken,
    ) -> ExecutionOutcome {
        let handler_token = token.child_token();
        let ctx = HandlerContext {
            execution_id: execution.id,
            task_id: task.id,
            task_name: task.name.clone(),
            payload: execution.payload.clone(),
            retry_count: execution.retry_count,
            worker_id: worker_name.to_string(),
            timeout_seconds: task.timeout_seconds,
            cancellation: handler_token.clone(),
        };

        let timeout = task.timeout();
        let started = Instant::now();
        let mut join = tokio::spawn(async move { handler.execute(&ctx).await });

        tokio::select! {
            biased;

            joined = &mut join => {
                Self::completed(joined).with_duration(started.elapsed())
            }
            _ = tokio::time::sleep(timeout) => {
                let elapsed = started.elapsed();
                handler_token.cancel();
                self.drain(join, execution.id).await;
                warn!(
                    "执行 {} 超时: timeout={}s",
                    execution.id,
                    timeout.as_secs()
                );
                let error = SchedulerError::HandlerTimeout {
                    timeout_seconds: task.timeout_seconds,
                };
                ExecutionOutcome::timed_out(error.to_string()).with_duration(elapsed)
            }
            _ = token.cancelled() => {
                let elapsed = started.elapsed();
                self.drain(join, execution.id).await;
                info!("执行 {} 已响应取消", execution.id);
                ExecutionOutcome::cancelled("执行已被取消").with_duration(elapsed)
            }
        }
    }

    /// 等待处理器在宽限期内退出，否则中止
    async fn drain(&self, mut join: JoinHandle<SchedulerResult<TaskResult>>, execution_id: i64) {
        if tokio::time::timeout(self.grace_period, &mut join).await.is_err() {
            warn!(
                "执行 {} 的处理器未在 {:?} 内退出，强制中止",
                execution_id, self.grace_period
            );
            join.abort();
        }
    }

    fn completed(joined: Result<SchedulerResult<TaskResult>, JoinError>) -> ExecutionOutcome {
        match joined {
            Ok(Ok(result)) if result.success => ExecutionOutcome::success(result.output),
            Ok(Ok(result)) => {
                let error = result
                    .error_message
                    .unwrap_or_else(|| format!("处理器返回失败，退出码: {:?}", result.exit_code));
                ExecutionOutcome::failed(error).with_result(result.output)
            }
            Ok(Err(e)) => ExecutionOutcome::failed(e.to_string()),
            Err(e) => ExecutionOutcome::failed(
                SchedulerError::HandlerFailure(format!("处理器异常退出: {e}")).to_string(),
            ),
        }
    }

    /// 写入终态，存储暂时不可用时有限次重试
    async fn finish(
        &self,
        execution: &TaskExecution,
        outcome: ExecutionOutcome,
    ) -> SchedulerResult<Settlement> {
        let mut attempt = 1;
        loop {
            match self.recorder.finish(execution, outcome.clone()).await {
                Err(e) if e.is_store_unavailable() && attempt < FINISH_ATTEMPTS => {
                    warn!(
                        "写入执行 {} 的终态失败（第 {} 次）: {}",
                        execution.id, attempt, e
                    );
                    attempt += 1;
                    tokio::time::sleep(self.store_retry_interval).await;
                }
                result => return result,
            }
        }
    }
}
