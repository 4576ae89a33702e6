use std::sync::Arc;
use std::time::Duration;

use scheduler_core::config::{DispatcherConfig, WorkerConfig};
use scheduler_core::traits::{ExecutionRepository, TaskRepository};
use scheduler_infrastructure::MetricsCollector;

use crate::cancellation::CancellationCoordinator;
use crate::controller::TaskService;
use crate::queue::DispatchQueue;
use crate::recorder::{ExecutionRecorder, RetryPolicy};
use crate::recovery::DispatchRecovery;
use crate::scheduler::SchedulerLoop;

/// 调度引擎组件
///
/// 在同一组仓储之上装配分发队列、结果记录器、取消协调器、恢复服务、调度循环和任务服务，
/// 执行器池与 API 层从这里取得共享的组件。
#[derive(Clone)]
pub struct SchedulingEngine {
    pub tasks: Arc<dyn TaskRepository>,
    pub executions: Arc<dyn ExecutionRepository>,
    pub queue: Arc<DispatchQueue>,
    pub recorder: Arc<ExecutionRecorder>,
    pub coordinator: Arc<CancellationCoordinator>,
    pub recovery: Arc<DispatchRecovery>,
    pub scheduler: Arc<SchedulerLoop>,
    pub service: Arc<TaskService>,
    pub metrics: MetricsCollector,
}

impl SchedulingEngine {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        executions: Arc<dyn ExecutionRepository>,
        dispatcher_config: &DispatcherConfig,
        worker_config: &WorkerConfig,
        metrics: MetricsCollector,
    ) -> Self {
        Self::with_retry_policy(
            tasks,
            executions,
            dispatcher_config,
            worker_config,
            RetryPolicy::from_config(worker_config),
            metrics,
        )
    }

    pub fn with_retry_policy(
        tasks: Arc<dyn TaskRepository>,
        executions: Arc<dyn ExecutionRepository>,
        dispatcher_config: &DispatcherConfig,
        worker_config: &WorkerConfig,
        retry_policy: RetryPolicy,
        metrics: MetricsCollector,
    ) -> Self {
        let queue = Arc::new(DispatchQueue::new());
        let recorder = Arc::new(ExecutionRecorder::new(
            tasks.clone(),
            executions.clone(),
            retry_policy,
            metrics.clone(),
        ));
        let coordinator = Arc::new(CancellationCoordinator::new(
            queue.clone(),
            executions.clone(),
            recorder.clone(),
            metrics.clone(),
            Duration::from_secs(worker_config.cancel_grace_seconds),
        ));
        let recovery = Arc::new(DispatchRecovery::new(
            tasks.clone(),
            executions.clone(),
            coordinator.clone(),
            recorder.clone(),
        ));
        let scheduler = Arc::new(SchedulerLoop::new(
            tasks.clone(),
            executions.clone(),
            coordinator.clone(),
            recovery.clone(),
            metrics.clone(),
            Duration::from_secs(dispatcher_config.schedule_interval_seconds),
        ));
        let service = Arc::new(TaskService::new(
            tasks.clone(),
            executions.clone(),
            coordinator.clone(),
            metrics.clone(),
        ));

        Self {
            tasks,
            executions,
            queue,
            recorder,
            coordinator,
            recovery,
            scheduler,
            service,
            metrics,
        }
    }
}
