//! 调度与分发
//!
//! - [`schedule`]: 调度表达式求值
//! - [`queue`]: 分发队列
//! - [`scheduler`]: 调度循环
//! - [`recorder`]: 执行结果记录、重试与任务重新挂起
//! - [`cancellation`]: 取消协调
//! - [`recovery`]: 启动及存储中断后的分发状态重建
//! - [`controller`]: 面向传输层的任务服务

pub mod cancellation;
pub mod controller;
pub mod engine;
pub mod queue;
pub mod recorder;
pub mod recovery;
pub mod schedule;
pub mod scheduler;

pub use cancellation::{ActiveState, CancellationCoordinator};
pub use controller::{TaskService, TaskStatusSummary};
pub use engine::SchedulingEngine;
pub use queue::{DispatchQueue, DispatchTicket};
pub use recorder::{ExecutionOutcome, ExecutionRecorder, RetryPolicy, Settlement};
pub use recovery::{DispatchRecovery, RecoveryReport};
pub use scheduler::{CycleReport, LoopState, SchedulerLoop};
