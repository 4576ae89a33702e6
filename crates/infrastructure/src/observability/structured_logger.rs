//! Structured logging utilities
//!
//! Every lifecycle event of a task or execution is logged here with an
//! `event = "..."` field so log pipelines can filter on it.

use chrono::{DateTime, Utc};
use scheduler_core::models::{ExecutionStatus, Task, TaskExecution};
use tracing::{debug, error, info, warn};

/// Structured logging utilities
pub struct StructuredLogger;

impl StructuredLogger {
    pub fn log_task_created(task: &Task) {
        info!(
            event = "task_created",
            task.id = task.id,
            task.name = %task.name,
            task.task_type = %task.task_type,
            task.schedule = %task.schedule,
            task.next_run_time = ?task.next_run_time,
            "Task created"
        );
    }

    pub fn log_task_status_changed(task_id: i64, from: &str, to: &str) {
        info!(
            event = "task_status_changed",
            task.id = task_id,
            task.from = from,
            task.to = to,
            "Task status changed"
        );
    }

    pub fn log_task_dispatched(
        task: &Task,
        execution_id: i64,
        due_at: DateTime<Utc>,
        next_run_time: Option<DateTime<Utc>>,
    ) {
        info!(
            event = "task_dispatched",
            task.id = task.id,
            task.name = %task.name,
            execution.id = execution_id,
            task.due_at = %due_at,
            task.next_run_time = ?next_run_time,
            "Task dispatched for execution"
        );
    }

    pub fn log_dispatch_conflict(task_id: i64, active_execution_id: Option<i64>) {
        warn!(
            event = "dispatch_conflict",
            task.id = task_id,
            execution.active_id = ?active_execution_id,
            "Task already has an active execution, dispatch skipped"
        );
    }

    pub fn log_schedule_invalid(task_id: i64, schedule: &str, error: &str) {
        error!(
            event = "schedule_invalid",
            task.id = task_id,
            task.schedule = schedule,
            error = error,
            "Task schedule could not be evaluated, task marked failed"
        );
    }

    pub fn log_execution_started(execution: &TaskExecution, worker_id: &str) {
        info!(
            event = "execution_started",
            execution.id = execution.id,
            task.id = execution.task_id,
            task.name = %execution.task_name,
            execution.retry_count = execution.retry_count,
            worker.id = worker_id,
            "Execution started"
        );
    }

    pub fn log_execution_finished(execution: &TaskExecution) {
        let duration_ms = execution.duration_ms.unwrap_or_default();
        match execution.status {
            ExecutionStatus::Success => info!(
                event = "execution_finished",
                execution.id = execution.id,
                task.id = execution.task_id,
                execution.status = %execution.status,
                execution.duration_ms = duration_ms,
                "Execution completed successfully"
            ),
            ExecutionStatus::Cancelled => info!(
                event = "execution_cancelled",
                execution.id = execution.id,
                task.id = execution.task_id,
                execution.duration_ms = duration_ms,
                "Execution cancelled"
            ),
            _ => error!(
                event = "execution_finished",
                execution.id = execution.id,
                task.id = execution.task_id,
                execution.status = %execution.status,
                execution.duration_ms = duration_ms,
                execution.error = execution.error.as_deref().unwrap_or("Unknown error"),
                "Execution did not succeed"
            ),
        }
    }

    pub fn log_execution_retry(execution: &TaskExecution, max_retries: i32, delay_ms: u64) {
        warn!(
            event = "execution_retry",
            execution.id = execution.id,
            task.id = execution.task_id,
            execution.retry_count = execution.retry_count,
            task.max_retries = max_retries,
            retry.delay_ms = delay_ms,
            "Execution retry scheduled"
        );
    }

    pub fn log_store_unavailable(component: &str, error: &dyn std::error::Error) {
        error!(
            event = "store_unavailable",
            component = component,
            error = %error,
            "Store unavailable, in-memory dispatch state will be rebuilt"
        );
    }

    pub fn log_recovery(requeued: usize, orphaned: usize) {
        info!(
            event = "recovery_completed",
            recovery.requeued = requeued,
            recovery.orphaned = orphaned,
            "Dispatch state rebuilt from store"
        );
    }

    pub fn log_cycle(dispatched: usize, skipped: usize, failed: usize) {
        debug!(
            event = "scheduling_cycle",
            cycle.dispatched = dispatched,
            cycle.skipped = skipped,
            cycle.failed = failed,
            "Scheduling cycle finished"
        );
    }
}
