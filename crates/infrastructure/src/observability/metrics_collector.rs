//! Metrics collector for the scheduling engine
//!
//! Thin wrapper over the `metrics` facade. Without an installed recorder every
//! call is a no-op; the binary installs the Prometheus exporter when enabled.

use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};
use scheduler_core::models::ExecutionStatus;

/// Metrics collector for the scheduling engine
#[derive(Clone)]
pub struct MetricsCollector {
    tasks_dispatched_total: Counter,
    dispatch_conflicts_total: Counter,
    schedule_errors_total: Counter,
    execution_retries_total: Counter,
    execution_duration: Histogram,
    scheduling_cycle_duration: Histogram,
    queue_depth: Gauge,
    running_executions: Gauge,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            tasks_dispatched_total: counter!("scheduler_tasks_dispatched_total"),
            dispatch_conflicts_total: counter!("scheduler_dispatch_conflicts_total"),
            schedule_errors_total: counter!("scheduler_schedule_errors_total"),
            execution_retries_total: counter!("scheduler_execution_retries_total"),
            execution_duration: histogram!("scheduler_execution_duration_seconds"),
            scheduling_cycle_duration: histogram!("scheduler_cycle_duration_seconds"),
            queue_depth: gauge!("scheduler_queue_depth"),
            running_executions: gauge!("scheduler_running_executions"),
        }
    }

    pub fn record_task_dispatched(&self) {
        self.tasks_dispatched_total.increment(1);
    }

    pub fn record_dispatch_conflict(&self) {
        self.dispatch_conflicts_total.increment(1);
    }

    pub fn record_schedule_error(&self) {
        self.schedule_errors_total.increment(1);
    }

    pub fn record_retry(&self) {
        self.execution_retries_total.increment(1);
    }

    /// Record an execution reaching a terminal status
    pub fn record_execution_finished(&self, status: ExecutionStatus, duration_seconds: f64) {
        counter!("scheduler_executions_total", "status" => status.as_str()).increment(1);
        self.execution_duration.record(duration_seconds);
    }

    pub fn record_cycle_duration(&self, duration_seconds: f64) {
        self.scheduling_cycle_duration.record(duration_seconds);
    }

    pub fn update_queue_depth(&self, depth: usize) {
        self.queue_depth.set(depth as f64);
    }

    pub fn execution_started(&self) {
        self.running_executions.increment(1.0);
    }

    pub fn execution_stopped(&self) {
        self.running_executions.decrement(1.0);
    }
}
