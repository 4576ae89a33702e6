use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Task;

/// 任务执行记录
///
/// 每次分发产生一条记录，创建时为 `Queued`，由执行器推进到终态，终态后不可变。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskExecution {
    pub id: i64,
    pub task_id: i64,
    pub task_name: String,
    pub status: ExecutionStatus,
    /// 执行该记录的工作节点标识
    pub node_id: Option<String>,
    /// 本次分发对应的到期时间
    pub scheduled_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub retry_count: i32,
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

impl TaskExecution {
    /// 为任务创建一条排队中的执行记录
    pub fn queued(task: &Task, scheduled_at: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            task_id: task.id,
            task_name: task.name.clone(),
            status: ExecutionStatus::Queued,
            node_id: None,
            scheduled_at,
            start_time: None,
            end_time: None,
            duration_ms: None,
            result: None,
            error: None,
            retry_count: 0,
            payload: task.payload.clone(),
            created_at: Utc::now(),
        }
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn with_retry_count(mut self, retry_count: i32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// 标记为执行中
    pub fn start(&mut self, node_id: impl Into<String>, at: DateTime<Utc>) {
        self.status = ExecutionStatus::Executing;
        self.node_id = Some(node_id.into());
        self.start_time = Some(at);
    }

    /// 写入终态，`duration_ms` 只在终态记录
    pub fn finish(
        &mut self,
        status: ExecutionStatus,
        end_time: DateTime<Utc>,
        duration_ms: Option<i64>,
        result: Option<String>,
        error: Option<String>,
    ) {
        self.status = status;
        // end_time 不早于 start_time
        let end_time = match self.start_time {
            Some(start) if end_time < start => start,
            _ => end_time,
        };
        self.end_time = Some(end_time);
        self.duration_ms = duration_ms.or_else(|| {
            self.start_time
                .map(|start| (end_time - start).num_milliseconds().max(0))
        });
        self.result = result;
        self.error = error;
    }
}

/// 执行状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ExecutionStatus {
    #[serde(rename = "QUEUED")]
    Queued,
    #[serde(rename = "EXECUTING")]
    Executing,
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "TIMEOUT")]
    TimedOut,
    #[serde(rename = "CANCELLED")]
    Cancelled,
}

impl ExecutionStatus {
    pub const ACTIVE: [ExecutionStatus; 2] = [ExecutionStatus::Queued, ExecutionStatus::Executing];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Queued => "QUEUED",
            ExecutionStatus::Executing => "EXECUTING",
            ExecutionStatus::Success => "SUCCESS",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::TimedOut => "TIMEOUT",
            ExecutionStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, ExecutionStatus::Queued | ExecutionStatus::Executing)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// 执行状态流转表
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (self, next),
            (Queued, Executing)
                | (Queued, Cancelled)
                | (Queued, Failed)
                | (Executing, Success)
                | (Executing, Failed)
                | (Executing, TimedOut)
                | (Executing, Cancelled)
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(ExecutionStatus::Queued),
            "EXECUTING" => Ok(ExecutionStatus::Executing),
            "SUCCESS" => Ok(ExecutionStatus::Success),
            "FAILED" => Ok(ExecutionStatus::Failed),
            "TIMEOUT" => Ok(ExecutionStatus::TimedOut),
            "CANCELLED" => Ok(ExecutionStatus::Cancelled),
            _ => Err(format!("Invalid execution status: {s}")),
        }
    }
}

/// 执行记录过滤器
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionFilter {
    pub task_id: Option<i64>,
    pub status: Option<ExecutionStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl ExecutionFilter {
    pub fn for_task(task_id: i64) -> Self {
        Self {
            task_id: Some(task_id),
            ..Default::default()
        }
    }

    pub fn matches(&self, execution: &TaskExecution) -> bool {
        self.task_id.is_none_or(|id| execution.task_id == id)
            && self.status.is_none_or(|status| execution.status == status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskType;
    use chrono::Duration;

    #[test]
    fn test_execution_status_transition_table() {
        use ExecutionStatus::*;
        assert!(Queued.can_transition_to(Executing));
        assert!(Queued.can_transition_to(Cancelled));
        assert!(Executing.can_transition_to(TimedOut));
        assert!(Executing.can_transition_to(Success));

        assert!(!Queued.can_transition_to(Success));
        assert!(!Executing.can_transition_to(Queued));
        for terminal in [Success, Failed, TimedOut, Cancelled] {
            assert!(terminal.is_terminal());
            for next in [Queued, Executing, Success, Failed, TimedOut, Cancelled] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_timed_out_persists_as_timeout() {
        assert_eq!(ExecutionStatus::TimedOut.as_str(), "TIMEOUT");
        assert_eq!(
            "TIMEOUT".parse::<ExecutionStatus>().unwrap(),
            ExecutionStatus::TimedOut
        );
    }

    #[test]
    fn test_finish_records_duration_and_clamps_end_time() {
        let task = Task::new("t", TaskType::Immediate, "", "noop");
        let start = Utc::now();
        let mut execution = TaskExecution::queued(&task, start);
        execution.start("worker-1", start);

        execution.finish(
            ExecutionStatus::Success,
            start - Duration::seconds(1),
            None,
            Some("ok".to_string()),
            None,
        );

        assert_eq!(execution.end_time, Some(start));
        assert_eq!(execution.duration_ms, Some(0));
        assert_eq!(execution.node_id.as_deref(), Some("worker-1"));
    }
}
