use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 默认任务超时时间（秒）
pub const DEFAULT_TIMEOUT_SECONDS: i32 = 300;

/// 任务定义
///
/// 表示系统中一个周期性或一次性的工作单元。
///
/// # 字段说明
///
/// - `task_type`: 任务类型，决定 `schedule` 的解释方式
/// - `schedule`: cron 表达式 / RFC 3339 时间戳 / 间隔秒数
/// - `handler`: 执行时调用的处理器名称
/// - `payload`: 传递给处理器的不透明数据（约定为 JSON）
/// - `next_run_time`: 下次执行时间，一次性任务执行后为 `None`
/// - `execution_count`: 始终等于 `success_count + failed_count`
///
/// # 使用示例
///
/// ```rust
/// use scheduler_core::models::{Task, TaskType, TaskStatus};
///
/// let task = Task::new("数据备份", TaskType::Cron, "0 2 * * *", "shell");
/// assert_eq!(task.status, TaskStatus::Pending);
/// assert_eq!(task.max_retries, 0);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub task_type: TaskType,
    pub schedule: String,
    pub handler: String,
    pub payload: String,
    pub timeout_seconds: i32,
    pub max_retries: i32,
    pub metadata: HashMap<String, String>,
    pub status: TaskStatus,
    pub next_run_time: Option<DateTime<Utc>>,
    pub execution_count: i64,
    pub success_count: i64,
    pub failed_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// 创建新任务
    pub fn new(
        name: impl Into<String>,
        task_type: TaskType,
        schedule: impl Into<String>,
        handler: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // 将由存储层生成
            name: name.into(),
            description: String::new(),
            task_type,
            schedule: schedule.into(),
            handler: handler.into(),
            payload: String::new(),
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            max_retries: 0, // 默认不重试
            metadata: HashMap::new(),
            status: TaskStatus::Pending,
            next_run_time: None,
            execution_count: 0,
            success_count: 0,
            failed_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// 任务是否处于可被调度循环扫描的状态
    pub fn is_schedulable(&self) -> bool {
        self.status == TaskStatus::Pending
    }

    pub fn is_recurring(&self) -> bool {
        self.task_type.is_recurring()
    }

    /// 执行超时预算
    pub fn timeout(&self) -> std::time::Duration {
        let seconds = if self.timeout_seconds > 0 {
            self.timeout_seconds
        } else {
            DEFAULT_TIMEOUT_SECONDS
        };
        std::time::Duration::from_secs(seconds as u64)
    }

    /// 当前失败的执行是否还允许重试
    pub fn allows_retry(&self, retry_count: i32) -> bool {
        retry_count < self.max_retries
    }

    pub fn entity_description(&self) -> String {
        format!("任务 '{}' (ID: {})", self.name, self.id)
    }
}

/// 任务类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskType {
    /// 创建后立即执行一次
    #[serde(rename = "IMMEDIATE")]
    Immediate,
    /// 在指定的绝对时间执行一次
    #[serde(rename = "SCHEDULED")]
    ScheduledAt,
    #[serde(rename = "CRON")]
    Cron,
    #[serde(rename = "INTERVAL")]
    Interval,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Immediate => "IMMEDIATE",
            TaskType::ScheduledAt => "SCHEDULED",
            TaskType::Cron => "CRON",
            TaskType::Interval => "INTERVAL",
        }
    }

    pub fn is_recurring(&self) -> bool {
        matches!(self, TaskType::Cron | TaskType::Interval)
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IMMEDIATE" => Ok(TaskType::Immediate),
            "SCHEDULED" => Ok(TaskType::ScheduledAt),
            "CRON" => Ok(TaskType::Cron),
            "INTERVAL" => Ok(TaskType::Interval),
            _ => Err(format!("Invalid task type: {s}")),
        }
    }
}

/// 任务状态
///
/// 合法流转见 [`TaskStatus::can_transition_to`]。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "PAUSED")]
    Paused,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "CANCELLED")]
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Paused => "PAUSED",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelled => "CANCELLED",
        }
    }

    /// 任务状态流转表
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Pending, Running) | (Pending, Paused) | (Pending, Failed) => true,
            (Running, Pending) | (Running, Completed) | (Running, Failed) => true,
            (Paused, Pending) => true,
            (Cancelled, _) => false,
            (_, Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TaskStatus::Pending),
            "RUNNING" => Ok(TaskStatus::Running),
            "PAUSED" => Ok(TaskStatus::Paused),
            "COMPLETED" => Ok(TaskStatus::Completed),
            "FAILED" => Ok(TaskStatus::Failed),
            "CANCELLED" => Ok(TaskStatus::Cancelled),
            _ => Err(format!("Invalid task status: {s}")),
        }
    }
}

/// 任务创建请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub task_type: TaskType,
    #[serde(default)]
    pub schedule: String,
    pub handler: String,
    #[serde(default)]
    pub payload: String,
    pub timeout_seconds: Option<i32>,
    pub max_retries: Option<i32>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// 任务更新请求，`None` 表示不修改该字段
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub schedule: Option<String>,
    pub payload: Option<String>,
    pub timeout_seconds: Option<i32>,
    pub max_retries: Option<i32>,
    pub metadata: Option<HashMap<String, String>>,
}

/// 任务过滤器
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub task_type: Option<TaskType>,
    /// 名称或描述中包含的关键词
    pub keyword: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl TaskFilter {
    pub fn matches(&self, task: &Task) -> bool {
        if let Some(status) = self.status {
            if task.status != status {
                return false;
            }
        }
        if let Some(task_type) = self.task_type {
            if task.task_type != task_type {
                return false;
            }
        }
        if let Some(keyword) = self.keyword.as_deref().filter(|k| !k.is_empty()) {
            if !task.name.contains(keyword) && !task.description.contains(keyword) {
                return false;
            }
        }
        true
    }
}
