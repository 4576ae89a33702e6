use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scheduler_core::models::{Task, TaskFilter, TaskStatus};
use scheduler_core::traits::TaskRepository;
use scheduler_core::{SchedulerError, SchedulerResult};
use tokio::sync::RwLock;
use tracing::debug;

use super::{paginate, Availability};

#[derive(Debug, Default)]
struct TaskTable {
    rows: BTreeMap<i64, Task>,
    /// 已计入任务计数的执行 ID
    counted_executions: HashSet<i64>,
}

/// 内存任务仓储
#[derive(Debug, Default)]
pub struct InMemoryTaskRepository {
    tasks: RwLock<TaskTable>,
    next_id: AtomicI64,
    availability: Availability,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub(super) fn with_availability(availability: Availability) -> Self {
        Self {
            availability,
            ..Self::default()
        }
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn create(&self, task: &Task) -> SchedulerResult<Task> {
        self.availability.check("tasks.create")?;
        let mut tasks = self.tasks.write().await;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();
        let mut created = task.clone();
        created.id = id;
        created.created_at = now;
        created.updated_at = now;
        tasks.rows.insert(id, created.clone());
        debug!("创建任务成功: {}", created.entity_description());
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Task>> {
        self.availability.check("tasks.get_by_id")?;
        Ok(self.tasks.read().await.rows.get(&id).cloned())
    }

    async fn update_definition(&self, task: &Task) -> SchedulerResult<()> {
        self.availability.check("tasks.update_definition")?;
        let mut tasks = self.tasks.write().await;
        let existing = tasks
            .rows
            .get_mut(&task.id)
            .ok_or(SchedulerError::TaskNotFound { id: task.id })?;
        existing.name = task.name.clone();
        existing.description = task.description.clone();
        existing.schedule = task.schedule.clone();
        existing.handler = task.handler.clone();
        existing.payload = task.payload.clone();
        existing.timeout_seconds = task.timeout_seconds;
        existing.max_retries = task.max_retries;
        existing.metadata = task.metadata.clone();
        existing.updated_at = Utc::now();
        Ok(())
    }

    async fn delete(&self, id: i64) -> SchedulerResult<()> {
        self.availability.check("tasks.delete")?;
        self.tasks
            .write()
            .await
            .rows
            .remove(&id)
            .map(|_| ())
            .ok_or(SchedulerError::TaskNotFound { id })
    }

    async fn list(&self, filter: &TaskFilter) -> SchedulerResult<(Vec<Task>, i64)> {
        self.availability.check("tasks.list")?;
        let tasks = self.tasks.read().await;
        let matching: Vec<Task> = tasks
            .rows
            .values()
            .rev()
            .filter(|task| filter.matches(task))
            .cloned()
            .collect();
        Ok(paginate(matching, filter.limit, filter.offset))
    }

    async fn get_due_tasks(&self, now: DateTime<Utc>) -> SchedulerResult<Vec<Task>> {
        self.availability.check("tasks.get_due_tasks")?;
        let tasks = self.tasks.read().await;
        Ok(tasks
            .rows
            .values()
            .filter(|task| task.status == TaskStatus::Pending)
            .filter(|task| task.next_run_time.is_some_and(|next| next <= now))
            .cloned()
            .collect())
    }

    async fn update_status(&self, id: i64, status: TaskStatus) -> SchedulerResult<()> {
        self.availability.check("tasks.update_status")?;
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .rows
            .get_mut(&id)
            .ok_or(SchedulerError::TaskNotFound { id })?;
        task.status = status;
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn compare_and_set_status(
        &self,
        id: i64,
        from: TaskStatus,
        to: TaskStatus,
    ) -> SchedulerResult<bool> {
        self.availability.check("tasks.compare_and_set_status")?;
        let mut tasks = self.tasks.write().await;
        match tasks.rows.get_mut(&id) {
            Some(task) if task.status == from => {
                task.status = to;
                task.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn compare_and_set_next_run_time(
        &self,
        id: i64,
        expected: &[TaskStatus],
        next_run_time: Option<DateTime<Utc>>,
    ) -> SchedulerResult<bool> {
        self.availability
            .check("tasks.compare_and_set_next_run_time")?;
        let mut tasks = self.tasks.write().await;
        match tasks.rows.get_mut(&id) {
            Some(task) if expected.contains(&task.status) => {
                task.next_run_time = next_run_time;
                task.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn increment_execution_count(
        &self,
        id: i64,
        execution_id: i64,
        success: bool,
    ) -> SchedulerResult<bool> {
        self.availability.check("tasks.increment_execution_count")?;
        let mut tasks = self.tasks.write().await;
        let TaskTable {
            rows,
            counted_executions,
        } = &mut *tasks;
        let task = rows
            .get_mut(&id)
            .ok_or(SchedulerError::TaskNotFound { id })?;
        if !counted_executions.insert(execution_id) {
            return Ok(false);
        }
        task.execution_count += 1;
        if success {
            task.success_count += 1;
        } else {
            task.failed_count += 1;
        }
        task.updated_at = Utc::now();
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scheduler_core::models::TaskType;

    #[tokio::test]
    async fn test_compare_and_set_only_applies_from_expected_status() {
        let repo = InMemoryTaskRepository::new();
        let task = repo
            .create(&Task::new("t", TaskType::Interval, "5", "noop"))
            .await
            .unwrap();

        assert!(repo
            .compare_and_set_status(task.id, TaskStatus::Pending, TaskStatus::Running)
            .await
            .unwrap());
        assert!(!repo
            .compare_and_set_status(task.id, TaskStatus::Pending, TaskStatus::Paused)
            .await
            .unwrap());
        assert!(!repo
            .compare_and_set_status(999, TaskStatus::Pending, TaskStatus::Running)
            .await
            .unwrap());

        let stored = repo.get_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn test_due_tasks_are_pending_and_ascending() {
        let repo = InMemoryTaskRepository::new();
        let now = Utc::now();
        for name in ["a", "b", "c"] {
            let mut task = Task::new(name, TaskType::Interval, "5", "noop");
            task.next_run_time = Some(now);
            repo.create(&task).await.unwrap();
        }
        repo.update_status(2, TaskStatus::Paused).await.unwrap();

        let due = repo.get_due_tasks(now).await.unwrap();
        let ids: Vec<i64> = due.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![1, 3]);

        let due = repo
            .get_due_tasks(now - chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert!(due.is_empty());
    }

    #[tokio::test]
    async fn test_counters_stay_consistent() {
        let repo = InMemoryTaskRepository::new();
        let task = repo
            .create(&Task::new("t", TaskType::Immediate, "", "noop"))
            .await
            .unwrap();
        assert!(repo.increment_execution_count(task.id, 1, true).await.unwrap());
        assert!(repo.increment_execution_count(task.id, 2, false).await.unwrap());
        assert!(repo.increment_execution_count(task.id, 3, false).await.unwrap());
        assert!(!repo.increment_execution_count(task.id, 2, false).await.unwrap());
        assert!(matches!(
            repo.increment_execution_count(999, 4, true).await,
            Err(SchedulerError::TaskNotFound { id: 999 })
        ));

        let stored = repo.get_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(stored.execution_count, 3);
        assert_eq!(stored.success_count, 1);
        assert_eq!(stored.failed_count, 2);
        assert_eq!(
            stored.execution_count,
            stored.success_count + stored.failed_count
        );
    }

    #[tokio::test]
    async fn test_update_definition_keeps_runtime_fields() {
        let repo = InMemoryTaskRepository::new();
        let mut task = Task::new("t", TaskType::Interval, "5", "noop");
        task.next_run_time = Some(Utc::now());
        let task = repo.create(&task).await.unwrap();

        let stale = task.clone();
        assert!(repo
            .compare_and_set_status(task.id, TaskStatus::Pending, TaskStatus::Running)
            .await
            .unwrap());
        repo.increment_execution_count(task.id, 1, true).await.unwrap();

        let mut edited = stale;
        edited.description = "edited".to_string();
        edited.schedule = "10".to_string();
        repo.update_definition(&edited).await.unwrap();

        let stored = repo.get_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(stored.description, "edited");
        assert_eq!(stored.schedule, "10");
        assert_eq!(stored.status, TaskStatus::Running);
        assert_eq!(stored.execution_count, 1);
        assert_eq!(stored.next_run_time, task.next_run_time);
    }

    #[tokio::test]
    async fn test_next_run_time_written_only_from_expected_status() {
        let repo = InMemoryTaskRepository::new();
        let task = repo
            .create(&Task::new("t", TaskType::Interval, "5", "noop"))
            .await
            .unwrap();
        let later = Some(Utc::now() + chrono::Duration::seconds(30));

        assert!(repo
            .compare_and_set_next_run_time(task.id, &[TaskStatus::Pending, TaskStatus::Paused], later)
            .await
            .unwrap());
        repo.update_status(task.id, TaskStatus::Running).await.unwrap();
        assert!(!repo
            .compare_and_set_next_run_time(task.id, &[TaskStatus::Pending, TaskStatus::Paused], None)
            .await
            .unwrap());

        let stored = repo.get_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(stored.next_run_time, later);
    }

    #[tokio::test]
    async fn test_injected_failure_affects_only_named_operation() {
        let availability = Availability::default();
        let repo = InMemoryTaskRepository::with_availability(availability.clone());
        let task = repo
            .create(&Task::new("t", TaskType::Immediate, "", "noop"))
            .await
            .unwrap();

        availability.fail_next("tasks.increment_execution_count", 1);
        assert!(repo.get_by_id(task.id).await.is_ok());
        let result = repo.increment_execution_count(task.id, 1, true).await;
        assert!(matches!(result, Err(SchedulerError::StoreUnavailable(_))));
        assert!(repo.increment_execution_count(task.id, 1, true).await.unwrap());
    }
}
