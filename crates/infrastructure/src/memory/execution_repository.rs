use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use scheduler_core::models::{ExecutionFilter, ExecutionStatus, TaskExecution};
use scheduler_core::traits::ExecutionRepository;
use scheduler_core::{SchedulerError, SchedulerResult};
use tokio::sync::RwLock;

use super::{paginate, Availability};

/// 内存执行记录仓储
///
/// 所有写操作在同一把写锁下完成，`create_if_no_active` 与 `transition` 因此是线性化的。
#[derive(Debug, Default)]
pub struct InMemoryExecutionRepository {
    executions: RwLock<BTreeMap<i64, TaskExecution>>,
    next_id: AtomicI64,
    availability: Availability,
}

impl InMemoryExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub(super) fn with_availability(availability: Availability) -> Self {
        Self {
            availability,
            ..Self::default()
        }
    }

    fn insert(
        &self,
        executions: &mut BTreeMap<i64, TaskExecution>,
        execution: &TaskExecution,
    ) -> TaskExecution {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let mut created = execution.clone();
        created.id = id;
        executions.insert(id, created.clone());
        created
    }
}

#[async_trait]
impl ExecutionRepository for InMemoryExecutionRepository {
    async fn create(&self, execution: &TaskExecution) -> SchedulerResult<TaskExecution> {
        self.availability.check("executions.create")?;
        let mut executions = self.executions.write().await;
        Ok(self.insert(&mut executions, execution))
    }

    async fn create_if_no_active(
        &self,
        execution: &TaskExecution,
    ) -> SchedulerResult<Option<TaskExecution>> {
        self.availability.check("executions.create_if_no_active")?;
        let mut executions = self.executions.write().await;
        let has_active = executions
            .values()
            .any(|e| e.task_id == execution.task_id && e.is_active());
        if has_active {
            return Ok(None);
        }
        Ok(Some(self.insert(&mut executions, execution)))
    }

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<TaskExecution>> {
        self.availability.check("executions.get_by_id")?;
        Ok(self.executions.read().await.get(&id).cloned())
    }

    async fn update(&self, execution: &TaskExecution) -> SchedulerResult<()> {
        self.availability.check("executions.update")?;
        let mut executions = self.executions.write().await;
        let existing = executions
            .get_mut(&execution.id)
            .ok_or(SchedulerError::ExecutionNotFound { id: execution.id })?;
        *existing = execution.clone();
        Ok(())
    }

    async fn list(&self, filter: &ExecutionFilter) -> SchedulerResult<(Vec<TaskExecution>, i64)> {
        self.availability.check("executions.list")?;
        let executions = self.executions.read().await;
        let matching: Vec<TaskExecution> = executions
            .values()
            .rev()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        Ok(paginate(matching, filter.limit, filter.offset))
    }

    async fn find_active_by_task(&self, task_id: i64) -> SchedulerResult<Option<TaskExecution>> {
        self.availability.check("executions.find_active_by_task")?;
        let executions = self.executions.read().await;
        Ok(executions
            .values()
            .find(|e| e.task_id == task_id && e.is_active())
            .cloned())
    }

    async fn get_by_status(&self, status: ExecutionStatus) -> SchedulerResult<Vec<TaskExecution>> {
        self.availability.check("executions.get_by_status")?;
        let executions = self.executions.read().await;
        Ok(executions
            .values()
            .filter(|e| e.status == status)
            .cloned()
            .collect())
    }

    async fn transition(
        &self,
        execution: &TaskExecution,
        from: &[ExecutionStatus],
    ) -> SchedulerResult<bool> {
        self.availability.check("executions.transition")?;
        let mut executions = self.executions.write().await;
        match executions.get_mut(&execution.id) {
            Some(existing) if from.contains(&existing.status) => {
                *existing = execution.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
