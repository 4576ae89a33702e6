use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scheduler_core::models::{Task, TaskFilter, TaskStatus};
use scheduler_core::traits::TaskRepository;
use scheduler_core::{SchedulerError, SchedulerResult};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{debug, instrument};

const TASK_COLUMNS: &str = "id, name, description, task_type, schedule, handler, payload, \
     timeout_seconds, max_retries, metadata, status, next_run_time, execution_count, \
     success_count, failed_count, created_at, updated_at";

pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &sqlx::sqlite::SqliteRow) -> SchedulerResult<Task> {
        let metadata: String = row.try_get("metadata")?;
        let metadata: HashMap<String, String> = if metadata.is_empty() {
            HashMap::new()
        } else {
            serde_json::from_str(&metadata)?
        };

        Ok(Task {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            task_type: row.try_get("task_type")?,
            schedule: row.try_get("schedule")?,
            handler: row.try_get("handler")?,
            payload: row.try_get("payload")?,
            timeout_seconds: row.try_get("timeout_seconds")?,
            max_retries: row.try_get("max_retries")?,
            metadata,
            status: row.try_get("status")?,
            next_run_time: row.try_get("next_run_time")?,
            execution_count: row.try_get("execution_count")?,
            success_count: row.try_get("success_count")?,
            failed_count: row.try_get("failed_count")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn push_filter(builder: &mut QueryBuilder<'_, Sqlite>, filter: &TaskFilter) {
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status);
        }
        if let Some(task_type) = filter.task_type {
            builder.push(" AND task_type = ").push_bind(task_type);
        }
        if let Some(keyword) = filter.keyword.as_deref().filter(|k| !k.is_empty()) {
            let pattern = format!("%{keyword}%");
            builder
                .push(" AND (name LIKE ")
                .push_bind(pattern.clone())
                .push(" OR description LIKE ")
                .push_bind(pattern)
                .push(")");
        }
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    #[instrument(skip(self, task), fields(task_name = %task.name, task_type = %task.task_type))]
    async fn create(&self, task: &Task) -> SchedulerResult<Task> {
        let metadata_json = serde_json::to_string(&task.metadata)?;
        let now = Utc::now();

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO tasks (name, description, task_type, schedule, handler, payload,
                timeout_seconds, max_retries, metadata, status, next_run_time,
                execution_count, success_count, failed_count, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $15)
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(&task.name)
        .bind(&task.description)
        .bind(task.task_type)
        .bind(&task.schedule)
        .bind(&task.handler)
        .bind(&task.payload)
        .bind(task.timeout_seconds)
        .bind(task.max_retries)
        .bind(metadata_json)
        .bind(task.status)
        .bind(task.next_run_time)
        .bind(task.execution_count)
        .bind(task.success_count)
        .bind(task.failed_count)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        let created_task = Self::row_to_task(&row)?;
        debug!("创建任务成功: {}", created_task.entity_description());
        Ok(created_task)
    }

    #[instrument(skip(self), fields(task_id = %id))]
    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Task>> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    #[instrument(skip(self, task), fields(task_id = %task.id))]
    async fn update_definition(&self, task: &Task) -> SchedulerResult<()> {
        let metadata_json = serde_json::to_string(&task.metadata)?;

        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET name = $2, description = $3, schedule = $4, handler = $5, payload = $6,
                timeout_seconds = $7, max_retries = $8, metadata = $9, updated_at = $10
            WHERE id = $1
            "#,
        )
        .bind(task.id)
        .bind(&task.name)
        .bind(&task.description)
        .bind(&task.schedule)
        .bind(&task.handler)
        .bind(&task.payload)
        .bind(task.timeout_seconds)
        .bind(task.max_retries)
        .bind(metadata_json)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::TaskNotFound { id: task.id });
        }
        Ok(())
    }

    #[instrument(skip(self), fields(task_id = %id))]
    async fn delete(&self, id: i64) -> SchedulerResult<()> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::TaskNotFound { id });
        }
        debug!("删除任务成功: ID {}", id);
        Ok(())
    }

    #[instrument(skip(self, filter), fields(status = ?filter.status, limit = ?filter.limit))]
    async fn list(&self, filter: &TaskFilter) -> SchedulerResult<(Vec<Task>, i64)> {
        let mut count_query = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM tasks WHERE 1=1");
        Self::push_filter(&mut count_query, filter);
        let total: i64 = count_query
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        let mut query = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE 1=1"
        ));
        Self::push_filter(&mut query, filter);
        query.push(" ORDER BY id DESC");
        query
            .push(" LIMIT ")
            .push_bind(filter.limit.filter(|l| *l > 0).unwrap_or(-1));
        query
            .push(" OFFSET ")
            .push_bind(filter.offset.unwrap_or(0).max(0));

        let rows = query.build().fetch_all(&self.pool).await?;
        let tasks = rows
            .iter()
            .map(Self::row_to_task)
            .collect::<SchedulerResult<Vec<_>>>()?;
        Ok((tasks, total))
    }

    async fn get_due_tasks(&self, now: DateTime<Utc>) -> SchedulerResult<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE status = $1 AND next_run_time IS NOT NULL AND next_run_time <= $2 \
             ORDER BY id ASC"
        ))
        .bind(TaskStatus::Pending)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_task).collect()
    }

    async fn update_status(&self, id: i64, status: TaskStatus) -> SchedulerResult<()> {
        let result = sqlx::query("UPDATE tasks SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(status)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::TaskNotFound { id });
        }
        Ok(())
    }

    async fn compare_and_set_status(
        &self,
        id: i64,
        from: TaskStatus,
        to: TaskStatus,
    ) -> SchedulerResult<bool> {
        let result = sqlx::query(
            "UPDATE tasks SET status = $3, updated_at = $4 WHERE id = $1 AND status = $2",
        )
        .bind(id)
        .bind(from)
        .bind(to)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn compare_and_set_next_run_time(
        &self,
        id: i64,
        expected: &[TaskStatus],
        next_run_time: Option<DateTime<Utc>>,
    ) -> SchedulerResult<bool> {
        if expected.is_empty() {
            return Ok(false);
        }

        let mut query = QueryBuilder::<Sqlite>::new("UPDATE tasks SET next_run_time = ");
        query
            .push_bind(next_run_time)
            .push(", updated_at = ")
            .push_bind(Utc::now())
            .push(" WHERE id = ")
            .push_bind(id)
            .push(" AND status IN (");
        let mut statuses = query.separated(", ");
        for status in expected {
            statuses.push_bind(*status);
        }
        statuses.push_unseparated(")");

        let result = query.build().execute(&self.pool).await?;
        Ok(result.rows_affected() == 1)
    }

    /// 计数标记与计数器在同一事务内写入，同一执行重复调用时不再递增
    #[instrument(skip(self), fields(task_id = %id, execution_id = %execution_id))]
    async fn increment_execution_count(
        &self,
        id: i64,
        execution_id: i64,
        success: bool,
    ) -> SchedulerResult<bool> {
        let (success_inc, failed_inc) = if success { (1, 0) } else { (0, 1) };
        let mut tx = self.pool.begin().await?;

        let marked = sqlx::query(
            "INSERT OR IGNORE INTO task_counted_executions (execution_id, task_id) VALUES ($1, $2)",
        )
        .bind(execution_id)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        if marked.rows_affected() == 0 {
            tx.rollback().await?;
            debug!("执行 {} 已计入任务 {} 的计数", execution_id, id);
            return Ok(false);
        }

        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET execution_count = execution_count + 1,
                success_count = success_count + $2,
                failed_count = failed_count + $3,
                updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(success_inc)
        .bind(failed_inc)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(SchedulerError::TaskNotFound { id });
        }
        tx.commit().await?;
        Ok(true)
    }
}
