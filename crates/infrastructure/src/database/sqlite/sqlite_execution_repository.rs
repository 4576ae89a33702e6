use async_trait::async_trait;
use scheduler_core::models::{ExecutionFilter, ExecutionStatus, TaskExecution};
use scheduler_core::traits::ExecutionRepository;
use scheduler_core::{SchedulerError, SchedulerResult};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{debug, instrument};

const EXECUTION_COLUMNS: &str = "id, task_id, task_name, status, node_id, scheduled_at, \
     start_time, end_time, duration_ms, result, error, retry_count, payload, created_at";

pub struct SqliteExecutionRepository {
    pool: SqlitePool,
}

impl SqliteExecutionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_execution(row: &sqlx::sqlite::SqliteRow) -> SchedulerResult<TaskExecution> {
        Ok(TaskExecution {
            id: row.try_get("id")?,
            task_id: row.try_get("task_id")?,
            task_name: row.try_get("task_name")?,
            status: row.try_get("status")?,
            node_id: row.try_get("node_id")?,
            scheduled_at: row.try_get("scheduled_at")?,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
            duration_ms: row.try_get("duration_ms")?,
            result: row.try_get("result")?,
            error: row.try_get("error")?,
            retry_count: row.try_get("retry_count")?,
            payload: row.try_get("payload")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn push_filter(builder: &mut QueryBuilder<'_, Sqlite>, filter: &ExecutionFilter) {
        if let Some(task_id) = filter.task_id {
            builder.push(" AND task_id = ").push_bind(task_id);
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status);
        }
    }

    fn push_active_statuses(builder: &mut QueryBuilder<'_, Sqlite>) {
        builder.push("(");
        {
            let mut separated = builder.separated(", ");
            for status in ExecutionStatus::ACTIVE {
                separated.push_bind(status);
            }
        }
        builder.push(")");
    }
}

#[async_trait]
impl ExecutionRepository for SqliteExecutionRepository {
    #[instrument(skip(self, execution), fields(task_id = %execution.task_id))]
    async fn create(&self, execution: &TaskExecution) -> SchedulerResult<TaskExecution> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO task_executions (task_id, task_name, status, node_id, scheduled_at,
                start_time, end_time, duration_ms, result, error, retry_count, payload, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING {EXECUTION_COLUMNS}
            "#
        ))
        .bind(execution.task_id)
        .bind(&execution.task_name)
        .bind(execution.status)
        .bind(&execution.node_id)
        .bind(execution.scheduled_at)
        .bind(execution.start_time)
        .bind(execution.end_time)
        .bind(execution.duration_ms)
        .bind(&execution.result)
        .bind(&execution.error)
        .bind(execution.retry_count)
        .bind(&execution.payload)
        .bind(execution.created_at)
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_execution(&row)
    }

    /// 单条 `INSERT ... SELECT ... WHERE NOT EXISTS` 语句，SQLite 的写串行化保证其原子性
    #[instrument(skip(self, execution), fields(task_id = %execution.task_id))]
    async fn create_if_no_active(
        &self,
        execution: &TaskExecution,
    ) -> SchedulerResult<Option<TaskExecution>> {
        let mut query = QueryBuilder::<Sqlite>::new(
            "INSERT INTO task_executions (task_id, task_name, status, node_id, scheduled_at, \
             start_time, end_time, duration_ms, result, error, retry_count, payload, created_at) \
             SELECT ",
        );
        {
            let mut values = query.separated(", ");
            values
                .push_bind(execution.task_id)
                .push_bind(execution.task_name.clone())
                .push_bind(execution.status)
                .push_bind(execution.node_id.clone())
                .push_bind(execution.scheduled_at)
                .push_bind(execution.start_time)
                .push_bind(execution.end_time)
                .push_bind(execution.duration_ms)
                .push_bind(execution.result.clone())
                .push_bind(execution.error.clone())
                .push_bind(execution.retry_count)
                .push_bind(execution.payload.clone())
                .push_bind(execution.created_at);
        }
        query
            .push(" WHERE NOT EXISTS (SELECT 1 FROM task_executions WHERE task_id = ")
            .push_bind(execution.task_id)
            .push(" AND status IN ");
        Self::push_active_statuses(&mut query);
        query.push(format!(") RETURNING {EXECUTION_COLUMNS}"));

        let row = query.build().fetch_optional(&self.pool).await?;
        match row {
            Some(row) => Ok(Some(Self::row_to_execution(&row)?)),
            None => {
                debug!("任务 {} 已有活跃执行，未创建新记录", execution.task_id);
                Ok(None)
            }
        }
    }

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<TaskExecution>> {
        let row = sqlx::query(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM task_executions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_execution).transpose()
    }

    async fn update(&self, execution: &TaskExecution) -> SchedulerResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE task_executions
            SET status = $2, node_id = $3, start_time = $4, end_time = $5, duration_ms = $6,
                result = $7, error = $8, retry_count = $9, payload = $10
            WHERE id = $1
            "#,
        )
        .bind(execution.id)
        .bind(execution.status)
        .bind(&execution.node_id)
        .bind(execution.start_time)
        .bind(execution.end_time)
        .bind(execution.duration_ms)
        .bind(&execution.result)
        .bind(&execution.error)
        .bind(execution.retry_count)
        .bind(&execution.payload)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::ExecutionNotFound { id: execution.id });
        }
        Ok(())
    }

    async fn list(&self, filter: &ExecutionFilter) -> SchedulerResult<(Vec<TaskExecution>, i64)> {
        let mut count_query =
            QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM task_executions WHERE 1=1");
        Self::push_filter(&mut count_query, filter);
        let total: i64 = count_query
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        let mut query = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {EXECUTION_COLUMNS} FROM task_executions WHERE 1=1"
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
        let executions = rows
            .iter()
            .map(Self::row_to_execution)
            .collect::<SchedulerResult<Vec<_>>>()?;
        Ok((executions, total))
    }

    async fn find_active_by_task(&self, task_id: i64) -> SchedulerResult<Option<TaskExecution>> {
        let mut query = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {EXECUTION_COLUMNS} FROM task_executions WHERE task_id = "
        ));
        query.push_bind(task_id).push(" AND status IN ");
        Self::push_active_statuses(&mut query);
        query.push(" ORDER BY id DESC LIMIT 1");

        let row = query.build().fetch_optional(&self.pool).await?;
        row.as_ref().map(Self::row_to_execution).transpose()
    }

    async fn get_by_status(&self, status: ExecutionStatus) -> SchedulerResult<Vec<TaskExecution>> {
        let rows = sqlx::query(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM task_executions WHERE status = $1 ORDER BY id ASC"
        ))
        .bind(status)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_execution).collect()
    }

    #[instrument(skip(self, execution), fields(execution_id = %execution.id, to = %execution.status))]
    async fn transition(
        &self,
        execution: &TaskExecution,
        from: &[ExecutionStatus],
    ) -> SchedulerResult<bool> {
        if from.is_empty() {
            return Ok(false);
        }

        let mut query = QueryBuilder::<Sqlite>::new("UPDATE task_executions SET status = ");
        query
            .push_bind(execution.status)
            .push(", node_id = ")
            .push_bind(execution.node_id.clone())
            .push(", start_time = ")
            .push_bind(execution.start_time)
            .push(", end_time = ")
            .push_bind(execution.end_time)
            .push(", duration_ms = ")
            .push_bind(execution.duration_ms)
            .push(", result = ")
            .push_bind(execution.result.clone())
            .push(", error = ")
            .push_bind(execution.error.clone())
            .push(", retry_count = ")
            .push_bind(execution.retry_count)
            .push(", payload = ")
            .push_bind(execution.payload.clone())
            .push(" WHERE id = ")
            .push_bind(execution.id)
            .push(" AND status IN (");
        {
            let mut separated = query.separated(", ");
            for status in from {
                separated.push_bind(*status);
            }
        }
        query.push(")");

        let result = query.build().execute(&self.pool).await?;
        Ok(result.rows_affected() == 1)
    }
}
