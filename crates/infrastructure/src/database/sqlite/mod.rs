pub mod sqlite_execution_repository;
pub mod sqlite_task_repository;

pub use sqlite_execution_repository::SqliteExecutionRepository;
pub use sqlite_task_repository::SqliteTaskRepository;

use std::str::FromStr;
use std::time::Duration;

use scheduler_core::config::DatabaseConfig;
use scheduler_core::SchedulerResult;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::debug;

/// 创建 SQLite 连接池并初始化表结构
///
/// 内存数据库的每个连接都是独立的库，因此只保留一个常驻连接。
pub async fn connect(config: &DatabaseConfig) -> SchedulerResult<SqlitePool> {
    let in_memory = config.url.contains(":memory:");
    let mut connect_options = SqliteConnectOptions::from_str(&config.url)?.create_if_missing(true);
    if !in_memory {
        connect_options = connect_options.journal_mode(SqliteJournalMode::Wal);
    }

    let mut pool_options = SqlitePoolOptions::new()
        .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds));
    pool_options = if in_memory {
        pool_options
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        pool_options
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
    };

    let pool = pool_options.connect_with(connect_options).await?;
    run_migrations(&pool).await?;
    Ok(pool)
}

/// 幂等地创建表与索引
pub async fn run_migrations(pool: &SqlitePool) -> SchedulerResult<()> {
    debug!("Running SQLite database migrations");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            task_type TEXT NOT NULL,
            schedule TEXT NOT NULL DEFAULT '',
            handler TEXT NOT NULL,
            payload TEXT NOT NULL DEFAULT '',
            timeout_seconds INTEGER NOT NULL DEFAULT 300,
            max_retries INTEGER NOT NULL DEFAULT 0,
            metadata TEXT NOT NULL DEFAULT '{}',
            status TEXT NOT NULL DEFAULT 'PENDING',
            next_run_time DATETIME,
            execution_count INTEGER NOT NULL DEFAULT 0,
            success_count INTEGER NOT NULL DEFAULT 0,
            failed_count INTEGER NOT NULL DEFAULT 0,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // 删除任务不级联删除执行记录
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS task_executions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id INTEGER NOT NULL,
            task_name TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'QUEUED',
            node_id TEXT,
            scheduled_at DATETIME NOT NULL,
            start_time DATETIME,
            end_time DATETIME,
            duration_ms INTEGER,
            result TEXT,
            error TEXT,
            retry_count INTEGER NOT NULL DEFAULT 0,
            payload TEXT NOT NULL DEFAULT '',
            created_at DATETIME NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // 已计入任务计数的执行，保证同一执行只计数一次
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS task_counted_executions (
            execution_id INTEGER PRIMARY KEY,
            task_id INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_tasks_status_next_run ON tasks(status, next_run_time)",
        "CREATE INDEX IF NOT EXISTS idx_task_executions_task_id ON task_executions(task_id)",
        "CREATE INDEX IF NOT EXISTS idx_task_executions_status ON task_executions(status)",
    ];

    for index_sql in indexes {
        sqlx::query(index_sql).execute(pool).await?;
    }

    debug!("Successfully completed SQLite database migrations");
    Ok(())
}
