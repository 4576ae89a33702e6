use std::sync::Arc;

use scheduler_core::config::{DatabaseConfig, StoreKind};
use scheduler_core::traits::{ExecutionRepository, TaskRepository};
use scheduler_core::{SchedulerError, SchedulerResult};
use tracing::info;

use super::sqlite::{self, SqliteExecutionRepository, SqliteTaskRepository};
use crate::memory::InMemoryStore;

/// 存储后端
pub enum DatabasePool {
    Memory(InMemoryStore),
    SQLite(sqlx::SqlitePool),
}

/// Unified database manager
///
/// 根据 `database.url` 选择存储后端，并以 trait 对象的形式提供仓储。
pub struct DatabaseManager {
    pool: DatabasePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> SchedulerResult<Self> {
        let kind = config
            .store_kind()
            .map_err(|e| SchedulerError::Configuration(e.to_string()))?;
        let pool = match kind {
            StoreKind::Memory => DatabasePool::Memory(InMemoryStore::new()),
            StoreKind::Sqlite => DatabasePool::SQLite(sqlite::connect(config).await?),
        };
        info!("存储后端已就绪: {:?}", kind);
        Ok(Self { pool })
    }

    pub fn in_memory() -> Self {
        Self {
            pool: DatabasePool::Memory(InMemoryStore::new()),
        }
    }

    pub fn store_kind(&self) -> StoreKind {
        match self.pool {
            DatabasePool::Memory(_) => StoreKind::Memory,
            DatabasePool::SQLite(_) => StoreKind::Sqlite,
        }
    }

    pub async fn health_check(&self) -> SchedulerResult<()> {
        match &self.pool {
            DatabasePool::Memory(_) => Ok(()),
            DatabasePool::SQLite(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
                Ok(())
            }
        }
    }

    pub async fn close(&self) {
        if let DatabasePool::SQLite(pool) = &self.pool {
            pool.close().await;
        }
    }

    pub fn task_repository(&self) -> Arc<dyn TaskRepository> {
        match &self.pool {
            DatabasePool::Memory(store) => store.tasks.clone(),
            DatabasePool::SQLite(pool) => Arc::new(SqliteTaskRepository::new(pool.clone())),
        }
    }

    pub fn execution_repository(&self) -> Arc<dyn ExecutionRepository> {
        match &self.pool {
            DatabasePool::Memory(store) => store.executions.clone(),
            DatabasePool::SQLite(pool) => Arc::new(SqliteExecutionRepository::new(pool.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scheduler_core::models::{Task, TaskType};

    #[tokio::test]
    async fn test_memory_store_shares_state_between_handles() {
        let db_manager = DatabaseManager::new(&DatabaseConfig::default())
            .await
            .unwrap();
        assert_eq!(db_manager.store_kind(), StoreKind::Memory);

        let created = db_manager
            .task_repository()
            .create(&Task::new("t", TaskType::Immediate, "", "noop"))
            .await
            .unwrap();
        let fetched = db_manager
            .task_repository()
            .get_by_id(created.id)
            .await
            .unwrap();
        assert!(fetched.is_some());
    }

    #[tokio::test]
    async fn test_sqlite_database_manager() {
        let config = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            ..Default::default()
        };
        let db_manager = DatabaseManager::new(&config).await.unwrap();
        assert_eq!(db_manager.store_kind(), StoreKind::Sqlite);
        assert!(db_manager.health_check().await.is_ok());

        let _task_repo = db_manager.task_repository();
        let _execution_repo = db_manager.execution_repository();

        db_manager.close().await;
    }

    #[tokio::test]
    async fn test_unknown_url_is_rejected() {
        let config = DatabaseConfig {
            url: "redis://localhost".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            DatabaseManager::new(&config).await,
            Err(SchedulerError::Configuration(_))
        ));
    }
}
