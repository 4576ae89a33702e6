pub mod manager;
pub mod sqlite;

pub use manager::{DatabaseManager, DatabasePool};
pub use sqlite::{SqliteExecutionRepository, SqliteTaskRepository};
