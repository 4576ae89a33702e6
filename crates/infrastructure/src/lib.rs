pub mod database;
pub mod memory;
pub mod observability;

pub use database::{DatabaseManager, SqliteExecutionRepository, SqliteTaskRepository};
pub use memory::{InMemoryExecutionRepository, InMemoryStore, InMemoryTaskRepository};
pub use observability::{MetricsCollector, StructuredLogger};
