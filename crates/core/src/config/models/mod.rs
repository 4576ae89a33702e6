pub mod api_observability;
pub mod app_config;
pub mod database;
pub mod dispatcher_worker;

pub use api_observability::{ApiConfig, ObservabilityConfig};
pub use app_config::AppConfig;
pub use database::{DatabaseConfig, StoreKind};
pub use dispatcher_worker::{DispatcherConfig, WorkerConfig};
