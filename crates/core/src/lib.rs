pub mod config;
pub mod errors;
pub mod handler_registry;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use errors::*;
pub use handler_registry::HandlerRegistry;
