//! 配置管理
//!
//! 配置来源按优先级从低到高：内置默认值、TOML 配置文件、`SCHEDULER_` 前缀的环境变量。

pub mod models;

pub use models::*;
