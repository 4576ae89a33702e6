//! 任务执行
//!
//! - [`pool`]: 执行器池，领取分发队列中的票据并调用处理器
//! - [`handlers`]: 内置处理器（`shell`、`http`）

pub mod handlers;
pub mod pool;

use std::sync::Arc;

use scheduler_core::HandlerRegistry;

pub use handlers::{HttpHandler, HttpTaskParams, ShellHandler, ShellTaskParams};
pub use pool::ExecutorPool;

/// 注册内置处理器
pub async fn register_builtin_handlers(registry: &HandlerRegistry) {
    registry
        .register_batch(vec![
            Arc::new(ShellHandler::new()),
            Arc::new(HttpHandler::new()),
        ])
        .await;
}
