use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::traits::TaskHandler;

/// 处理器注册表
///
/// 按名称保存处理器实例，可在运行时动态注册与注销。
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<RwLock<HashMap<String, Arc<dyn TaskHandler>>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以处理器自身的名称注册，同名处理器会被替换
    pub async fn register(&self, handler: Arc<dyn TaskHandler>) {
        let mut registry = self.handlers.write().await;
        registry.insert(handler.name().to_string(), handler);
    }

    pub async fn register_as(&self, name: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        let mut registry = self.handlers.write().await;
        registry.insert(name.into(), handler);
    }

    pub async fn register_batch(&self, handlers: Vec<Arc<dyn TaskHandler>>) {
        let mut registry = self.handlers.write().await;
        for handler in handlers {
            registry.insert(handler.name().to_string(), handler);
        }
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn TaskHandler>> {
        let registry = self.handlers.read().await;
        registry.get(name).cloned()
    }

    pub async fn unregister(&self, name: &str) -> bool {
        let mut registry = self.handlers.write().await;
        registry.remove(name).is_some()
    }

    pub async fn contains(&self, name: &str) -> bool {
        let registry = self.handlers.read().await;
        registry.contains_key(name)
    }

    pub async fn list_handlers(&self) -> Vec<String> {
        let registry = self.handlers.read().await;
        let mut names: Vec<String> = registry.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn count(&self) -> usize {
        self.handlers.read().await.len()
    }
}
