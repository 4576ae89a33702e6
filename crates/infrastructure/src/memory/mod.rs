//! 进程内存储实现
//!
//! 默认的运行时存储后端，同时作为调度组件测试中的替身。
//! 任务与执行记录仓储共享一个可用性开关，可以模拟存储中断。

mod execution_repository;
mod task_repository;

pub use execution_repository::InMemoryExecutionRepository;
pub use task_repository::InMemoryTaskRepository;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use scheduler_core::{SchedulerError, SchedulerResult};

/// 存储可用性开关
///
/// 除整体开关外，还可以让某个仓储操作接下来的若干次调用失败，
/// 用于模拟多步写入中途的存储中断。
#[derive(Debug, Clone)]
pub struct Availability {
    available: Arc<AtomicBool>,
    injected: Arc<Mutex<HashMap<&'static str, usize>>>,
}

impl Default for Availability {
    fn default() -> Self {
        Self {
            available: Arc::new(AtomicBool::new(true)),
            injected: Arc::default(),
        }
    }
}

impl Availability {
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// 让 `operation`（如 `"tasks.increment_execution_count"`）接下来 `times` 次调用返回 `StoreUnavailable`
    pub fn fail_next(&self, operation: &'static str, times: usize) {
        let mut injected = self.injected.lock().unwrap_or_else(PoisonError::into_inner);
        injected.insert(operation, times);
    }

    fn check(&self, operation: &'static str) -> SchedulerResult<()> {
        if !self.is_available() {
            return Err(SchedulerError::StoreUnavailable(
                "内存存储被标记为不可用".to_string(),
            ));
        }

        let mut injected = self.injected.lock().unwrap_or_else(PoisonError::into_inner);
        match injected.get_mut(operation) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(SchedulerError::StoreUnavailable(format!(
                    "内存存储操作 {operation} 失败"
                )))
            }
            _ => Ok(()),
        }
    }
}

/// 共享同一可用性开关的一组内存仓储
#[derive(Clone)]
pub struct InMemoryStore {
    pub tasks: Arc<InMemoryTaskRepository>,
    pub executions: Arc<InMemoryExecutionRepository>,
    availability: Availability,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        let availability = Availability::default();
        Self {
            tasks: Arc::new(InMemoryTaskRepository::with_availability(
                availability.clone(),
            )),
            executions: Arc::new(InMemoryExecutionRepository::with_availability(
                availability.clone(),
            )),
            availability,
        }
    }

    /// 模拟存储中断或恢复
    pub fn set_available(&self, available: bool) {
        self.availability.set_available(available);
    }

    /// 模拟某个仓储操作的单次或多次失败，其余操作不受影响
    pub fn fail_next(&self, operation: &'static str, times: usize) {
        self.availability.fail_next(operation, times);
    }
}

/// 按 ID 倒序分页
fn paginate<T: Clone>(mut items: Vec<T>, limit: Option<i64>, offset: Option<i64>) -> (Vec<T>, i64) {
    let total = items.len() as i64;
    let offset = offset.unwrap_or(0).max(0) as usize;
    let limit = limit.filter(|l| *l > 0).map(|l| l as usize).unwrap_or(usize::MAX);
    items = items.into_iter().skip(offset).take(limit).collect();
    (items, total)
}
