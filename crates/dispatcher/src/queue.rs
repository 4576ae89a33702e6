//! 分发队列
//!
//! 按 `(due_at, task_id)` 升序排列的待执行票据集合，每个任务同一时刻最多只有一张票据。
//! 调度循环负责入队，执行器池通过 [`DispatchQueue::dequeue`] 领取。

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

/// 分发票据
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchTicket {
    pub task_id: i64,
    pub execution_id: i64,
    pub due_at: DateTime<Utc>,
}

impl DispatchTicket {
    pub fn new(task_id: i64, execution_id: i64, due_at: DateTime<Utc>) -> Self {
        Self {
            task_id,
            execution_id,
            due_at,
        }
    }
}

#[derive(Default)]
struct QueueState {
    order: BTreeSet<(DateTime<Utc>, i64)>,
    entries: HashMap<i64, DispatchTicket>,
}

impl QueueState {
    fn pop_due(&mut self, now: DateTime<Utc>) -> Option<DispatchTicket> {
        let &(due_at, task_id) = self.order.first()?;
        if due_at > now {
            return None;
        }
        self.order.remove(&(due_at, task_id));
        self.entries.remove(&task_id)
    }

    fn next_due(&self) -> Option<DateTime<Utc>> {
        self.order.first().map(|(due_at, _)| *due_at)
    }

    fn take(&mut self, task_id: i64) -> Option<DispatchTicket> {
        let ticket = self.entries.remove(&task_id)?;
        self.order.remove(&(ticket.due_at, task_id));
        Some(ticket)
    }
}

/// 分发队列
#[derive(Default)]
pub struct DispatchQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl DispatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 入队，任务已在队列中时不做任何修改并返回 `false`
    pub fn enqueue(&self, task_id: i64, execution_id: i64, due_at: DateTime<Utc>) -> bool {
        {
            let mut state = self.lock();
            if state.entries.contains_key(&task_id) {
                return false;
            }
            state.order.insert((due_at, task_id));
            state
                .entries
                .insert(task_id, DispatchTicket::new(task_id, execution_id, due_at));
        }
        self.notify.notify_waiters();
        true
    }

    /// 取出最早到期的票据，队列为空或尚未到期时挂起等待
    pub async fn dequeue(&self) -> DispatchTicket {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next_due = {
                let mut state = self.lock();
                let now = Utc::now();
                if let Some(ticket) = state.pop_due(now) {
                    return ticket;
                }
                state.next_due()
            };

            match next_due {
                Some(due_at) => {
                    let wait = (due_at - Utc::now())
                        .to_std()
                        .unwrap_or_default()
                        .max(std::time::Duration::from_millis(1));
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// 非阻塞取出，`now` 时刻没有到期票据时返回 `None`
    pub fn try_dequeue(&self, now: DateTime<Utc>) -> Option<DispatchTicket> {
        self.lock().pop_due(now)
    }

    /// 领取前撤回任务的票据
    pub fn remove(&self, task_id: i64) -> Option<DispatchTicket> {
        self.lock().take(task_id)
    }

    /// 仅当票据属于指定执行记录时撤回
    pub fn remove_execution(&self, task_id: i64, execution_id: i64) -> Option<DispatchTicket> {
        let mut state = self.lock();
        match state.entries.get(&task_id) {
            Some(ticket) if ticket.execution_id == execution_id => state.take(task_id),
            _ => None,
        }
    }

    pub fn contains(&self, task_id: i64) -> bool {
        self.lock().entries.contains_key(&task_id)
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.order.clear();
        state.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
