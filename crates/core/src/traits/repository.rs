//! 数据仓储层接口定义
//!
//! 此模块定义了数据持久化层的核心抽象接口：
//! - 任务仓储接口 ([`TaskRepository`])
//! - 执行记录仓储接口 ([`ExecutionRepository`])
//!
//! ## 设计原则
//!
//! ### 存储是唯一事实来源
//! 调度循环、执行器池与取消协调器在内存中维护的状态都只是存储的镜像，
//! 可以随时从存储重建。
//!
//! ### 比较并交换
//! 所有状态写入都通过比较并交换完成：
//! - 任务状态：`(id, 期望状态)` 上的 CAS
//! - 执行状态：`(id, 期望状态集合)` 上的 CAS
//!
//! 两个写者竞争同一行时，恰好一个成功，另一个得到 `false`。
//!
//! ### 同一任务至多一个活跃执行
//! [`ExecutionRepository::create_if_no_active`] 在存储内部原子地检查并创建，
//! 是"同一任务同时最多一个排队中或执行中的实例"的最终保证。
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! use scheduler_core::traits::TaskRepository;
//! use scheduler_core::models::TaskStatus;
//!
//! async fn claim(repo: &dyn TaskRepository, id: i64) -> SchedulerResult<bool> {
//!     repo.compare_and_set_status(id, TaskStatus::Pending, TaskStatus::Running)
//!         .await
//! }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{ExecutionFilter, ExecutionStatus, Task, TaskExecution, TaskFilter, TaskStatus};
use crate::SchedulerResult;

/// 任务仓储接口
///
/// 负责任务定义的持久化与状态维护。
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// 创建新任务
    ///
    /// 返回带有存储生成 ID 的任务。
    async fn create(&self, task: &Task) -> SchedulerResult<Task>;

    /// 根据ID获取任务
    ///
    /// 未找到时返回 `None`。
    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Task>>;

    /// 更新任务定义
    ///
    /// 只写入名称、描述、调度表达式、处理器、负载、超时、重试次数与元数据。
    /// 状态、下次执行时间和计数器由调度路径各自通过比较并交换维护，这里不会覆盖。
    ///
    /// # 错误
    ///
    /// * `TaskNotFound` - 任务不存在
    async fn update_definition(&self, task: &Task) -> SchedulerResult<()>;

    /// 删除任务，不影响其执行记录
    ///
    /// # 错误
    ///
    /// * `TaskNotFound` - 任务不存在
    async fn delete(&self, id: i64) -> SchedulerResult<()>;

    /// 分页查询任务，按 ID 倒序
    ///
    /// 返回当前页与满足条件的总数。
    async fn list(&self, filter: &TaskFilter) -> SchedulerResult<(Vec<Task>, i64)>;

    /// 获取到期任务
    ///
    /// 返回 `status = Pending` 且 `next_run_time <= now` 的任务，按 ID 升序。
    async fn get_due_tasks(&self, now: DateTime<Utc>) -> SchedulerResult<Vec<Task>>;

    /// 无条件写入任务状态
    ///
    /// 只用于管理操作；核心流程必须使用 [`compare_and_set_status`](Self::compare_and_set_status)。
    async fn update_status(&self, id: i64, status: TaskStatus) -> SchedulerResult<()>;

    /// 比较并交换任务状态
    ///
    /// 仅当当前状态等于 `from` 时写入 `to`，返回是否写入成功。
    /// 任务不存在时返回 `false`。
    async fn compare_and_set_status(
        &self,
        id: i64,
        from: TaskStatus,
        to: TaskStatus,
    ) -> SchedulerResult<bool>;

    /// 按状态条件写入下次执行时间
    ///
    /// 仅当当前状态属于 `expected` 时写入，返回是否写入成功。
    /// 任务不存在时返回 `false`。
    async fn compare_and_set_next_run_time(
        &self,
        id: i64,
        expected: &[TaskStatus],
        next_run_time: Option<DateTime<Utc>>,
    ) -> SchedulerResult<bool>;

    /// 为一次执行递增任务计数
    ///
    /// `execution_count` 加一，`success` 决定加到 `success_count` 还是 `failed_count`。
    /// 同一 `execution_id` 至多计数一次，重复调用返回 `false` 且不修改计数。
    ///
    /// # 错误
    ///
    /// * `TaskNotFound` - 任务不存在
    async fn increment_execution_count(
        &self,
        id: i64,
        execution_id: i64,
        success: bool,
    ) -> SchedulerResult<bool>;
}

/// 执行记录仓储接口
///
/// 管理执行记录从 `Queued` 到终态的完整生命周期。
///
/// # 线程安全
///
/// 实现必须保证 [`create_if_no_active`](Self::create_if_no_active) 与
/// [`transition`](Self::transition) 对同一行的并发调用是线性化的。
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    /// 创建执行记录
    async fn create(&self, execution: &TaskExecution) -> SchedulerResult<TaskExecution>;

    /// 原子地创建执行记录
    ///
    /// 若该任务已存在 `Queued` 或 `Executing` 的执行记录，则不创建并返回 `None`。
    async fn create_if_no_active(
        &self,
        execution: &TaskExecution,
    ) -> SchedulerResult<Option<TaskExecution>>;

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<TaskExecution>>;

    /// 无条件覆盖执行记录
    ///
    /// # 错误
    ///
    /// * `ExecutionNotFound` - 记录不存在
    async fn update(&self, execution: &TaskExecution) -> SchedulerResult<()>;

    /// 分页查询执行记录，按 ID 倒序
    async fn list(&self, filter: &ExecutionFilter) -> SchedulerResult<(Vec<TaskExecution>, i64)>;

    /// 查找任务当前的活跃执行（`Queued` 或 `Executing`）
    async fn find_active_by_task(&self, task_id: i64) -> SchedulerResult<Option<TaskExecution>>;

    /// 按状态查询执行记录，按 ID 升序
    async fn get_by_status(&self, status: ExecutionStatus) -> SchedulerResult<Vec<TaskExecution>>;

    /// 比较并交换执行记录
    ///
    /// 仅当存储中的当前状态属于 `from` 时，用 `execution` 的内容覆盖该行。
    /// 返回是否写入成功。
    ///
    /// # 示例
    ///
    /// ```rust,ignore
    /// execution.start(worker_id, Utc::now());
    /// let claimed = repo
    ///     .transition(&execution, &[ExecutionStatus::Queued])
    ///     .await?;
    /// if !claimed {
    ///     // 已被取消或被其他执行器抢先
    /// }
    /// ```
    async fn transition(
        &self,
        execution: &TaskExecution,
        from: &[ExecutionStatus],
    ) -> SchedulerResult<bool>;
}
