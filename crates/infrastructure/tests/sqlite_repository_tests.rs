use chrono::{Duration, Utc};
use scheduler_core::config::DatabaseConfig;
use scheduler_core::models::{
    ExecutionFilter, ExecutionStatus, Task, TaskExecution, TaskFilter, TaskStatus, TaskType,
};
use scheduler_core::traits::{ExecutionRepository, TaskRepository};
use scheduler_core::SchedulerError;
use scheduler_infrastructure::database::sqlite;
use scheduler_infrastructure::{SqliteExecutionRepository, SqliteTaskRepository};

async fn setup() -> (SqliteTaskRepository, SqliteExecutionRepository) {
    let config = DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        ..Default::default()
    };
    let pool = sqlite::connect(&config).await.unwrap();
    // 迁移可重复执行
    sqlite::run_migrations(&pool).await.unwrap();
    (
        SqliteTaskRepository::new(pool.clone()),
        SqliteExecutionRepository::new(pool),
    )
}

fn interval_task(name: &str) -> Task {
    let mut task = Task::new(name, TaskType::Interval, "5", "shell");
    task.payload = r#"{"command":"echo hi"}"#.to_string();
    task.metadata.insert("owner".to_string(), "ops".to_string());
    task
}

#[tokio::test]
async fn test_task_crud_round_trip() {
    let (tasks, _) = setup().await;
    let now = Utc::now();
    let mut task = interval_task("backup");
    task.next_run_time = Some(now);

    let created = tasks.create(&task).await.unwrap();
    assert!(created.id > 0);
    assert_eq!(created.task_type, TaskType::Interval);
    assert_eq!(created.metadata.get("owner").map(String::as_str), Some("ops"));
    assert_eq!(created.next_run_time, Some(now));

    let mut updated = created.clone();
    updated.description = "nightly backup".to_string();
    updated.max_retries = 2;
    // 定义写入不触碰状态与下次执行时间
    updated.status = TaskStatus::Cancelled;
    updated.next_run_time = None;
    tasks.update_definition(&updated).await.unwrap();

    let fetched = tasks.get_by_id(created.id).await.unwrap().unwrap();
    assert_eq!(fetched.description, "nightly backup");
    assert_eq!(fetched.max_retries, 2);
    assert_eq!(fetched.status, TaskStatus::Pending);
    assert_eq!(fetched.next_run_time, Some(now));

    tasks.delete(created.id).await.unwrap();
    assert!(tasks.get_by_id(created.id).await.unwrap().is_none());
    assert!(matches!(
        tasks.delete(created.id).await,
        Err(SchedulerError::TaskNotFound { .. })
    ));
}

#[tokio::test]
async fn test_due_tasks_and_status_compare_and_set() {
    let (tasks, _) = setup().await;
    let now = Utc::now();

    let mut due = interval_task("due");
    due.next_run_time = Some(now - Duration::seconds(1));
    let due = tasks.create(&due).await.unwrap();

    let mut later = interval_task("later");
    later.next_run_time = Some(now + Duration::seconds(60));
    tasks.create(&later).await.unwrap();

    let never = interval_task("never");
    tasks.create(&never).await.unwrap();

    let found = tasks.get_due_tasks(now).await.unwrap();
    assert_eq!(found.iter().map(|t| t.id).collect::<Vec<_>>(), vec![due.id]);

    assert!(tasks
        .compare_and_set_status(due.id, TaskStatus::Pending, TaskStatus::Running)
        .await
        .unwrap());
    assert!(!tasks
        .compare_and_set_status(due.id, TaskStatus::Pending, TaskStatus::Running)
        .await
        .unwrap());
    assert!(tasks.get_due_tasks(now).await.unwrap().is_empty());

    assert!(!tasks
        .compare_and_set_next_run_time(due.id, &[TaskStatus::Pending, TaskStatus::Paused], None)
        .await
        .unwrap());
    assert!(tasks
        .compare_and_set_next_run_time(due.id, &[TaskStatus::Running], None)
        .await
        .unwrap());
    assert!(tasks.increment_execution_count(due.id, 1, true).await.unwrap());
    assert!(tasks.increment_execution_count(due.id, 2, false).await.unwrap());
    // 同一执行重复计数被忽略
    assert!(!tasks.increment_execution_count(due.id, 2, false).await.unwrap());
    assert!(matches!(
        tasks.increment_execution_count(due.id + 100, 3, true).await,
        Err(SchedulerError::TaskNotFound { .. })
    ));
    let stored = tasks.get_by_id(due.id).await.unwrap().unwrap();
    assert_eq!(stored.next_run_time, None);
    assert_eq!(stored.execution_count, 2);
    assert_eq!(stored.success_count, 1);
    assert_eq!(stored.failed_count, 1);
}

#[tokio::test]
async fn test_task_list_filters_and_pages() {
    let (tasks, _) = setup().await;
    for i in 0..5 {
        let mut task = interval_task(&format!("job-{i}"));
        if i % 2 == 0 {
            task.status = TaskStatus::Paused;
        }
        tasks.create(&task).await.unwrap();
    }

    let (page, total) = tasks
        .list(&TaskFilter {
            limit: Some(2),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(total, 5);
    assert_eq!(page.len(), 2);
    assert!(page[0].id > page[1].id);

    let (paused, total) = tasks
        .list(&TaskFilter {
            status: Some(TaskStatus::Paused),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(total, 3);
    assert!(paused.iter().all(|t| t.status == TaskStatus::Paused));

    let (matched, total) = tasks
        .list(&TaskFilter {
            keyword: Some("job-3".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(matched[0].name, "job-3");
}

#[tokio::test]
async fn test_create_if_no_active_and_transition() {
    let (tasks, executions) = setup().await;
    let task = tasks.create(&interval_task("job")).await.unwrap();
    let now = Utc::now();

    let first = executions
        .create_if_no_active(&TaskExecution::queued(&task, now))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.status, ExecutionStatus::Queued);
    assert!(executions
        .create_if_no_active(&TaskExecution::queued(&task, now))
        .await
        .unwrap()
        .is_none());

    let active = executions.find_active_by_task(task.id).await.unwrap().unwrap();
    assert_eq!(active.id, first.id);

    let mut started = first.clone();
    started.start("node-a-0", Utc::now());
    assert!(executions
        .transition(&started, &[ExecutionStatus::Queued])
        .await
        .unwrap());
    assert!(!executions
        .transition(&started, &[ExecutionStatus::Queued])
        .await
        .unwrap());

    let mut finished = started.clone();
    finished.finish(
        ExecutionStatus::TimedOut,
        Utc::now(),
        Some(10_000),
        None,
        Some("任务执行超时 (10s)".to_string()),
    );
    assert!(executions
        .transition(&finished, &[ExecutionStatus::Executing])
        .await
        .unwrap());

    let stored = executions.get_by_id(first.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ExecutionStatus::TimedOut);
    assert_eq!(stored.duration_ms, Some(10_000));
    assert_eq!(stored.node_id.as_deref(), Some("node-a-0"));

    // 终态之后可以再次分发
    assert!(executions
        .create_if_no_active(&TaskExecution::queued(&task, now))
        .await
        .unwrap()
        .is_some());

    let (history, total) = executions
        .list(&ExecutionFilter::for_task(task.id))
        .await
        .unwrap();
    assert_eq!(total, 2);
    assert_eq!(history[0].status, ExecutionStatus::Queued);

    let timed_out = executions
        .get_by_status(ExecutionStatus::TimedOut)
        .await
        .unwrap();
    assert_eq!(timed_out.len(), 1);
}

#[tokio::test]
async fn test_deleting_task_keeps_executions() {
    let (tasks, executions) = setup().await;
    let task = tasks.create(&interval_task("job")).await.unwrap();
    let execution = executions
        .create(&TaskExecution::queued(&task, Utc::now()))
        .await
        .unwrap();

    tasks.delete(task.id).await.unwrap();
    assert!(executions.get_by_id(execution.id).await.unwrap().is_some());
}
