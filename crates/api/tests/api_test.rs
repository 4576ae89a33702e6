use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use scheduler_api::{create_app, AppState};
use scheduler_core::config::{ApiConfig, DispatcherConfig, WorkerConfig};
use scheduler_dispatcher::SchedulingEngine;
use scheduler_infrastructure::{InMemoryStore, MetricsCollector};

fn setup() -> (InMemoryStore, SchedulingEngine, Router) {
    let store = InMemoryStore::new();
    let engine = SchedulingEngine::new(
        store.tasks.clone(),
        store.executions.clone(),
        &DispatcherConfig::default(),
        &WorkerConfig::default(),
        MetricsCollector::new(),
    );
    let app = create_app(AppState::from_engine(&engine), &ApiConfig::default());
    (store, engine, app)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn create_interval_task(app: &Router, name: &str) -> i64 {
    let (status, json) = send(
        app,
        "POST",
        "/api/tasks",
        Some(json!({
            "name": name,
            "task_type": "INTERVAL",
            "schedule": "60",
            "handler": "shell",
            "payload": {"command": "echo", "args": ["hi"]}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{json}");
    json["data"]["id"].as_i64().unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let (_, _, app) = setup();
    let (status, json) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["scheduler"]["queue_depth"], 0);
    assert_eq!(json["tasks"]["pending"], 0);
}

#[tokio::test]
async fn test_health_reports_store_outage() {
    let (store, _, app) = setup();
    store.set_available(false);

    let (status, json) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["status"], "unavailable");
}

#[tokio::test]
async fn test_create_and_get_task() {
    let (_, _, app) = setup();
    let id = create_interval_task(&app, "heartbeat").await;

    let (status, json) = send(&app, "GET", &format!("/api/tasks/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["success"].as_bool().unwrap());
    assert_eq!(json["data"]["name"], "heartbeat");
    assert_eq!(json["data"]["status"], "PENDING");
    let payload: Value = serde_json::from_str(json["data"]["payload"].as_str().unwrap()).unwrap();
    assert_eq!(payload, json!({"command": "echo", "args": ["hi"]}));
    assert!(json["data"]["next_run_time"].is_string());
    assert!(json["timestamp"].is_string());
}

#[tokio::test]
async fn test_invalid_schedule_is_bad_request() {
    let (_, _, app) = setup();
    let (status, json) = send(
        &app,
        "POST",
        "/api/tasks",
        Some(json!({
            "name": "broken",
            "task_type": "CRON",
            "schedule": "99 * * * *",
            "handler": "shell"
        })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);
    assert_eq!(json["error"]["type"], "INVALID_SCHEDULE");
}

#[tokio::test]
async fn test_missing_resources_are_not_found() {
    let (_, _, app) = setup();

    let (status, json) = send(&app, "GET", "/api/tasks/404", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["type"], "TASK_NOT_FOUND");

    let (status, _) = send(&app, "GET", "/api/executions/404", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "POST", "/api/executions/404/cancel", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "GET", "/api/tasks/404/executions", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_update_and_delete_task() {
    let (_, _, app) = setup();
    let id = create_interval_task(&app, "report").await;

    let (status, json) = send(
        &app,
        "PUT",
        &format!("/api/tasks/{id}"),
        Some(json!({"schedule": "120", "max_retries": 2})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["schedule"], "120");
    assert_eq!(json["data"]["max_retries"], 2);

    let (status, _) = send(&app, "DELETE", &format!("/api/tasks/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, "GET", &format!("/api/tasks/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_pause_resume_conflicts() {
    let (_, _, app) = setup();
    let id = create_interval_task(&app, "sync").await;

    let (status, json) = send(&app, "POST", &format!("/api/tasks/{id}/pause"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["status"], "PAUSED");

    let (status, json) = send(&app, "POST", &format!("/api/tasks/{id}/pause"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"]["type"], "INVALID_STATUS_TRANSITION");

    let (status, json) = send(&app, "POST", &format!("/api/tasks/{id}/resume"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["status"], "PENDING");
}

#[tokio::test]
async fn test_execute_now_and_cancel_execution() {
    let (_, engine, app) = setup();
    let id = create_interval_task(&app, "manual").await;

    let (status, json) = send(
        &app,
        "POST",
        &format!("/api/tasks/{id}/execute"),
        Some(json!({"payload": "override"})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["data"]["status"], "QUEUED");
    assert_eq!(json["data"]["payload"], "override");
    let execution_id = json["data"]["id"].as_i64().unwrap();
    assert!(engine.queue.contains(id));

    // 已有活跃执行时再次触发返回冲突，空请求体也可接受
    let (status, json) = send(&app, "POST", &format!("/api/tasks/{id}/execute"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"]["type"], "DISPATCH_CONFLICT");

    let (status, json) = send(
        &app,
        "POST",
        &format!("/api/executions/{execution_id}/cancel"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["status"], "CANCELLED");
    assert!(engine.queue.is_empty());

    let (status, json) = send(
        &app,
        "GET",
        &format!("/api/tasks/{id}/executions?status=CANCELLED"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["total"], 1);
    assert_eq!(json["data"]["items"][0]["id"], execution_id);
}

#[tokio::test]
async fn test_cancel_task_is_idempotent() {
    let (_, _, app) = setup();
    let id = create_interval_task(&app, "cleanup").await;

    for _ in 0..2 {
        let (status, json) = send(&app, "POST", &format!("/api/tasks/{id}/cancel"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["status"], "CANCELLED");
    }
}

#[tokio::test]
async fn test_list_tasks_with_filters() {
    let (_, _, app) = setup();
    for name in ["alpha", "beta", "gamma"] {
        create_interval_task(&app, name).await;
    }

    let (status, json) = send(&app, "GET", "/api/tasks?status=PENDING&page_size=2", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["total"], 3);
    assert_eq!(json["data"]["items"].as_array().unwrap().len(), 2);
    assert_eq!(json["data"]["total_pages"], 2);

    let (_, json) = send(&app, "GET", "/api/tasks?keyword=bet", None).await;
    assert_eq!(json["data"]["total"], 1);
    assert_eq!(json["data"]["items"][0]["name"], "beta");

    let (status, json) = send(&app, "GET", "/api/tasks?status=SLEEPING", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["type"], "BAD_REQUEST");

    let (status, _) = send(&app, "GET", "/api/executions?status=DONE", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_cors_preflight_allows_any_origin() {
    let (_, _, app) = setup();
    let request = Request::builder()
        .method("OPTIONS")
        .uri("/api/tasks")
        .header("origin", "http://dashboard.local")
        .header("access-control-request-method", "POST")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "*"
    );
    let methods = response.headers()["access-control-allow-methods"]
        .to_str()
        .unwrap();
    assert!(methods.contains("POST"));
}
