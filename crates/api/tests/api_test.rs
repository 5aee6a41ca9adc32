use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use taskmanager_api::{create_app, AppState};
use taskmanager_domain::{NodeClient, NodeObject, OperationResult, TaskExecutionStatus};
use taskmanager_infrastructure::HttpNodeClient;
use taskmanager_testing_utils::{BlockingHandler, TaskObjectBuilder, TestEnv, TestTaskManager};

async fn initialized() -> TestTaskManager {
    let env = TestTaskManager::new("node-1");
    let mut result = OperationResult::new("init");
    env.manager.init(&mut result).await.unwrap();
    env
}

fn app(env: &TestTaskManager) -> Router {
    create_app(AppState::new(env.manager.clone()))
}

async fn send(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_health_reports_node() {
    let env = initialized().await;
    let (status, body) = send(app(&env), "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["node"], "node-1");
    assert_eq!(body["schedulerRunning"], false);
}

#[tokio::test]
async fn test_list_and_get_tasks() {
    let env = initialized().await;
    let oid = env.add(TaskObjectBuilder::new("first").build()).await;
    env.add(TaskObjectBuilder::new("second").suspended().build())
        .await;

    let (status, body) = send(app(&env), "GET", "/api/tasks", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["total"], 2);

    let (status, body) = send(app(&env), "GET", "/api/tasks?status=suspended", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["items"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"]["items"][0]["name"], "second");

    let (status, body) = send(app(&env), "GET", &format!("/api/tasks/{oid}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["oid"], oid.as_str());
    assert_eq!(body["data"]["name"], "first");
}

#[tokio::test]
async fn test_missing_task_returns_not_found_envelope() {
    let env = initialized().await;
    let (status, body) = send(app(&env), "GET", "/api/tasks/no-such-task", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["type"], "NOT_FOUND");
}

#[tokio::test]
async fn test_invalid_status_filter_is_bad_request() {
    let env = initialized().await;
    let (status, _) = send(app(&env), "GET", "/api/tasks?status=sleeping", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_suspend_resume_and_run_now() {
    let env = initialized().await;
    let oid = env
        .add(TaskObjectBuilder::new("recurring").recurring_every(60).build())
        .await;

    let (status, _) = send(app(&env), "POST", &format!("/api/tasks/{oid}/resume"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(
        app(&env),
        "POST",
        &format!("/api/tasks/{oid}/suspend?timeout_ms=0"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["stopped"], true);
    assert_eq!(env.get(&oid).await.execution_status, TaskExecutionStatus::Suspended);

    let (status, _) = send(app(&env), "POST", &format!("/api/tasks/{oid}/run-now"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(app(&env), "POST", &format!("/api/tasks/{oid}/resume"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(env.get(&oid).await.execution_status, TaskExecutionStatus::Runnable);

    let (status, _) = send(app(&env), "POST", &format!("/api/tasks/{oid}/run-now"), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_suspend_and_delete_endpoint() {
    let env = initialized().await;
    let parent = env.add(TaskObjectBuilder::new("parent").build()).await;
    env.add(TaskObjectBuilder::new("child").with_parent("test-parent").build())
        .await;

    let (status, body) = send(
        app(&env),
        "POST",
        "/api/tasks/suspend-and-delete",
        Some(json!({ "oids": [parent], "timeout_ms": 0, "also_subtasks": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "SUCCESS");

    let (_, body) = send(app(&env), "GET", "/api/tasks", None).await;
    assert_eq!(body["data"]["total"], 0);

    let (status, _) = send(
        app(&env),
        "POST",
        "/api/tasks/suspend-and-delete",
        Some(json!({ "oids": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_cleanup_endpoint_returns_summary() {
    let env = initialized().await;
    env.add(TaskObjectBuilder::new("old").closed_days_ago(10).build())
        .await;
    env.add(TaskObjectBuilder::new("recent").closed_days_ago(1).build())
        .await;

    let (status, body) = send(
        app(&env),
        "POST",
        "/api/tasks/cleanup",
        Some(json!({ "max_age_seconds": 5 * 24 * 3600 })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["deleted"], 1);
    assert_eq!(body["data"]["problems"], 0);
    assert_eq!(body["data"]["interrupted"], false);
}

#[tokio::test]
async fn test_node_endpoints() {
    let env = initialized().await;

    let (status, body) = send(app(&env), "GET", "/api/node/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["node"]["node_identifier"], "node-1");
    assert_eq!(body["data"]["node"]["execution_status"], "PAUSED");

    let (status, _) = send(app(&env), "POST", "/api/node/scheduler/start", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(env.manager.is_running().await);

    let (status, body) = send(
        app(&env),
        "POST",
        "/api/node/scheduler/stop-with-tasks?timeout_ms=100",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], true);
    assert!(!env.manager.is_running().await);

    let (status, body) = send(app(&env), "POST", "/api/node/tasks/unknown/stop", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], false);

    let (status, body) = send(app(&env), "GET", "/api/nodes", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 1);
}

#[tokio::test]
async fn test_metrics_disabled_without_recorder() {
    let env = initialized().await;
    let response = app(&env)
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_http_node_client_against_management_api() {
    let env = TestTaskManager::started("node-remote").await;
    let handler = BlockingHandler::new();
    env.manager
        .register_handler("http://example.com/handlers/blocking", handler.clone());
    let oid = env
        .add(
            TaskObjectBuilder::new("blocking")
                .with_handler("http://example.com/handlers/blocking")
                .build(),
        )
        .await;
    assert!(TestEnv::wait_for(|| async { handler.has_started() }, Duration::from_secs(5)).await);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let server_app = app(&env);
    tokio::spawn(async move {
        axum::serve(listener, server_app).await.unwrap();
    });

    let mut node = NodeObject::new("node-remote", "remote.local");
    node.management_url = Some(format!("http://{address}"));
    let client = HttpNodeClient::new(Duration::from_secs(2)).unwrap();

    let report = client.node_status(&node).await.unwrap();
    assert_eq!(report.node.node_identifier, "node-remote");
    assert_eq!(report.running_tasks.len(), 1);
    assert_eq!(report.running_tasks[0].oid, oid);

    client.stop_task(&node, &oid).await.unwrap();
    assert!(TestEnv::wait_for(|| async { handler.has_stopped() }, Duration::from_secs(5)).await);

    let stopped = client
        .stop_scheduler_and_tasks(&node, Duration::from_millis(500))
        .await
        .unwrap();
    assert!(stopped);
    assert!(!env.manager.is_running().await);

    client.start_scheduler(&node).await.unwrap();
    assert!(env.manager.is_running().await);

    env.shutdown().await;
}
