use std::time::Duration;

use axum::extract::Query;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use taskmanager_domain::{NodeClient, NodeObject, NodeStatusReport, RunningTaskInfo};
use taskmanager_errors::TaskManagerError;
use taskmanager_infrastructure::HttpNodeClient;

async fn spawn_management_server() -> String {
    async fn status() -> Json<Value> {
        let mut node = NodeObject::new("remote", "remote-host");
        node.execution_status = Some(taskmanager_domain::NodeExecutionStatus::Running);
        let report = NodeStatusReport {
            node,
            running_tasks: vec![RunningTaskInfo {
                oid: "task-1".to_string(),
                task_identifier: "1-0-1".to_string(),
                started_at: Utc::now(),
            }],
        };
        Json(json!({ "success": true, "data": report, "message": null }))
    }

    async fn stop_with_tasks(Query(params): Query<std::collections::HashMap<String, String>>) -> Json<Value> {
        let stopped = params.get("timeout_ms").map(|t| t != "0").unwrap_or(false);
        Json(json!({ "success": true, "data": stopped }))
    }

    async fn refuse() -> Json<Value> {
        Json(json!({ "success": false, "data": null, "message": "节点处于错误状态" }))
    }

    let app = Router::new()
        .route("/api/node/status", get(status))
        .route("/api/node/scheduler/stop-with-tasks", post(stop_with_tasks))
        .route("/api/node/scheduler/start", post(refuse))
        .route("/api/node/tasks/{oid}/stop", post(|| async { Json(json!({ "success": true })) }));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn remote(url: Option<String>) -> NodeObject {
    let mut node = NodeObject::new("remote", "remote-host");
    node.management_url = url;
    node
}

#[tokio::test]
async fn test_node_status_and_commands() {
    let base = spawn_management_server().await;
    let client = HttpNodeClient::new(Duration::from_secs(2)).unwrap();
    let node = remote(Some(base));

    let report = client.node_status(&node).await.unwrap();
    assert_eq!(report.node.node_identifier, "remote");
    assert_eq!(report.running_tasks.len(), 1);

    assert!(client
        .stop_scheduler_and_tasks(&node, Duration::from_millis(500))
        .await
        .unwrap());
    client.stop_task(&node, "task-1").await.unwrap();

    let refused = client.start_scheduler(&node).await.unwrap_err();
    assert!(matches!(refused, TaskManagerError::Communication { .. }));
}

#[tokio::test]
async fn test_unreachable_node_is_communication_error() {
    let client = HttpNodeClient::new(Duration::from_millis(300)).unwrap();

    let no_url = client.node_status(&remote(None)).await.unwrap_err();
    assert!(matches!(no_url, TaskManagerError::Communication { .. }));

    let unreachable = client
        .node_status(&remote(Some("http://127.0.0.1:1".to_string())))
        .await
        .unwrap_err();
    assert!(matches!(unreachable, TaskManagerError::Communication { .. }));
    assert!(unreachable.is_retryable());
}
