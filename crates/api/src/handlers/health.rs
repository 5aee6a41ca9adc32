use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::routes::AppState;

pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let manager = &state.task_manager;
    Json(json!({
        "status": if manager.is_in_error_state().await { "error" } else { "ok" },
        "node": manager.node_id(),
        "schedulerRunning": manager.is_running().await,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "service": "taskmanager",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
