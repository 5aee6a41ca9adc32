use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use taskmanager_engine::TaskManager;

use crate::handlers::{
    health::health_check,
    metrics::prometheus_metrics,
    node::{node_status, start_scheduler, stop_scheduler, stop_scheduler_and_tasks, stop_task},
    nodes::list_nodes,
    tasks::{
        cleanup_tasks, get_task, list_tasks, resume_task, run_task_now, suspend_and_delete_tasks,
        suspend_task,
    },
};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub task_manager: Arc<TaskManager>,
    /// 未安装 Prometheus recorder 时为空，`/metrics` 返回 404
    pub prometheus: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(task_manager: Arc<TaskManager>) -> Self {
        Self {
            task_manager,
            prometheus: None,
        }
    }

    pub fn with_prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }
}

/// 创建API路由
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        // 健康检查
        .route("/health", get(health_check))
        .route("/metrics", get(prometheus_metrics))
        // 节点管理接口，由其他节点调用
        .route("/api/node/status", get(node_status))
        .route("/api/node/scheduler/start", post(start_scheduler))
        .route("/api/node/scheduler/stop", post(stop_scheduler))
        .route(
            "/api/node/scheduler/stop-with-tasks",
            post(stop_scheduler_and_tasks),
        )
        .route("/api/node/tasks/{oid}/stop", post(stop_task))
        // 任务管理
        .route("/api/tasks", get(list_tasks))
        .route("/api/tasks/suspend-and-delete", post(suspend_and_delete_tasks))
        .route("/api/tasks/cleanup", post(cleanup_tasks))
        .route("/api/tasks/{oid}", get(get_task))
        .route("/api/tasks/{oid}/suspend", post(suspend_task))
        .route("/api/tasks/{oid}/resume", post(resume_task))
        .route("/api/tasks/{oid}/run-now", post(run_task_now))
        // 集群节点
        .route("/api/nodes", get(list_nodes))
        .with_state(state)
}
