//! # Task Manager API
//!
//! 任务管理器的 HTTP 管理接口，基于 Axum 构建。
//!
//! ## API 端点
//!
//! ### 节点管理（集群内其他节点调用）
//! - `GET /api/node/status` - 本节点状态与正在运行的任务
//! - `POST /api/node/scheduler/start` - 启动本地调度器
//! - `POST /api/node/scheduler/stop` - 暂停本地调度器
//! - `POST /api/node/scheduler/stop-with-tasks?timeout_ms=` - 暂停调度器并停止本地任务
//! - `POST /api/node/tasks/{oid}/stop` - 通知本地任务停止
//!
//! ### 任务管理
//! - `GET /api/tasks` - 任务列表
//! - `GET /api/tasks/{oid}` - 任务详情
//! - `POST /api/tasks/{oid}/suspend` - 挂起任务
//! - `POST /api/tasks/{oid}/resume` - 恢复任务
//! - `POST /api/tasks/{oid}/run-now` - 立即运行
//! - `POST /api/tasks/suspend-and-delete` - 批量挂起并删除
//! - `POST /api/tasks/cleanup` - 清理过期任务
//!
//! ### 集群与监控
//! - `GET /api/nodes` - 集群节点
//! - `GET /health` - 健康检查
//! - `GET /metrics` - Prometheus 指标
//!
//! 所有 JSON 响应使用 `{success, data, message}` 信封。

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

use axum::Router;
use tower::ServiceBuilder;

use middleware::{cors_layer, request_logging, trace_layer};
pub use routes::{create_routes, AppState};

/// 创建带日志、追踪和 CORS 中间件的完整应用
pub fn create_app(state: AppState) -> Router {
    create_routes(state).layer(
        ServiceBuilder::new()
            .layer(trace_layer())
            .layer(cors_layer())
            .layer(axum::middleware::from_fn(request_logging)),
    )
}
