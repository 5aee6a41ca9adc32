//! 本节点的管理接口，供集群中其他节点的 `HttpNodeClient` 调用

use std::time::Duration;

use axum::extract::{Path, Query, State};
use serde::Deserialize;
use tracing::info;

use crate::{
    error::ApiResult,
    response::{success, success_with_message},
    routes::AppState,
};

#[derive(Debug, Deserialize)]
pub struct StopWithTasksParams {
    /// 缺省时使用配置的关闭等待时间
    pub timeout_ms: Option<u64>,
}

/// 本节点状态和正在运行的任务
pub async fn node_status(
    State(state): State<AppState>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let report = state
        .task_manager
        .execution_manager()
        .local_node_report()
        .await;
    Ok(success(report))
}

pub async fn start_scheduler(
    State(state): State<AppState>,
) -> ApiResult<impl axum::response::IntoResponse> {
    info!("收到远程请求：启动本地调度器");
    state
        .task_manager
        .execution_manager()
        .start_local_scheduler()
        .await?;
    Ok(success_with_message(true, "调度器已启动"))
}

pub async fn stop_scheduler(
    State(state): State<AppState>,
) -> ApiResult<impl axum::response::IntoResponse> {
    info!("收到远程请求：暂停本地调度器");
    state
        .task_manager
        .execution_manager()
        .stop_local_scheduler()
        .await?;
    Ok(success_with_message(true, "调度器已暂停"))
}

/// 暂停调度器并停止本地任务；`data` 表示任务是否在超时内全部停止
pub async fn stop_scheduler_and_tasks(
    State(state): State<AppState>,
    Query(params): Query<StopWithTasksParams>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let timeout = params
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| state.task_manager.config().scheduler.wait_on_shutdown());
    info!("收到远程请求：暂停调度器并停止任务，等待 {:?}", timeout);
    let stopped = state
        .task_manager
        .execution_manager()
        .stop_scheduler_and_tasks_locally(Some(timeout))
        .await?;
    Ok(success(stopped))
}

/// 通知本地任务停止，不等待；`data` 表示任务是否在本节点运行
pub async fn stop_task(
    State(state): State<AppState>,
    Path(oid): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let found = state
        .task_manager
        .execution_manager()
        .stop_local_task(&oid)
        .await;
    Ok(success(found))
}
