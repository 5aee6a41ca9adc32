use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use taskmanager_domain::{GetOptions, OperationResult, TaskExecutionStatus, TaskFilter};
use taskmanager_engine::{CleanupPolicy, StopWait};

use crate::{
    error::{ApiError, ApiResult},
    response::{success, success_with_message, ListResponse},
    routes::AppState,
};

/// 任务查询参数
#[derive(Debug, Default, Deserialize)]
pub struct TaskQueryParams {
    /// RUNNABLE / WAITING / SUSPENDED / CLOSED
    pub status: Option<String>,
    pub handler_uri: Option<String>,
    pub category: Option<String>,
    pub name: Option<String>,
    /// 只返回根任务
    #[serde(default)]
    pub roots: bool,
    pub parent: Option<String>,
    #[serde(default)]
    pub no_fetch: bool,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

impl TaskQueryParams {
    fn to_filter(&self) -> ApiResult<TaskFilter> {
        let mut filter = TaskFilter::all();
        if let Some(status) = &self.status {
            let status = TaskExecutionStatus::parse(&status.to_uppercase())
                .ok_or_else(|| ApiError::BadRequest(format!("未知的任务状态: {status}")))?;
            filter = filter.with_status(status);
        }
        if let Some(uri) = &self.handler_uri {
            filter = filter.with_handler_uri(uri.clone());
        }
        filter.category = self.category.clone();
        filter.name_contains = self.name.clone();
        match (&self.parent, self.roots) {
            (Some(_), true) => {
                return Err(ApiError::BadRequest("roots 与 parent 不能同时使用".to_string()))
            }
            (Some(parent), false) => filter = filter.children_of(parent.clone()),
            (None, true) => filter = filter.roots(),
            (None, false) => {}
        }
        filter.offset = self.offset;
        filter.limit = self.limit;
        Ok(filter)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StopParams {
    /// 等待任务停止的毫秒数；0 表示不等待
    pub timeout_ms: Option<u64>,
}

/// 挂起并删除请求
#[derive(Debug, Deserialize)]
pub struct SuspendAndDeleteRequest {
    pub oids: Vec<String>,
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub also_subtasks: bool,
}

#[derive(Debug, Serialize)]
pub struct SuspendResponse {
    pub stopped: bool,
    pub result: OperationResult,
}

/// 获取任务列表
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(params): Query<TaskQueryParams>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let filter = params.to_filter()?;
    let options = GetOptions {
        no_fetch: params.no_fetch,
        retrieve_next_run_start_time: false,
    };
    let mut result = OperationResult::new("listTasks");
    let manager = &state.task_manager;

    let mut count_filter = filter.clone();
    count_filter.offset = None;
    count_filter.limit = None;
    let total = manager.count_tasks(&count_filter, &mut result).await?;
    let tasks = manager.search_tasks(&filter, options, &mut result).await?;
    Ok(success(ListResponse::new(tasks, total)))
}

/// 获取单个任务，包含实际执行节点和下次运行时间
pub async fn get_task(
    State(state): State<AppState>,
    Path(oid): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let mut result = OperationResult::new("getTask");
    let task = state
        .task_manager
        .get_task_object(&oid, GetOptions::with_next_run_start_time(), &mut result)
        .await?;
    Ok(success(task))
}

/// 挂起任务；`stopped` 表示任务是否在等待时间内停止运行
pub async fn suspend_task(
    State(state): State<AppState>,
    Path(oid): Path<String>,
    Query(params): Query<StopParams>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let timeout = params
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| state.task_manager.config().scheduler.wait_on_shutdown());
    let mut result = OperationResult::new("suspendTask");
    let stopped = state
        .task_manager
        .suspend_task(&oid, StopWait::from_timeout(Some(timeout)), &mut result)
        .await?;
    result.compute_status();
    Ok(success(SuspendResponse { stopped, result }))
}

pub async fn resume_task(
    State(state): State<AppState>,
    Path(oid): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let mut result = OperationResult::new("resumeTask");
    state.task_manager.resume_task(&oid, &mut result).await?;
    result.compute_status();
    Ok(success_with_message(result, format!("任务 {oid} 已恢复")))
}

/// 立即运行；已关闭的任务重新打开
pub async fn run_task_now(
    State(state): State<AppState>,
    Path(oid): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let mut result = OperationResult::new("scheduleTaskNow");
    state.task_manager.schedule_task_now(&oid, &mut result).await?;
    result.compute_status();
    Ok(success_with_message(result, format!("任务 {oid} 已安排立即运行")))
}

/// 批量挂起并删除；逐个任务的结果在返回的操作结果中
pub async fn suspend_and_delete_tasks(
    State(state): State<AppState>,
    Json(request): Json<SuspendAndDeleteRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    if request.oids.is_empty() {
        return Err(ApiError::BadRequest("oids 不能为空".to_string()));
    }
    let mut result = OperationResult::new("suspendAndDeleteTasks");
    state
        .task_manager
        .suspend_and_delete_tasks(
            &request.oids,
            request.timeout_ms.map(Duration::from_millis),
            request.also_subtasks,
            &mut result,
        )
        .await;
    result.compute_status();
    Ok(success(result))
}

/// 按策略清理已关闭的任务
pub async fn cleanup_tasks(
    State(state): State<AppState>,
    Json(policy): Json<CleanupPolicy>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let mut result = OperationResult::new("cleanupTasks");
    let summary = state
        .task_manager
        .cleanup_tasks(&policy, None, &mut result)
        .await?;
    Ok(success(summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskmanager_domain::ParentFilter;

    #[test]
    fn test_query_params_build_filter() {
        let params = TaskQueryParams {
            status: Some("suspended".to_string()),
            roots: true,
            limit: Some(10),
            ..Default::default()
        };
        let filter = params.to_filter().unwrap();
        assert_eq!(filter.execution_status, Some(TaskExecutionStatus::Suspended));
        assert_eq!(filter.parent, ParentFilter::Root);
        assert_eq!(filter.limit, Some(10));
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let params = TaskQueryParams {
            status: Some("sleeping".to_string()),
            ..Default::default()
        };
        assert!(matches!(params.to_filter(), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn test_roots_and_parent_conflict() {
        let params = TaskQueryParams {
            roots: true,
            parent: Some("p".to_string()),
            ..Default::default()
        };
        assert!(params.to_filter().is_err());
    }
}
