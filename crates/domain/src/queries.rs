//! 类型化查询与修改增量
//!
//! 仓储实现既可以把过滤条件下推到 SQL，也可以直接在内存中用 `matches` 判断。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use taskmanager_errors::{TaskManagerError, TaskManagerResult};

use crate::entities::{
    NodeErrorStatus, NodeObject, ScheduleSpec, TaskExecutionStatus, TaskObject, TaskRecurrence,
    TaskWaitingReason,
};
use crate::operation_result::OperationResult;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParentFilter {
    #[default]
    Any,
    /// 只要根任务（没有父任务）
    Root,
    /// 指定父任务 identifier 的直接子任务
    Of(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskFilter {
    pub execution_status: Option<TaskExecutionStatus>,
    pub waiting_reason: Option<TaskWaitingReason>,
    #[serde(default)]
    pub parent: ParentFilter,
    pub completed_before: Option<DateTime<Utc>>,
    pub task_identifier: Option<String>,
    pub handler_uri: Option<String>,
    pub category: Option<String>,
    /// 依赖方列表中包含该 identifier
    pub has_dependent: Option<String>,
    pub name_contains: Option<String>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

impl TaskFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: TaskExecutionStatus) -> Self {
        self.execution_status = Some(status);
        self
    }

    pub fn with_waiting_reason(mut self, reason: TaskWaitingReason) -> Self {
        self.waiting_reason = Some(reason);
        self
    }

    pub fn roots(mut self) -> Self {
        self.parent = ParentFilter::Root;
        self
    }

    pub fn children_of<S: Into<String>>(mut self, identifier: S) -> Self {
        self.parent = ParentFilter::Of(identifier.into());
        self
    }

    pub fn completed_before(mut self, cutoff: DateTime<Utc>) -> Self {
        self.completed_before = Some(cutoff);
        self
    }

    pub fn with_identifier<S: Into<String>>(mut self, identifier: S) -> Self {
        self.task_identifier = Some(identifier.into());
        self
    }

    pub fn with_handler_uri<S: Into<String>>(mut self, uri: S) -> Self {
        self.handler_uri = Some(uri.into());
        self
    }

    pub fn with_dependent<S: Into<String>>(mut self, identifier: S) -> Self {
        self.has_dependent = Some(identifier.into());
        self
    }

    pub fn paged(mut self, offset: usize, limit: usize) -> Self {
        self.offset = Some(offset);
        self.limit = Some(limit);
        self
    }

    /// 判断任务是否满足过滤条件（不考虑分页）
    pub fn matches(&self, task: &TaskObject) -> bool {
        if let Some(status) = self.execution_status {
            if task.execution_status != status {
                return false;
            }
        }
        if let Some(reason) = self.waiting_reason {
            if task.waiting_reason != Some(reason) {
                return false;
            }
        }
        match &self.parent {
            ParentFilter::Any => {}
            ParentFilter::Root => {
                if task.parent.is_some() {
                    return false;
                }
            }
            ParentFilter::Of(parent) => {
                if task.parent.as_deref() != Some(parent.as_str()) {
                    return false;
                }
            }
        }
        if let Some(cutoff) = self.completed_before {
            match task.completion_timestamp {
                Some(ts) if ts < cutoff => {}
                _ => return false,
            }
        }
        if let Some(identifier) = &self.task_identifier {
            if &task.task_identifier != identifier {
                return false;
            }
        }
        if let Some(uri) = &self.handler_uri {
            if task.handler_uri.as_ref() != Some(uri) {
                return false;
            }
        }
        if let Some(category) = &self.category {
            if task.category.as_ref() != Some(category) {
                return false;
            }
        }
        if let Some(dependent) = &self.has_dependent {
            if !task.dependents.iter().any(|d| d == dependent) {
                return false;
            }
        }
        if let Some(fragment) = &self.name_contains {
            if !task.name.to_lowercase().contains(&fragment.to_lowercase()) {
                return false;
            }
        }
        true
    }

    /// 对已排序的结果应用 offset/limit
    pub fn page<T>(&self, items: Vec<T>) -> Vec<T> {
        let offset = self.offset.unwrap_or(0);
        let iter = items.into_iter().skip(offset);
        match self.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFilter {
    pub node_identifier: Option<String>,
    pub running: Option<bool>,
}

impl NodeFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_identifier<S: Into<String>>(identifier: S) -> Self {
        Self {
            node_identifier: Some(identifier.into()),
            running: None,
        }
    }

    pub fn matches(&self, node: &NodeObject) -> bool {
        if let Some(identifier) = &self.node_identifier {
            if &node.node_identifier != identifier {
                return false;
            }
        }
        if let Some(running) = self.running {
            if node.running != running {
                return false;
            }
        }
        true
    }
}

/// 查询选项
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetOptions {
    /// 不查询集群实时状态，只返回仓储中的数据
    #[serde(default)]
    pub no_fetch: bool,
    #[serde(default)]
    pub retrieve_next_run_start_time: bool,
}

impl GetOptions {
    pub fn no_fetch() -> Self {
        Self {
            no_fetch: true,
            retrieve_next_run_start_time: false,
        }
    }

    pub fn with_next_run_start_time() -> Self {
        Self {
            no_fetch: false,
            retrieve_next_run_start_time: true,
        }
    }
}

/// 任务修改增量
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskModification {
    ExecutionStatus(TaskExecutionStatus),
    WaitingReason(Option<TaskWaitingReason>),
    CompletionTimestamp(Option<DateTime<Utc>>),
    Node(Option<String>),
    Name(String),
    Category(Option<String>),
    HandlerUri(Option<String>),
    Schedule(Option<ScheduleSpec>),
    Recurrence(TaskRecurrence),
    Parent(Option<String>),
    Result(Option<OperationResult>),
    Progress(u64),
    LastRunStartTimestamp(Option<DateTime<Utc>>),
    LastRunFinishTimestamp(Option<DateTime<Utc>>),
    Extension(serde_json::Value),
    AddDependent(String),
    RemoveDependent(String),
}

impl TaskModification {
    /// 修改是否影响调度触发器
    pub fn affects_scheduling(&self) -> bool {
        matches!(
            self,
            TaskModification::ExecutionStatus(_)
                | TaskModification::Schedule(_)
                | TaskModification::Recurrence(_)
        )
    }
}

/// 在任务副本上应用增量并校验，成功后才写回
pub fn apply_task_modifications(
    task: &mut TaskObject,
    modifications: &[TaskModification],
) -> TaskManagerResult<()> {
    let mut updated = task.clone();
    let mut waiting_reason_set = false;
    for modification in modifications {
        match modification {
            TaskModification::ExecutionStatus(status) => updated.execution_status = *status,
            TaskModification::WaitingReason(reason) => {
                waiting_reason_set = reason.is_some();
                updated.waiting_reason = *reason;
            }
            TaskModification::CompletionTimestamp(ts) => updated.completion_timestamp = *ts,
            TaskModification::Node(node) => updated.node = node.clone(),
            TaskModification::Name(name) => {
                if name.trim().is_empty() {
                    return Err(TaskManagerError::schema("任务名称不能为空"));
                }
                updated.name = name.clone();
            }
            TaskModification::Category(category) => updated.category = category.clone(),
            TaskModification::HandlerUri(uri) => updated.handler_uri = uri.clone(),
            TaskModification::Schedule(schedule) => {
                if let Some(schedule) = schedule {
                    validate_schedule(schedule)?;
                }
                updated.schedule = schedule.clone();
            }
            TaskModification::Recurrence(recurrence) => updated.recurrence = *recurrence,
            TaskModification::Parent(parent) => {
                if parent.as_deref() == Some(updated.task_identifier.as_str()) {
                    return Err(TaskManagerError::schema("任务不能是自己的父任务"));
                }
                updated.parent = parent.clone();
            }
            TaskModification::Result(result) => updated.result = result.clone(),
            TaskModification::Progress(progress) => updated.progress = *progress,
            TaskModification::LastRunStartTimestamp(ts) => updated.last_run_start_timestamp = *ts,
            TaskModification::LastRunFinishTimestamp(ts) => {
                updated.last_run_finish_timestamp = *ts
            }
            TaskModification::Extension(value) => updated.extension = value.clone(),
            TaskModification::AddDependent(identifier) => {
                if !updated.dependents.contains(identifier) {
                    updated.dependents.push(identifier.clone());
                }
            }
            TaskModification::RemoveDependent(identifier) => {
                updated.dependents.retain(|d| d != identifier);
            }
        }
    }

    if waiting_reason_set && updated.execution_status != TaskExecutionStatus::Waiting {
        return Err(TaskManagerError::schema(format!(
            "等待原因只能设置在 WAITING 状态的任务上，当前状态: {}",
            updated.execution_status
        )));
    }

    *task = updated;
    Ok(())
}

pub fn validate_schedule(schedule: &ScheduleSpec) -> TaskManagerResult<()> {
    match (schedule.interval_seconds, &schedule.cron) {
        (Some(_), Some(_)) => Err(TaskManagerError::schema(
            "调度规则不能同时指定间隔和 cron 表达式",
        )),
        (Some(0), None) => Err(TaskManagerError::schema("调度间隔必须大于 0")),
        (None, Some(expr)) if expr.trim().is_empty() => {
            Err(TaskManagerError::schema("cron 表达式不能为空"))
        }
        _ => Ok(()),
    }
}

/// 节点修改增量
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeModification {
    Running(bool),
    LastCheckInTime(Option<DateTime<Utc>>),
    ErrorStatus(NodeErrorStatus),
    ManagementUrl(Option<String>),
    Hostname(String),
    Clustered(bool),
}

pub fn apply_node_modifications(
    node: &mut NodeObject,
    modifications: &[NodeModification],
) -> TaskManagerResult<()> {
    let mut updated = node.clone();
    for modification in modifications {
        match modification {
            NodeModification::Running(running) => updated.running = *running,
            NodeModification::LastCheckInTime(ts) => updated.last_check_in_time = *ts,
            NodeModification::ErrorStatus(status) => updated.error_status = *status,
            NodeModification::ManagementUrl(url) => updated.management_url = url.clone(),
            NodeModification::Hostname(hostname) => {
                if hostname.trim().is_empty() {
                    return Err(TaskManagerError::schema("节点主机名不能为空"));
                }
                updated.hostname = hostname.clone();
            }
            NodeModification::Clustered(clustered) => updated.clustered = *clustered,
        }
    }
    *node = updated;
    Ok(())
}
