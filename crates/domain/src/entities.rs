use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::operation_result::OperationResult;

/// 任务执行状态
///
/// RUNNING 不是独立的持久化状态，而是叠加在 RUNNABLE 上、通过集群状态观察到的运行期属性。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskExecutionStatus {
    #[serde(rename = "RUNNABLE")]
    Runnable,
    #[serde(rename = "WAITING")]
    Waiting,
    #[serde(rename = "SUSPENDED")]
    Suspended,
    #[serde(rename = "CLOSED")]
    Closed,
}

impl TaskExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskExecutionStatus::Runnable => "RUNNABLE",
            TaskExecutionStatus::Waiting => "WAITING",
            TaskExecutionStatus::Suspended => "SUSPENDED",
            TaskExecutionStatus::Closed => "CLOSED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "RUNNABLE" => Some(TaskExecutionStatus::Runnable),
            "WAITING" => Some(TaskExecutionStatus::Waiting),
            "SUSPENDED" => Some(TaskExecutionStatus::Suspended),
            "CLOSED" => Some(TaskExecutionStatus::Closed),
            _ => None,
        }
    }
}

impl fmt::Display for TaskExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskPersistenceStatus {
    #[serde(rename = "TRANSIENT")]
    Transient,
    #[serde(rename = "PERSISTENT")]
    Persistent,
}

/// 任务处于 WAITING 状态的原因
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskWaitingReason {
    /// 等待子任务或前置任务结束
    #[serde(rename = "OTHER_TASKS")]
    OtherTasks,
    #[serde(rename = "WORKFLOW")]
    Workflow,
    #[serde(rename = "OTHER")]
    Other,
}

impl TaskWaitingReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskWaitingReason::OtherTasks => "OTHER_TASKS",
            TaskWaitingReason::Workflow => "WORKFLOW",
            TaskWaitingReason::Other => "OTHER",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "OTHER_TASKS" => Some(TaskWaitingReason::OtherTasks),
            "WORKFLOW" => Some(TaskWaitingReason::Workflow),
            "OTHER" => Some(TaskWaitingReason::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum TaskRecurrence {
    #[default]
    #[serde(rename = "SINGLE")]
    Single,
    #[serde(rename = "RECURRING")]
    Recurring,
}

/// 调度规则：固定间隔或 cron 表达式，二选一
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ScheduleSpec {
    pub interval_seconds: Option<u64>,
    pub cron: Option<String>,
}

impl ScheduleSpec {
    pub fn interval(seconds: u64) -> Self {
        Self {
            interval_seconds: Some(seconds),
            cron: None,
        }
    }

    pub fn cron<S: Into<String>>(expr: S) -> Self {
        Self {
            interval_seconds: None,
            cron: Some(expr.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.interval_seconds.is_none() && self.cron.is_none()
    }
}

/// 持久化的任务对象（仓储中的记录形态）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskObject {
    pub oid: Option<String>,
    pub task_identifier: String,
    pub name: String,
    pub category: Option<String>,
    pub handler_uri: Option<String>,
    pub execution_status: TaskExecutionStatus,
    pub waiting_reason: Option<TaskWaitingReason>,
    pub recurrence: TaskRecurrence,
    pub schedule: Option<ScheduleSpec>,
    /// 当前执行该任务的节点（观察值，非权威）
    pub node: Option<String>,
    /// 父任务的 task_identifier
    pub parent: Option<String>,
    /// 等待本任务结束的任务 identifier 列表
    #[serde(default)]
    pub dependents: Vec<String>,
    pub completion_timestamp: Option<DateTime<Utc>>,
    pub last_run_start_timestamp: Option<DateTime<Utc>>,
    pub last_run_finish_timestamp: Option<DateTime<Utc>>,
    /// 由调度引擎推导，只在查询时填充
    #[serde(default)]
    pub next_run_start_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub progress: u64,
    pub result: Option<OperationResult>,
    #[serde(default)]
    pub extension: serde_json::Value,
}

impl TaskObject {
    pub fn new(task_identifier: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            oid: None,
            task_identifier: task_identifier.into(),
            name: name.into(),
            category: None,
            handler_uri: None,
            execution_status: TaskExecutionStatus::Runnable,
            waiting_reason: None,
            recurrence: TaskRecurrence::Single,
            schedule: None,
            node: None,
            parent: None,
            dependents: Vec::new(),
            completion_timestamp: None,
            last_run_start_timestamp: None,
            last_run_finish_timestamp: None,
            next_run_start_timestamp: None,
            progress: 0,
            result: None,
            extension: serde_json::Value::Null,
        }
    }

    pub fn is_recurring(&self) -> bool {
        self.recurrence == TaskRecurrence::Recurring
    }

    pub fn is_closed(&self) -> bool {
        self.execution_status == TaskExecutionStatus::Closed
    }

    pub fn persistence_status(&self) -> TaskPersistenceStatus {
        if self.oid.is_some() {
            TaskPersistenceStatus::Persistent
        } else {
            TaskPersistenceStatus::Transient
        }
    }

    pub fn entity_description(&self) -> String {
        format!(
            "任务 '{}' (OID: {}, 标识: {}, 状态: {})",
            self.name,
            self.oid.as_deref().unwrap_or("-"),
            self.task_identifier,
            self.execution_status
        )
    }
}

/// 节点运行期执行状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeExecutionStatus {
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "PAUSED")]
    Paused,
    #[serde(rename = "DOWN")]
    Down,
    #[serde(rename = "ERROR")]
    Error,
    #[serde(rename = "COMMUNICATION_ERROR")]
    CommunicationError,
}

/// 节点错误状态；非 OK 时本地调度器不允许启动
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum NodeErrorStatus {
    #[default]
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "DUPLICATE_NODE_ID_OR_NAME")]
    DuplicateNodeIdOrName,
    #[serde(rename = "NON_CLUSTERED_NODE_WITH_OTHERS")]
    NonClusteredNodeWithOthers,
    #[serde(rename = "LOCAL_CONFIGURATION_ERROR")]
    LocalConfigurationError,
}

impl NodeErrorStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, NodeErrorStatus::Ok)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeObject {
    pub oid: Option<String>,
    pub node_identifier: String,
    pub hostname: String,
    pub management_url: Option<String>,
    pub clustered: bool,
    /// 优雅关闭时置为 false
    pub running: bool,
    pub last_check_in_time: Option<DateTime<Utc>>,
    pub execution_status: Option<NodeExecutionStatus>,
    #[serde(default)]
    pub error_status: NodeErrorStatus,
    pub connection_result: Option<OperationResult>,
}

impl NodeObject {
    pub fn new(node_identifier: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            oid: None,
            node_identifier: node_identifier.into(),
            hostname: hostname.into(),
            management_url: None,
            clustered: false,
            running: true,
            last_check_in_time: None,
            execution_status: None,
            error_status: NodeErrorStatus::Ok,
            connection_result: None,
        }
    }

    /// 心跳是否在给定超时时间内
    pub fn is_alive(&self, now: DateTime<Utc>, timeout_seconds: i64) -> bool {
        self.running
            && self
                .last_check_in_time
                .map(|t| (now - t).num_seconds() <= timeout_seconds)
                .unwrap_or(false)
    }
}

/// 远程节点状态查询的返回值
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeStatusReport {
    pub node: NodeObject,
    pub running_tasks: Vec<RunningTaskInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunningTaskInfo {
    pub oid: String,
    pub task_identifier: String,
    pub started_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_execution_status_round_trip_names() {
        for status in [
            TaskExecutionStatus::Runnable,
            TaskExecutionStatus::Waiting,
            TaskExecutionStatus::Suspended,
            TaskExecutionStatus::Closed,
        ] {
            assert_eq!(TaskExecutionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TaskExecutionStatus::parse("RUNNING"), None);
    }

    #[test]
    fn test_persistence_status_follows_oid() {
        let mut task = TaskObject::new("1-0-1", "t");
        assert_eq!(task.persistence_status(), TaskPersistenceStatus::Transient);
        task.oid = Some("abc".to_string());
        assert_eq!(task.persistence_status(), TaskPersistenceStatus::Persistent);
    }

    #[test]
    fn test_node_alive() {
        let now = Utc::now();
        let mut node = NodeObject::new("n1", "host");
        assert!(!node.is_alive(now, 30));
        node.last_check_in_time = Some(now - Duration::seconds(10));
        assert!(node.is_alive(now, 30));
        node.running = false;
        assert!(!node.is_alive(now, 30));
    }

    #[test]
    fn test_task_serde_uses_screaming_names() {
        let task = TaskObject::new("1-0-1", "t");
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["execution_status"], "RUNNABLE");
        assert_eq!(json["recurrence"], "SINGLE");
    }
}
