//! 测试数据构造器

use chrono::{DateTime, Duration, Utc};
use taskmanager_domain::{
    NodeObject, ScheduleSpec, TaskExecutionStatus, TaskObject, TaskRecurrence, TaskWaitingReason,
};

/// 任务构造器，默认是可运行的单次任务
pub struct TaskObjectBuilder {
    task: TaskObject,
}

impl TaskObjectBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            task: TaskObject::new(format!("test-{name}"), name),
        }
    }

    pub fn with_identifier(mut self, identifier: &str) -> Self {
        self.task.task_identifier = identifier.to_string();
        self
    }

    pub fn with_handler(mut self, handler_uri: &str) -> Self {
        self.task.handler_uri = Some(handler_uri.to_string());
        self
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.task.category = Some(category.to_string());
        self
    }

    pub fn with_extension(mut self, extension: serde_json::Value) -> Self {
        self.task.extension = extension;
        self
    }

    pub fn recurring_every(mut self, seconds: u64) -> Self {
        self.task.recurrence = TaskRecurrence::Recurring;
        self.task.schedule = Some(ScheduleSpec::interval(seconds));
        self
    }

    pub fn recurring_cron(mut self, expression: &str) -> Self {
        self.task.recurrence = TaskRecurrence::Recurring;
        self.task.schedule = Some(ScheduleSpec::cron(expression));
        self
    }

    pub fn suspended(mut self) -> Self {
        self.task.execution_status = TaskExecutionStatus::Suspended;
        self
    }

    pub fn waiting(mut self, reason: TaskWaitingReason) -> Self {
        self.task.execution_status = TaskExecutionStatus::Waiting;
        self.task.waiting_reason = Some(reason);
        self
    }

    pub fn closed_at(mut self, at: DateTime<Utc>) -> Self {
        self.task.execution_status = TaskExecutionStatus::Closed;
        self.task.completion_timestamp = Some(at);
        self
    }

    /// 若干天前关闭
    pub fn closed_days_ago(self, days: i64) -> Self {
        self.closed_at(Utc::now() - Duration::days(days))
    }

    pub fn with_parent(mut self, parent_identifier: &str) -> Self {
        self.task.parent = Some(parent_identifier.to_string());
        self
    }

    pub fn with_dependent(mut self, dependent_identifier: &str) -> Self {
        self.task.dependents.push(dependent_identifier.to_string());
        self
    }

    pub fn build(self) -> TaskObject {
        self.task
    }
}

/// 节点构造器，默认是刚签到的非集群节点
pub struct NodeObjectBuilder {
    node: NodeObject,
}

impl NodeObjectBuilder {
    pub fn new(node_identifier: &str) -> Self {
        let mut node = NodeObject::new(node_identifier, format!("{node_identifier}.local"));
        node.last_check_in_time = Some(Utc::now());
        Self { node }
    }

    pub fn with_hostname(mut self, hostname: &str) -> Self {
        self.node.hostname = hostname.to_string();
        self
    }

    pub fn clustered(mut self) -> Self {
        self.node.clustered = true;
        self
    }

    pub fn with_management_url(mut self, url: &str) -> Self {
        self.node.management_url = Some(url.to_string());
        self
    }

    pub fn checked_in_at(mut self, at: DateTime<Utc>) -> Self {
        self.node.last_check_in_time = Some(at);
        self
    }

    /// 已优雅关闭
    pub fn not_running(mut self) -> Self {
        self.node.running = false;
        self
    }

    pub fn build(self) -> NodeObject {
        self.node
    }
}
