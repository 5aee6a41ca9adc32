use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use taskmanager_domain::{NodeExecutionStatus, NodeObject, RunningTaskInfo};

#[derive(Debug, Clone, Serialize)]
pub struct NodeRuntimeInfo {
    pub node: NodeObject,
    pub running_tasks: Vec<RunningTaskInfo>,
}

/// 集群状态快照：每个节点的运行期信息及其正在执行的任务
#[derive(Debug, Clone, Serialize)]
pub struct ClusterStatusInformation {
    nodes: Vec<NodeRuntimeInfo>,
    retrieved_at: DateTime<Utc>,
}

impl ClusterStatusInformation {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            retrieved_at: Utc::now(),
        }
    }

    pub fn add_node_info(&mut self, node: NodeObject, running_tasks: Vec<RunningTaskInfo>) {
        self.nodes.retain(|n| n.node.node_identifier != node.node_identifier);
        self.nodes.push(NodeRuntimeInfo {
            node,
            running_tasks,
        });
    }

    pub fn nodes(&self) -> &[NodeRuntimeInfo] {
        &self.nodes
    }

    pub fn retrieved_at(&self) -> DateTime<Utc> {
        self.retrieved_at
    }

    pub fn node(&self, node_identifier: &str) -> Option<&NodeRuntimeInfo> {
        self.nodes
            .iter()
            .find(|n| n.node.node_identifier == node_identifier)
    }

    pub fn node_status(&self, node_identifier: &str) -> Option<NodeExecutionStatus> {
        self.node(node_identifier)
            .and_then(|info| info.node.execution_status)
    }

    /// 正在执行该任务的节点
    pub fn find_node_running_task(&self, oid: &str) -> Option<&NodeObject> {
        self.nodes
            .iter()
            .find(|n| n.running_tasks.iter().any(|t| t.oid == oid))
            .map(|n| &n.node)
    }

    pub fn is_task_running(&self, oid: &str) -> bool {
        self.find_node_running_task(oid).is_some()
    }

    pub fn running_tasks_on(&self, node_identifier: &str) -> &[RunningTaskInfo] {
        self.node(node_identifier)
            .map(|n| n.running_tasks.as_slice())
            .unwrap_or(&[])
    }

    pub fn all_running_task_oids(&self) -> HashSet<String> {
        self.nodes
            .iter()
            .flat_map(|n| n.running_tasks.iter().map(|t| t.oid.clone()))
            .collect()
    }
}

impl Default for ClusterStatusInformation {
    fn default() -> Self {
        Self::new()
    }
}

/// 停止任务后如何等待
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopWait {
    Indefinitely,
    For(Duration),
    /// 发出停止信号后只检查一次
    DoNotWait,
    /// 不发停止信号
    DoNotStop,
}

impl StopWait {
    /// `None` 无限等待，零表示不等待
    pub fn from_timeout(timeout: Option<Duration>) -> Self {
        match timeout {
            None => StopWait::Indefinitely,
            Some(d) if d.is_zero() => StopWait::DoNotWait,
            Some(d) => StopWait::For(d),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running(oid: &str) -> RunningTaskInfo {
        RunningTaskInfo {
            oid: oid.to_string(),
            task_identifier: format!("id-{oid}"),
            started_at: Utc::now(),
        }
    }

    #[test]
    fn test_lookup_running_tasks() {
        let mut info = ClusterStatusInformation::new();
        info.add_node_info(NodeObject::new("n1", "h1"), vec![running("a")]);
        info.add_node_info(NodeObject::new("n2", "h2"), vec![running("b"), running("c")]);

        assert_eq!(
            info.find_node_running_task("b").map(|n| n.node_identifier.as_str()),
            Some("n2")
        );
        assert!(!info.is_task_running("zzz"));
        assert_eq!(info.running_tasks_on("n2").len(), 2);
        assert!(info.running_tasks_on("n3").is_empty());
        assert_eq!(info.all_running_task_oids().len(), 3);
    }

    #[test]
    fn test_node_info_replaced_not_duplicated() {
        let mut info = ClusterStatusInformation::new();
        info.add_node_info(NodeObject::new("n1", "h1"), vec![running("a")]);
        info.add_node_info(NodeObject::new("n1", "h1"), vec![]);
        assert_eq!(info.nodes().len(), 1);
        assert!(!info.is_task_running("a"));
    }

    #[test]
    fn test_stop_wait_from_timeout() {
        assert_eq!(StopWait::from_timeout(None), StopWait::Indefinitely);
        assert_eq!(
            StopWait::from_timeout(Some(Duration::ZERO)),
            StopWait::DoNotWait
        );
        assert_eq!(
            StopWait::from_timeout(Some(Duration::from_secs(2))),
            StopWait::For(Duration::from_secs(2))
        );
    }
}
