//! 测试替身：远程节点客户端与任务处理器

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use taskmanager_domain::{
    NodeClient, NodeExecutionStatus, NodeObject, NodeStatusReport, OperationResult,
    RunningTaskInfo,
};
use taskmanager_engine::{TaskHandler, TaskInstance, TaskRunResult, TaskRunResultStatus};
use taskmanager_errors::{TaskManagerError, TaskManagerResult};

/// 远程节点的预设行为
#[derive(Debug, Clone)]
pub enum ScriptedNode {
    Reachable {
        status: NodeExecutionStatus,
        running_tasks: Vec<RunningTaskInfo>,
    },
    Unreachable,
}

/// 按节点标识返回预设结果的 `NodeClient`，并记录每次调用
#[derive(Default)]
pub struct ScriptedNodeClient {
    nodes: Mutex<HashMap<String, ScriptedNode>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedNodeClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, node_identifier: &str, behaviour: ScriptedNode) {
        self.nodes
            .lock()
            .unwrap()
            .insert(node_identifier.to_string(), behaviour);
    }

    pub fn reachable(&self, node_identifier: &str, running_tasks: Vec<RunningTaskInfo>) {
        self.script(
            node_identifier,
            ScriptedNode::Reachable {
                status: NodeExecutionStatus::Running,
                running_tasks,
            },
        );
    }

    pub fn unreachable(&self, node_identifier: &str) {
        self.script(node_identifier, ScriptedNode::Unreachable);
    }

    /// 形如 `stop_task:node-2:oid` 的调用记录
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn behaviour(&self, node: &NodeObject) -> TaskManagerResult<ScriptedNode> {
        match self.nodes.lock().unwrap().get(&node.node_identifier) {
            Some(ScriptedNode::Unreachable) | None => Err(TaskManagerError::communication(
                node.node_identifier.clone(),
                "connection refused",
            )),
            Some(reachable) => Ok(reachable.clone()),
        }
    }
}

#[async_trait]
impl NodeClient for ScriptedNodeClient {
    async fn node_status(&self, node: &NodeObject) -> TaskManagerResult<NodeStatusReport> {
        self.record(format!("node_status:{}", node.node_identifier));
        match self.behaviour(node)? {
            ScriptedNode::Reachable {
                status,
                running_tasks,
            } => {
                let mut reported = node.clone();
                reported.execution_status = Some(status);
                Ok(NodeStatusReport {
                    node: reported,
                    running_tasks,
                })
            }
            ScriptedNode::Unreachable => Err(TaskManagerError::communication(
                node.node_identifier.clone(),
                "connection refused",
            )),
        }
    }

    async fn start_scheduler(&self, node: &NodeObject) -> TaskManagerResult<()> {
        self.record(format!("start_scheduler:{}", node.node_identifier));
        self.behaviour(node).map(|_| ())
    }

    async fn stop_scheduler(&self, node: &NodeObject) -> TaskManagerResult<()> {
        self.record(format!("stop_scheduler:{}", node.node_identifier));
        self.behaviour(node).map(|_| ())
    }

    async fn stop_scheduler_and_tasks(
        &self,
        node: &NodeObject,
        _timeout: Duration,
    ) -> TaskManagerResult<bool> {
        self.record(format!("stop_scheduler_and_tasks:{}", node.node_identifier));
        self.behaviour(node).map(|_| true)
    }

    async fn stop_task(&self, node: &NodeObject, oid: &str) -> TaskManagerResult<()> {
        self.record(format!("stop_task:{}:{}", node.node_identifier, oid));
        let mut nodes = self.nodes.lock().unwrap();
        match nodes.get_mut(&node.node_identifier) {
            Some(ScriptedNode::Reachable { running_tasks, .. }) => {
                running_tasks.retain(|t| t.oid != oid);
                Ok(())
            }
            _ => Err(TaskManagerError::communication(
                node.node_identifier.clone(),
                "connection refused",
            )),
        }
    }
}

/// 记录运行次数并返回固定结果的处理器
pub struct CountingHandler {
    runs: AtomicUsize,
    outcome: TaskRunResultStatus,
}

impl CountingHandler {
    pub fn new(outcome: TaskRunResultStatus) -> Arc<Self> {
        Arc::new(Self {
            runs: AtomicUsize::new(0),
            outcome,
        })
    }

    pub fn finishing() -> Arc<Self> {
        Self::new(TaskRunResultStatus::Finished)
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskHandler for CountingHandler {
    async fn run(&self, task: &mut TaskInstance) -> TaskRunResult {
        let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        task.set_progress(run as u64);
        let mut result = OperationResult::new("counting");
        result.add_param("run", run);
        TaskRunResult::new(self.outcome, result)
    }

    fn category_names(&self) -> Vec<String> {
        vec!["Testing".to_string()]
    }
}

/// 一直运行到取消标志被置位的处理器
#[derive(Default)]
pub struct BlockingHandler {
    started: AtomicBool,
    stopped: AtomicBool,
}

impl BlockingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn has_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn has_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskHandler for BlockingHandler {
    async fn run(&self, task: &mut TaskInstance) -> TaskRunResult {
        self.started.store(true, Ordering::SeqCst);
        while task.can_run() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.stopped.store(true, Ordering::SeqCst);
        TaskRunResult::interrupted(OperationResult::new("blocking"))
    }
}
