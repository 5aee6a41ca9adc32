use std::time::Duration;

use async_trait::async_trait;
use taskmanager_errors::TaskManagerResult;

use crate::entities::{NodeObject, NodeStatusReport};

/// 远程节点管理接口
///
/// 通过节点的管理地址查询运行状态、启停调度器和停止任务。
#[async_trait]
pub trait NodeClient: Send + Sync {
    async fn node_status(&self, node: &NodeObject) -> TaskManagerResult<NodeStatusReport>;
    async fn start_scheduler(&self, node: &NodeObject) -> TaskManagerResult<()>;
    async fn stop_scheduler(&self, node: &NodeObject) -> TaskManagerResult<()>;
    /// 返回节点上的任务是否都已在超时内停止
    async fn stop_scheduler_and_tasks(
        &self,
        node: &NodeObject,
        timeout: Duration,
    ) -> TaskManagerResult<bool>;
    async fn stop_task(&self, node: &NodeObject, oid: &str) -> TaskManagerResult<()>;
}
