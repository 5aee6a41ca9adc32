//! 领域仓储抽象
//!
//! 任务与节点的持久化由外部仓储负责，这里只定义引擎依赖的接口。

use async_trait::async_trait;
use taskmanager_errors::TaskManagerResult;

use crate::entities::{NodeObject, TaskObject};
use crate::queries::{NodeFilter, NodeModification, TaskFilter, TaskModification};

/// 任务仓储抽象
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// 不存在时返回 `ObjectNotFound`
    async fn get_task(&self, oid: &str) -> TaskManagerResult<TaskObject>;
    async fn search_tasks(&self, filter: &TaskFilter) -> TaskManagerResult<Vec<TaskObject>>;
    async fn count_tasks(&self, filter: &TaskFilter) -> TaskManagerResult<usize>;
    /// 分配 OID 并返回；identifier 重复时返回 `ObjectAlreadyExists`
    async fn add_task(&self, task: &TaskObject) -> TaskManagerResult<String>;
    async fn modify_task(
        &self,
        oid: &str,
        modifications: &[TaskModification],
    ) -> TaskManagerResult<()>;
    async fn delete_task(&self, oid: &str) -> TaskManagerResult<()>;
}

/// 节点仓储抽象
#[async_trait]
pub trait NodeRepository: Send + Sync {
    async fn get_node(&self, oid: &str) -> TaskManagerResult<NodeObject>;
    async fn search_nodes(&self, filter: &NodeFilter) -> TaskManagerResult<Vec<NodeObject>>;
    async fn count_nodes(&self, filter: &NodeFilter) -> TaskManagerResult<usize>;
    async fn add_node(&self, node: &NodeObject) -> TaskManagerResult<String>;
    async fn modify_node(
        &self,
        oid: &str,
        modifications: &[NodeModification],
    ) -> TaskManagerResult<()>;
    async fn delete_node(&self, oid: &str) -> TaskManagerResult<()>;
}
