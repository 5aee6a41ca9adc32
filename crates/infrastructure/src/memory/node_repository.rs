use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use taskmanager_domain::{
    apply_node_modifications, NodeFilter, NodeModification, NodeObject, NodeRepository,
};
use taskmanager_errors::{TaskManagerError, TaskManagerResult};
use tokio::sync::RwLock;
use uuid::Uuid;

/// 内存节点仓储
///
/// 多个节点共享同一实例时即可模拟共享仓储的集群。
#[derive(Debug, Clone, Default)]
pub struct InMemoryNodeRepository {
    nodes: Arc<RwLock<HashMap<String, NodeObject>>>,
}

impl InMemoryNodeRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NodeRepository for InMemoryNodeRepository {
    async fn get_node(&self, oid: &str) -> TaskManagerResult<NodeObject> {
        self.nodes
            .read()
            .await
            .get(oid)
            .cloned()
            .ok_or_else(|| TaskManagerError::node_not_found(oid))
    }

    async fn search_nodes(&self, filter: &NodeFilter) -> TaskManagerResult<Vec<NodeObject>> {
        let nodes = self.nodes.read().await;
        let mut matching: Vec<NodeObject> = nodes
            .values()
            .filter(|n| filter.matches(n))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.node_identifier.cmp(&b.node_identifier));
        Ok(matching)
    }

    async fn count_nodes(&self, filter: &NodeFilter) -> TaskManagerResult<usize> {
        let nodes = self.nodes.read().await;
        Ok(nodes.values().filter(|n| filter.matches(n)).count())
    }

    async fn add_node(&self, node: &NodeObject) -> TaskManagerResult<String> {
        let mut nodes = self.nodes.write().await;
        if nodes
            .values()
            .any(|n| n.node_identifier == node.node_identifier)
        {
            return Err(TaskManagerError::ObjectAlreadyExists(format!(
                "节点 {} 已存在",
                node.node_identifier
            )));
        }
        let oid = node
            .oid
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut stored = node.clone();
        stored.oid = Some(oid.clone());
        nodes.insert(oid.clone(), stored);
        Ok(oid)
    }

    async fn modify_node(
        &self,
        oid: &str,
        modifications: &[NodeModification],
    ) -> TaskManagerResult<()> {
        let mut nodes = self.nodes.write().await;
        let node = nodes
            .get_mut(oid)
            .ok_or_else(|| TaskManagerError::node_not_found(oid))?;
        apply_node_modifications(node, modifications)
    }

    async fn delete_node(&self, oid: &str) -> TaskManagerResult<()> {
        self.nodes
            .write()
            .await
            .remove(oid)
            .map(|_| ())
            .ok_or_else(|| TaskManagerError::node_not_found(oid))
    }
}
