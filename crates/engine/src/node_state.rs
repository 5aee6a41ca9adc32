use chrono::{DateTime, Utc};
use taskmanager_core::TaskManagerConfig;
use taskmanager_domain::{NodeErrorStatus, NodeExecutionStatus, NodeObject};
use tokio::sync::RwLock;
use tracing::warn;

/// 本节点的身份与运行期状态，由集群管理器和执行管理器共享
#[derive(Debug)]
pub struct LocalNodeState {
    node_id: String,
    hostname: String,
    management_url: Option<String>,
    clustered: bool,
    node_oid: RwLock<Option<String>>,
    error_status: RwLock<NodeErrorStatus>,
    last_check_in: RwLock<Option<DateTime<Utc>>>,
}

impl LocalNodeState {
    pub fn from_config(config: &TaskManagerConfig) -> Self {
        Self {
            node_id: config.node_id(),
            hostname: config.hostname(),
            management_url: config.node.management_url.clone(),
            clustered: config.node.clustered,
            node_oid: RwLock::new(None),
            error_status: RwLock::new(NodeErrorStatus::Ok),
            last_check_in: RwLock::new(None),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn management_url(&self) -> Option<&str> {
        self.management_url.as_deref()
    }

    pub fn is_clustered(&self) -> bool {
        self.clustered
    }

    pub async fn node_oid(&self) -> Option<String> {
        self.node_oid.read().await.clone()
    }

    pub async fn set_node_oid(&self, oid: Option<String>) {
        *self.node_oid.write().await = oid;
    }

    pub async fn error_status(&self) -> NodeErrorStatus {
        *self.error_status.read().await
    }

    pub async fn set_error_status(&self, status: NodeErrorStatus) {
        let mut current = self.error_status.write().await;
        if *current != status {
            if !status.is_ok() {
                warn!("节点 {} 进入错误状态: {:?}", self.node_id, status);
            }
            *current = status;
        }
    }

    pub async fn is_in_error_state(&self) -> bool {
        !self.error_status().await.is_ok()
    }

    pub async fn record_check_in(&self, at: DateTime<Utc>) {
        *self.last_check_in.write().await = Some(at);
    }

    /// 以节点记录的形式描述本节点
    pub async fn to_node_object(&self, execution_status: NodeExecutionStatus) -> NodeObject {
        let mut node = NodeObject::new(self.node_id.clone(), self.hostname.clone());
        node.oid = self.node_oid().await;
        node.management_url = self.management_url.clone();
        node.clustered = self.clustered;
        node.last_check_in_time = *self.last_check_in.read().await;
        node.error_status = self.error_status().await;
        node.execution_status = Some(execution_status);
        node
    }
}
