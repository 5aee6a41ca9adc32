//! 集群管理器
//!
//! 负责本节点的注册与心跳，检查集群配置是否正确。配置错误会把节点置为错误状态，
//! 之后本节点的调度器拒绝启动。

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use taskmanager_core::TaskManagerConfig;
use taskmanager_domain::{
    NodeErrorStatus, NodeFilter, NodeModification, NodeObject, NodeRepository,
};
use taskmanager_errors::{TaskManagerError, TaskManagerResult};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::metrics::TaskManagerMetrics;
use crate::node_state::LocalNodeState;

/// 心跳线程回调到任务管理器的维护动作
#[async_trait]
pub trait ClusterMaintenance: Send + Sync {
    /// 配置检查失败，本地调度器和任务需要停止
    async fn on_node_error(&self, status: NodeErrorStatus);
    async fn check_waiting_tasks_periodically(&self);
    async fn synchronize_job_stores_periodically(&self);
}

pub struct ClusterManager {
    config: Arc<TaskManagerConfig>,
    node_state: Arc<LocalNodeState>,
    node_repo: Arc<dyn NodeRepository>,
    metrics: Arc<TaskManagerMetrics>,
    running: Arc<RwLock<bool>>,
    shutdown_tx: broadcast::Sender<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ClusterManager {
    pub fn new(
        config: Arc<TaskManagerConfig>,
        node_state: Arc<LocalNodeState>,
        node_repo: Arc<dyn NodeRepository>,
        metrics: Arc<TaskManagerMetrics>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            node_state,
            node_repo,
            metrics,
            running: Arc::new(RwLock::new(false)),
            shutdown_tx,
            handle: Mutex::new(None),
        }
    }

    pub fn node_id(&self) -> &str {
        self.node_state.node_id()
    }

    pub fn is_current_node(&self, node: &NodeObject) -> bool {
        self.is_current_node_id(&node.node_identifier)
    }

    pub fn is_current_node_id(&self, node_identifier: &str) -> bool {
        node_identifier == self.node_state.node_id()
    }

    fn node_timeout_seconds(&self) -> i64 {
        i64::try_from(self.config.cluster.node_timeout_seconds).unwrap_or(i64::MAX)
    }

    async fn find_node(&self, node_identifier: &str) -> TaskManagerResult<Option<NodeObject>> {
        Ok(self
            .node_repo
            .search_nodes(&NodeFilter::with_identifier(node_identifier))
            .await?
            .into_iter()
            .next())
    }

    /// 启动时创建或接管本节点记录，然后检查集群配置
    pub async fn register_node_at_startup(&self) -> TaskManagerResult<NodeErrorStatus> {
        if !self.register_node_record().await? {
            self.node_state
                .set_error_status(NodeErrorStatus::DuplicateNodeIdOrName)
                .await;
            return Ok(NodeErrorStatus::DuplicateNodeIdOrName);
        }
        Ok(self.check_cluster_configuration().await)
    }

    /// 返回 false 表示同名节点仍在其他主机上运行，记录未被接管
    async fn register_node_record(&self) -> TaskManagerResult<bool> {
        let now = Utc::now();
        let node_id = self.node_state.node_id();

        match self.find_node(node_id).await? {
            Some(existing) => {
                if existing.is_alive(now, self.node_timeout_seconds())
                    && existing.hostname != self.node_state.hostname()
                {
                    error!(
                        "节点标识 {} 已被主机 {} 上运行的节点使用",
                        node_id, existing.hostname
                    );
                    return Ok(false);
                }
                let oid = existing.oid.clone().ok_or_else(|| {
                    TaskManagerError::Internal(format!("节点 {node_id} 的记录缺少 OID"))
                })?;
                self.node_repo
                    .modify_node(
                        &oid,
                        &[
                            NodeModification::Running(true),
                            NodeModification::LastCheckInTime(Some(now)),
                            NodeModification::Hostname(self.node_state.hostname().to_string()),
                            NodeModification::ManagementUrl(
                                self.node_state.management_url().map(str::to_string),
                            ),
                            NodeModification::Clustered(self.node_state.is_clustered()),
                            NodeModification::ErrorStatus(NodeErrorStatus::Ok),
                        ],
                    )
                    .await?;
                info!("接管已有节点记录: {} ({})", node_id, oid);
                self.node_state.set_node_oid(Some(oid)).await;
            }
            None => {
                let mut node = NodeObject::new(node_id, self.node_state.hostname());
                node.management_url = self.node_state.management_url().map(str::to_string);
                node.clustered = self.node_state.is_clustered();
                node.last_check_in_time = Some(now);
                let oid = self.node_repo.add_node(&node).await?;
                info!("注册新节点: {} ({})", node_id, oid);
                self.node_state.set_node_oid(Some(oid)).await;
            }
        }

        self.node_state.record_check_in(now).await;
        Ok(true)
    }

    /// 检查集群配置并更新节点错误状态
    ///
    /// 检查本身失败时保留原有状态。
    pub async fn check_cluster_configuration(&self) -> NodeErrorStatus {
        let status = match self.evaluate_configuration().await {
            Ok(status) => status,
            Err(e) => {
                warn!("检查集群配置失败: {}", e);
                return self.node_state.error_status().await;
            }
        };

        self.node_state.set_error_status(status).await;
        if let Some(oid) = self.node_state.node_oid().await {
            if let Err(e) = self
                .node_repo
                .modify_node(&oid, &[NodeModification::ErrorStatus(status)])
                .await
            {
                warn!("保存节点错误状态失败: {}", e);
            }
        }
        status
    }

    async fn evaluate_configuration(&self) -> TaskManagerResult<NodeErrorStatus> {
        let Some(oid) = self.node_state.node_oid().await else {
            return Ok(self.node_state.error_status().await);
        };

        let record = match self.node_repo.get_node(&oid).await {
            Ok(record) => record,
            Err(e) if e.is_not_found() => {
                warn!("本节点记录已被删除，重新注册");
                self.node_state.set_node_oid(None).await;
                // 其余检查留给下一次心跳
                return Ok(if self.register_node_record().await? {
                    NodeErrorStatus::Ok
                } else {
                    NodeErrorStatus::DuplicateNodeIdOrName
                });
            }
            Err(e) => return Err(e),
        };

        if record.hostname != self.node_state.hostname() {
            return Ok(NodeErrorStatus::DuplicateNodeIdOrName);
        }

        if !self.node_state.is_clustered() {
            let now = Utc::now();
            let others = self
                .node_repo
                .search_nodes(&NodeFilter::all())
                .await?
                .into_iter()
                .filter(|n| !self.is_current_node(n))
                .filter(|n| n.is_alive(now, self.node_timeout_seconds()))
                .count();
            if others > 0 {
                warn!("非集群节点 {} 发现 {} 个其他存活节点", self.node_id(), others);
                return Ok(NodeErrorStatus::NonClusteredNodeWithOthers);
            }
        } else if self.node_state.management_url().is_none() && !self.config.node.test_mode {
            warn!("集群节点 {} 没有配置管理地址，其他节点无法访问", self.node_id());
            return Ok(NodeErrorStatus::LocalConfigurationError);
        }

        Ok(NodeErrorStatus::Ok)
    }

    pub async fn record_heartbeat(&self) -> TaskManagerResult<()> {
        let Some(oid) = self.node_state.node_oid().await else {
            return Ok(());
        };
        let now = Utc::now();
        self.node_repo
            .modify_node(
                &oid,
                &[
                    NodeModification::LastCheckInTime(Some(now)),
                    NodeModification::Running(true),
                ],
            )
            .await?;
        self.node_state.record_check_in(now).await;
        self.metrics.record_heartbeat();
        debug!("节点 {} 心跳已记录", self.node_id());
        Ok(())
    }

    /// 标记本节点已关闭，其他节点无需等待心跳超时
    pub async fn record_node_shutdown(&self) -> TaskManagerResult<()> {
        let Some(oid) = self.node_state.node_oid().await else {
            return Ok(());
        };
        self.node_repo
            .modify_node(&oid, &[NodeModification::Running(false)])
            .await?;
        info!("节点 {} 已记录关闭", self.node_id());
        Ok(())
    }

    /// 只能删除已停止的其他节点
    pub async fn delete_node(&self, node_identifier: &str) -> TaskManagerResult<()> {
        if self.is_current_node_id(node_identifier) {
            return Err(TaskManagerError::illegal_state("不能删除当前节点"));
        }
        let node = self
            .find_node(node_identifier)
            .await?
            .ok_or_else(|| TaskManagerError::node_not_found(node_identifier))?;
        if node.is_alive(Utc::now(), self.node_timeout_seconds()) {
            return Err(TaskManagerError::illegal_state(format!(
                "节点 {node_identifier} 仍在运行，不能删除"
            )));
        }
        let oid = node
            .oid
            .ok_or_else(|| TaskManagerError::Internal(format!("节点 {node_identifier} 缺少 OID")))?;
        self.node_repo.delete_node(&oid).await?;
        info!("已删除节点 {}", node_identifier);
        Ok(())
    }

    // ---- 心跳线程 ----

    pub async fn start_cluster_manager_thread(
        self: &Arc<Self>,
        maintenance: Weak<dyn ClusterMaintenance>,
    ) {
        if self.config.node.test_mode {
            info!("测试模式，不启动集群管理线程");
            return;
        }

        let mut handle = self.handle.lock().await;
        if handle.is_some() {
            warn!("集群管理线程已在运行");
            return;
        }

        *self.running.write().await = true;
        let manager = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let heartbeat_interval = self.config.cluster.heartbeat_interval();

        *handle = Some(tokio::spawn(async move {
            info!("集群管理线程启动，心跳间隔: {:?}", heartbeat_interval);
            let mut interval = tokio::time::interval(heartbeat_interval);
            let mut tick: u64 = 0;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        tick += 1;
                        if !manager.heartbeat_tick(tick, &maintenance).await {
                            debug!("任务管理器已释放，集群管理线程退出");
                            break;
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("集群管理线程收到停止信号");
                        break;
                    }
                }
            }

            *manager.running.write().await = false;
        }));
    }

    async fn heartbeat_tick(&self, tick: u64, maintenance: &Weak<dyn ClusterMaintenance>) -> bool {
        let Some(maintenance) = maintenance.upgrade() else {
            return false;
        };

        if let Err(e) = self.record_heartbeat().await {
            error!("记录心跳失败: {}", e);
        }

        let status = self.check_cluster_configuration().await;
        if !status.is_ok() {
            maintenance.on_node_error(status).await;
        }

        let cluster = &self.config.cluster;
        if cluster.check_waiting_tasks_every_n_heartbeats > 0
            && tick % cluster.check_waiting_tasks_every_n_heartbeats as u64 == 0
        {
            maintenance.check_waiting_tasks_periodically().await;
        }
        if cluster.job_store_sync_every_n_heartbeats > 0
            && tick % cluster.job_store_sync_every_n_heartbeats as u64 == 0
        {
            maintenance.synchronize_job_stores_periodically().await;
        }
        true
    }

    /// 超时为零时只发停止信号，不等待线程退出
    pub async fn stop_cluster_manager_thread(&self, timeout: Duration) {
        let _ = self.shutdown_tx.send(());
        let Some(handle) = self.handle.lock().await.take() else {
            return;
        };
        if timeout.is_zero() {
            return;
        }
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => info!("集群管理线程已停止"),
            Ok(Err(e)) => warn!("集群管理线程异常结束: {}", e),
            Err(_) => warn!("集群管理线程未在 {:?} 内退出", timeout),
        }
    }

    pub async fn is_cluster_manager_thread_active(&self) -> bool {
        *self.running.read().await
    }
}
