//! 节点级操作：调度器启停、全量同步、节点删除，以及心跳线程的维护回调

use std::time::Duration;

use async_trait::async_trait;
use taskmanager_domain::{NodeErrorStatus, NodeObject, OperationResult};
use taskmanager_errors::TaskManagerResult;
use tracing::{debug, error, info, warn};

use super::TaskManager;
use crate::cluster_manager::ClusterMaintenance;

impl TaskManager {
    pub async fn start_scheduler(
        &self,
        node_identifier: &str,
        result: &mut OperationResult,
    ) -> TaskManagerResult<()> {
        self.execution_manager
            .start_scheduler(node_identifier, result)
            .await
    }

    pub async fn stop_scheduler(
        &self,
        node_identifier: &str,
        result: &mut OperationResult,
    ) -> TaskManagerResult<()> {
        self.execution_manager
            .stop_scheduler(node_identifier, result)
            .await
    }

    /// 逐个节点启动调度器，单个节点失败不影响其他节点
    pub async fn start_schedulers(&self, node_identifiers: &[String], result: &mut OperationResult) {
        let result = result.create_subresult("startSchedulers");
        for node_identifier in node_identifiers {
            if let Err(e) = self.start_scheduler(node_identifier, result).await {
                warn!("启动节点 {} 的调度器失败: {}", node_identifier, e);
            }
        }
        result.compute_status();
    }

    pub async fn stop_schedulers(&self, node_identifiers: &[String], result: &mut OperationResult) {
        let result = result.create_subresult("stopSchedulers");
        for node_identifier in node_identifiers {
            if let Err(e) = self.stop_scheduler(node_identifier, result).await {
                warn!("暂停节点 {} 的调度器失败: {}", node_identifier, e);
            }
        }
        result.compute_status();
    }

    pub async fn stop_schedulers_and_tasks(
        &self,
        node_identifiers: &[String],
        timeout: Option<Duration>,
        result: &mut OperationResult,
    ) -> bool {
        self.execution_manager
            .stop_schedulers_and_tasks(node_identifiers, timeout, result)
            .await
    }

    /// 全量同步仓储与作业存储
    pub async fn synchronize_tasks(&self, result: &mut OperationResult) {
        self.execution_manager.synchronize_job_stores(result).await;
    }

    pub fn is_current_node(&self, node: &NodeObject) -> bool {
        self.cluster_manager.is_current_node(node)
    }

    pub async fn delete_node(
        &self,
        node_identifier: &str,
        result: &mut OperationResult,
    ) -> TaskManagerResult<()> {
        let result = result.create_subresult("deleteNode");
        result.add_param("node", node_identifier);
        match self.cluster_manager.delete_node(node_identifier).await {
            Ok(()) => {
                self.execution_manager.invalidate_cluster_status_cache().await;
                result.record_success();
                Ok(())
            }
            Err(e) => {
                result.record_fatal_error(e.to_string());
                Err(e)
            }
        }
    }
}

#[async_trait]
impl ClusterMaintenance for TaskManager {
    async fn on_node_error(&self, status: NodeErrorStatus) {
        error!("节点 {} 配置错误 {:?}，停止本地调度器和任务", self.node_id(), status);
        match self
            .execution_manager
            .stop_scheduler_and_tasks_locally(Some(self.config.scheduler.wait_on_shutdown()))
            .await
        {
            Ok(true) => info!("本地调度器和任务已停止"),
            Ok(false) => warn!("部分本地任务未在等待时间内停止"),
            Err(e) => error!("停止本地调度器失败: {}", e),
        }
    }

    async fn check_waiting_tasks_periodically(&self) {
        let mut result = OperationResult::new("checkWaitingTasksPeriodically");
        let unpaused = self.check_waiting_tasks(&mut result).await;
        debug!("周期性检查等待任务完成，{} 个恢复运行", unpaused);
    }

    async fn synchronize_job_stores_periodically(&self) {
        let mut result = OperationResult::new("synchronizeJobStoresPeriodically");
        self.execution_manager.synchronize_job_stores(&mut result).await;
        result.compute_status();
        if result.is_error() {
            warn!("周期性全量同步出现错误: {}", result);
        }
    }
}
