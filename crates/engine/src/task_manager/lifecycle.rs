//! 启动、关闭与服务线程的启停

use std::sync::Weak;
use std::time::Duration;

use taskmanager_domain::{JobStoreState, OperationResult};
use taskmanager_errors::{TaskManagerError, TaskManagerResult};
use tracing::{error, info, warn};

use super::TaskManager;
use crate::cluster_manager::ClusterMaintenance;

impl TaskManager {
    /// 注册本节点并把作业存储与仓储对齐
    ///
    /// 仓储不可用时按 `stop_on_initialization_failure` 决定是否失败；
    /// 集群配置错误只会让节点进入错误状态，调度器随后拒绝启动。
    pub async fn init(&self, result: &mut OperationResult) -> TaskManagerResult<()> {
        let result = result.create_subresult("init");
        info!("任务管理器初始化，节点: {}", self.node_id());

        match self.cluster_manager.register_node_at_startup().await {
            Ok(status) if status.is_ok() => {
                result.create_subresult("registerNode").record_success();
            }
            Ok(status) => {
                error!("节点 {} 注册后处于错误状态: {:?}", self.node_id(), status);
                result
                    .create_subresult("registerNode")
                    .record_warning(format!("节点处于错误状态: {status:?}"));
            }
            Err(e) => {
                error!("注册节点 {} 失败: {}", self.node_id(), e);
                result
                    .create_subresult("registerNode")
                    .record_fatal_error(e.to_string());
                if self.config.node.stop_on_initialization_failure {
                    result.compute_status();
                    return Err(e);
                }
            }
        }

        self.execution_manager.synchronize_job_stores(result).await;
        result.compute_status();
        Ok(())
    }

    /// 启动集群管理线程和本地调度器
    pub async fn post_init(&self, result: &mut OperationResult) -> TaskManagerResult<()> {
        let result = result.create_subresult("postInit");
        self.start_cluster_manager_thread().await;

        if let Err(e) = self.execution_manager.start_local_scheduler().await {
            error!("本地调度器无法启动: {}", e);
            result.record_fatal_error(e.to_string());
            if self.config.node.stop_on_initialization_failure {
                return Err(e);
            }
            return Ok(());
        }
        result.record_success();
        Ok(())
    }

    /// 停止心跳线程、调度器和本地任务，并记录节点关闭
    pub async fn shutdown(&self, result: &mut OperationResult) {
        let result = result.create_subresult("shutdown");
        info!("任务管理器开始关闭");

        if self.execution_manager.job_store().state().await != JobStoreState::Shutdown {
            if let Err(e) = self.execution_manager.stop_local_scheduler().await {
                warn!("暂停本地调度器失败: {}", e);
            }
            let stopped = self
                .execution_manager
                .stop_all_tasks_on_this_node_and_wait(Some(self.config.scheduler.wait_on_shutdown()))
                .await;
            if !stopped {
                warn!("部分本地任务在关闭时仍在运行");
                result
                    .create_subresult("stopAllTasks")
                    .record_warning("部分本地任务未停止");
            }

            if self.config.node.test_mode {
                info!("测试模式，调度器保持暂停，不关闭");
            } else if let Err(e) = self.execution_manager.shutdown_local_scheduler().await {
                error!("关闭本地调度器失败，继续关闭节点: {}", e);
            }
        }

        self.cluster_manager
            .stop_cluster_manager_thread(Duration::ZERO)
            .await;
        if let Err(e) = self.cluster_manager.record_node_shutdown().await {
            error!("记录节点关闭失败: {}", e);
            result
                .create_subresult("recordNodeShutdown")
                .record_warning(e.to_string());
        }
        result.compute_status();
        info!("任务管理器关闭完成");
    }

    pub async fn is_running(&self) -> bool {
        self.execution_manager.is_local_node_running().await
    }

    pub async fn is_in_error_state(&self) -> bool {
        self.node_state.is_in_error_state().await
    }

    /// 停止心跳线程、本地调度器和本地任务；返回任务是否在等待时间内全部停止
    pub async fn deactivate_service_threads(
        &self,
        time_to_wait: Duration,
        result: &mut OperationResult,
    ) -> bool {
        let result = result.create_subresult("deactivateServiceThreads");
        result.add_param("timeToWaitMs", time_to_wait.as_millis());
        info!("停用任务管理器服务线程，等待时间 {:?}", time_to_wait);

        self.cluster_manager
            .stop_cluster_manager_thread(time_to_wait)
            .await;
        let stopped = match self
            .execution_manager
            .stop_scheduler_and_tasks_locally(Some(time_to_wait))
            .await
        {
            Ok(stopped) => stopped,
            Err(e) => {
                error!("停止本地调度器失败: {}", e);
                result
                    .create_subresult("stopSchedulerAndTasksLocally")
                    .record_fatal_error(e.to_string());
                false
            }
        };
        result.compute_status();
        stopped
    }

    pub async fn reactivate_service_threads(&self, result: &mut OperationResult) {
        let result = result.create_subresult("reactivateServiceThreads");
        info!("重新启用任务管理器服务线程");
        self.start_cluster_manager_thread().await;
        let node_id = self.node_id().to_string();
        if let Err(e) = self.execution_manager.start_scheduler(&node_id, result).await {
            warn!("重新启动本地调度器失败: {}", e);
        }
        result.compute_status();
    }

    /// 调度器在运行且心跳线程活跃
    pub async fn service_threads_activation_state(&self) -> bool {
        self.execution_manager.is_local_node_running().await
            && self.cluster_manager.is_cluster_manager_thread_active().await
    }

    async fn start_cluster_manager_thread(&self) {
        let maintenance: Weak<dyn ClusterMaintenance> = self.self_ref.clone();
        self.cluster_manager
            .start_cluster_manager_thread(maintenance)
            .await;
    }

    /// 任务管理器已释放时返回错误，供后台组件使用
    pub(crate) fn require_alive(this: &Weak<TaskManager>) -> TaskManagerResult<std::sync::Arc<TaskManager>> {
        this.upgrade()
            .ok_or_else(|| TaskManagerError::illegal_state("任务管理器已释放"))
    }
}
