use chrono::{DateTime, Utc};
use taskmanager_domain::{
    GetOptions, NodeExecutionStatus, NodeFilter, NodeObject, OperationResult, RunningTaskInfo,
    TaskFilter, TaskObject,
};
use taskmanager_errors::TaskManagerResult;
use tracing::{debug, warn};

use super::TaskManager;
use crate::cluster_status::ClusterStatusInformation;

impl TaskManager {
    /// 查询任务；除非 `no_fetch`，用集群实时状态填充实际执行节点
    pub async fn search_tasks(
        &self,
        filter: &TaskFilter,
        options: GetOptions,
        result: &mut OperationResult,
    ) -> TaskManagerResult<Vec<TaskObject>> {
        let result = result.create_subresult("searchTasks");
        let mut tasks = match self.task_repo.search_tasks(filter).await {
            Ok(tasks) => tasks,
            Err(e) => {
                result.record_fatal_error(e.to_string());
                return Err(e);
            }
        };
        self.enrich_tasks(&mut tasks, options, result).await;
        result.add_param("found", tasks.len());
        result.compute_status();
        Ok(tasks)
    }

    pub(crate) async fn enrich_tasks(
        &self,
        tasks: &mut [TaskObject],
        options: GetOptions,
        result: &mut OperationResult,
    ) {
        if tasks.is_empty() {
            return;
        }
        if !options.no_fetch {
            let status = self
                .execution_manager
                .get_cluster_status_information(false, true, result)
                .await;
            for task in tasks.iter_mut() {
                if let Some(oid) = task.oid.as_deref() {
                    task.node = status
                        .find_node_running_task(oid)
                        .map(|node| node.node_identifier.clone());
                }
            }
        }
        if options.retrieve_next_run_start_time {
            for task in tasks.iter_mut() {
                let Some(oid) = task.oid.as_deref() else {
                    continue;
                };
                match self.execution_manager.get_next_run_start_time(oid).await {
                    Ok(next) => task.next_run_start_timestamp = next,
                    Err(e) => warn!("读取任务 {} 的下次运行时间失败: {}", oid, e),
                }
            }
        }
    }

    pub async fn count_tasks(
        &self,
        filter: &TaskFilter,
        result: &mut OperationResult,
    ) -> TaskManagerResult<usize> {
        let result = result.create_subresult("countTasks");
        match self.task_repo.count_tasks(filter).await {
            Ok(count) => {
                result.record_success();
                Ok(count)
            }
            Err(e) => {
                result.record_fatal_error(e.to_string());
                Err(e)
            }
        }
    }

    /// 查询节点并合并运行期状态；集群状态中没有的节点视为通信错误
    pub async fn search_nodes(
        &self,
        filter: &NodeFilter,
        options: GetOptions,
        result: &mut OperationResult,
    ) -> TaskManagerResult<Vec<NodeObject>> {
        let result = result.create_subresult("searchNodes");
        let mut nodes = match self.node_repo.search_nodes(filter).await {
            Ok(nodes) => nodes,
            Err(e) => {
                result.record_fatal_error(e.to_string());
                return Err(e);
            }
        };
        if !options.no_fetch {
            let status = self
                .execution_manager
                .get_cluster_status_information(false, true, result)
                .await;
            for node in nodes.iter_mut() {
                merge_runtime_status(node, &status);
            }
        }
        result.add_param("found", nodes.len());
        result.compute_status();
        Ok(nodes)
    }

    pub async fn get_node(
        &self,
        oid: &str,
        options: GetOptions,
        result: &mut OperationResult,
    ) -> TaskManagerResult<NodeObject> {
        let result = result.create_subresult("getNode");
        result.add_param("oid", oid);
        let mut node = match self.node_repo.get_node(oid).await {
            Ok(node) => node,
            Err(e) => {
                result.record_fatal_error(e.to_string());
                return Err(e);
            }
        };
        if !options.no_fetch {
            let status = self
                .execution_manager
                .get_cluster_status_information(false, true, result)
                .await;
            merge_runtime_status(&mut node, &status);
        }
        result.compute_status();
        Ok(node)
    }

    pub async fn count_nodes(
        &self,
        filter: &NodeFilter,
        result: &mut OperationResult,
    ) -> TaskManagerResult<usize> {
        let result = result.create_subresult("countNodes");
        match self.node_repo.count_nodes(filter).await {
            Ok(count) => {
                result.record_success();
                Ok(count)
            }
            Err(e) => {
                result.record_fatal_error(e.to_string());
                Err(e)
            }
        }
    }

    pub async fn get_cluster_status_information(
        &self,
        force_refresh: bool,
        allow_cached: bool,
        result: &mut OperationResult,
    ) -> ClusterStatusInformation {
        self.execution_manager
            .get_cluster_status_information(force_refresh, allow_cached, result)
            .await
    }

    pub async fn locally_running_tasks(&self) -> Vec<RunningTaskInfo> {
        self.execution_manager.locally_running_tasks().await
    }

    pub async fn get_next_run_start_time(
        &self,
        oid: &str,
        result: &mut OperationResult,
    ) -> TaskManagerResult<Option<DateTime<Utc>>> {
        let result = result.create_subresult("getNextRunStartTime");
        result.add_param("oid", oid);
        match self.execution_manager.get_next_run_start_time(oid).await {
            Ok(next) => {
                result.record_success();
                Ok(next)
            }
            Err(e) => {
                result.record_fatal_error(e.to_string());
                Err(e)
            }
        }
    }
}

fn merge_runtime_status(node: &mut NodeObject, status: &ClusterStatusInformation) {
    match status.node(&node.node_identifier) {
        Some(runtime) => {
            node.execution_status = runtime.node.execution_status;
            node.error_status = runtime.node.error_status;
            node.connection_result = runtime.node.connection_result.clone();
        }
        None if !node.running => {
            node.execution_status = Some(NodeExecutionStatus::Down);
        }
        None => {
            debug!("集群状态中没有节点 {}", node.node_identifier);
            node.execution_status = Some(NodeExecutionStatus::CommunicationError);
        }
    }
}
