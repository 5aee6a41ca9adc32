//! 执行管理器
//!
//! 把任务生命周期翻译成作业存储上的操作，跟踪本节点正在执行的任务，
//! 并汇总整个集群的运行状态。仓储是权威数据源，调度器同步失败只记录日志，
//! 由周期性的全量同步修复。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use taskmanager_core::TaskManagerConfig;
use taskmanager_domain::{
    CancellationFlag, JobStore, JobStoreState, NodeClient, NodeExecutionStatus, NodeFilter,
    NodeObject, NodeRepository, NodeStatusReport, OperationResult, RunningTaskInfo, TaskExecutionStatus,
    TaskFilter, TaskObject, TaskRepository, TriggerSpec,
};
use taskmanager_errors::{TaskManagerError, TaskManagerResult};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::cluster_status::{ClusterStatusInformation, NodeRuntimeInfo, StopWait};
use crate::metrics::TaskManagerMetrics;
use crate::node_state::LocalNodeState;

/// 本节点上正在执行的任务
#[derive(Debug, Clone)]
pub struct RunningTask {
    pub oid: String,
    pub task_identifier: String,
    pub cancel: CancellationFlag,
    pub started_at: DateTime<Utc>,
}

pub struct ExecutionManager {
    config: Arc<TaskManagerConfig>,
    node_state: Arc<LocalNodeState>,
    job_store: Arc<dyn JobStore>,
    node_client: Arc<dyn NodeClient>,
    task_repo: Arc<dyn TaskRepository>,
    node_repo: Arc<dyn NodeRepository>,
    metrics: Arc<TaskManagerMetrics>,
    running_tasks: RwLock<HashMap<String, RunningTask>>,
    status_cache: RwLock<Option<(Instant, ClusterStatusInformation)>>,
}

impl ExecutionManager {
    pub fn new(
        config: Arc<TaskManagerConfig>,
        node_state: Arc<LocalNodeState>,
        job_store: Arc<dyn JobStore>,
        node_client: Arc<dyn NodeClient>,
        task_repo: Arc<dyn TaskRepository>,
        node_repo: Arc<dyn NodeRepository>,
        metrics: Arc<TaskManagerMetrics>,
    ) -> Self {
        Self {
            config,
            node_state,
            job_store,
            node_client,
            task_repo,
            node_repo,
            metrics,
            running_tasks: RwLock::new(HashMap::new()),
            status_cache: RwLock::new(None),
        }
    }

    pub fn job_store(&self) -> &Arc<dyn JobStore> {
        &self.job_store
    }

    fn node_id(&self) -> &str {
        self.node_state.node_id()
    }

    // ---- 本地运行集合 ----

    pub async fn register_running_task(&self, task: &TaskObject, cancel: CancellationFlag) {
        let Some(oid) = task.oid.clone() else {
            return;
        };
        let mut running = self.running_tasks.write().await;
        running.insert(
            oid.clone(),
            RunningTask {
                oid,
                task_identifier: task.task_identifier.clone(),
                cancel,
                started_at: Utc::now(),
            },
        );
        self.metrics.set_locally_running_tasks(running.len());
    }

    pub async fn unregister_running_task(&self, oid: &str) {
        let mut running = self.running_tasks.write().await;
        running.remove(oid);
        self.metrics.set_locally_running_tasks(running.len());
    }

    pub async fn locally_running_tasks(&self) -> Vec<RunningTaskInfo> {
        let mut tasks: Vec<RunningTaskInfo> = self
            .running_tasks
            .read()
            .await
            .values()
            .map(|t| RunningTaskInfo {
                oid: t.oid.clone(),
                task_identifier: t.task_identifier.clone(),
                started_at: t.started_at,
            })
            .collect();
        tasks.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        tasks
    }

    pub async fn is_task_running_locally(&self, oid: &str) -> bool {
        self.running_tasks.read().await.contains_key(oid)
    }

    /// 给本地正在执行的任务发取消信号，返回是否找到该任务
    pub async fn stop_local_task(&self, oid: &str) -> bool {
        match self.running_tasks.read().await.get(oid) {
            Some(task) => {
                info!("通知本地任务 {} 停止", oid);
                task.cancel.cancel();
                true
            }
            None => false,
        }
    }

    async fn cancel_local(&self, oids: &HashSet<String>) {
        for task in self.running_tasks.read().await.values() {
            if oids.contains(&task.oid) {
                task.cancel.cancel();
            }
        }
    }

    // ---- 本地节点 ----

    pub async fn local_node_execution_status(&self) -> NodeExecutionStatus {
        if self.node_state.is_in_error_state().await {
            return NodeExecutionStatus::Error;
        }
        match self.job_store.state().await {
            JobStoreState::Started => NodeExecutionStatus::Running,
            JobStoreState::Standby => NodeExecutionStatus::Paused,
            JobStoreState::Shutdown => NodeExecutionStatus::Down,
        }
    }

    pub async fn local_node_info(&self) -> NodeObject {
        let status = self.local_node_execution_status().await;
        self.node_state.to_node_object(status).await
    }

    /// 管理接口返回给其他节点的本节点状态
    pub async fn local_node_report(&self) -> NodeStatusReport {
        NodeStatusReport {
            node: self.local_node_info().await,
            running_tasks: self.locally_running_tasks().await,
        }
    }

    pub async fn is_local_node_running(&self) -> bool {
        self.job_store.state().await == JobStoreState::Started
    }

    // ---- 调度器启停 ----

    pub async fn start_local_scheduler(&self) -> TaskManagerResult<()> {
        if self.node_state.is_in_error_state().await {
            let status = self.node_state.error_status().await;
            warn!("节点 {} 处于错误状态 {:?}，拒绝启动调度器", self.node_id(), status);
            return Err(TaskManagerError::NodeInErrorState(format!(
                "{}: {:?}",
                self.node_id(),
                status
            )));
        }
        self.job_store.start().await?;
        self.invalidate_cluster_status_cache().await;
        info!("本地调度器已启动");
        Ok(())
    }

    pub async fn stop_local_scheduler(&self) -> TaskManagerResult<()> {
        if self.job_store.state().await == JobStoreState::Shutdown {
            return Ok(());
        }
        self.job_store.standby().await?;
        self.invalidate_cluster_status_cache().await;
        info!("本地调度器已暂停");
        Ok(())
    }

    /// 测试模式下只进入待机，便于同一进程内重新启动
    pub async fn shutdown_local_scheduler(&self) -> TaskManagerResult<()> {
        if self.config.node.test_mode {
            return self.stop_local_scheduler().await;
        }
        self.job_store.shutdown(false).await?;
        self.invalidate_cluster_status_cache().await;
        info!("本地调度器已关闭");
        Ok(())
    }

    async fn find_node(&self, node_identifier: &str) -> TaskManagerResult<NodeObject> {
        self.node_repo
            .search_nodes(&NodeFilter::with_identifier(node_identifier))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| TaskManagerError::node_not_found(node_identifier))
    }

    pub async fn start_scheduler(
        &self,
        node_identifier: &str,
        result: &mut OperationResult,
    ) -> TaskManagerResult<()> {
        let sub = result.create_subresult("startScheduler");
        sub.add_param("node", node_identifier);

        let outcome = if node_identifier == self.node_id() {
            self.start_local_scheduler().await
        } else {
            match self.find_node(node_identifier).await {
                Ok(node) => self.node_client.start_scheduler(&node).await,
                Err(e) => Err(e),
            }
        };
        self.invalidate_cluster_status_cache().await;

        match outcome {
            Ok(()) => {
                sub.record_success();
                Ok(())
            }
            Err(e) => {
                error!("启动节点 {} 的调度器失败: {}", node_identifier, e);
                sub.record_fatal_error(e.to_string());
                Err(e)
            }
        }
    }

    pub async fn stop_scheduler(
        &self,
        node_identifier: &str,
        result: &mut OperationResult,
    ) -> TaskManagerResult<()> {
        let sub = result.create_subresult("stopScheduler");
        sub.add_param("node", node_identifier);

        let outcome = if node_identifier == self.node_id() {
            self.stop_local_scheduler().await
        } else {
            match self.find_node(node_identifier).await {
                Ok(node) => self.node_client.stop_scheduler(&node).await,
                Err(e) => Err(e),
            }
        };
        self.invalidate_cluster_status_cache().await;

        match outcome {
            Ok(()) => {
                sub.record_success();
                Ok(())
            }
            Err(e) => {
                error!("暂停节点 {} 的调度器失败: {}", node_identifier, e);
                sub.record_fatal_error(e.to_string());
                Err(e)
            }
        }
    }

    /// 暂停本地调度器并停止本节点上的所有任务
    pub async fn stop_scheduler_and_tasks_locally(
        &self,
        timeout: Option<Duration>,
    ) -> TaskManagerResult<bool> {
        self.stop_local_scheduler().await?;
        Ok(self.stop_all_tasks_on_this_node_and_wait(timeout).await)
    }

    pub async fn stop_all_tasks_on_this_node_and_wait(&self, timeout: Option<Duration>) -> bool {
        let mut oids: HashSet<String> = self.running_tasks.read().await.keys().cloned().collect();
        oids.extend(self.job_store.currently_executing().await);
        if oids.is_empty() {
            return true;
        }
        info!("停止本节点上的 {} 个任务", oids.len());
        self.cancel_local(&oids).await;
        let still_running = self
            .await_stopped(&oids, StopWait::from_timeout(timeout), false)
            .await;
        if !still_running.is_empty() {
            warn!("{} 个本地任务未在超时内停止", still_running.len());
        }
        still_running.is_empty()
    }

    /// 对多个节点暂停调度器并停止任务；远程节点未给出超时时使用关闭等待时间
    pub async fn stop_schedulers_and_tasks(
        &self,
        node_identifiers: &[String],
        timeout: Option<Duration>,
        result: &mut OperationResult,
    ) -> bool {
        let sub = result.create_subresult("stopSchedulersAndTasks");
        sub.add_param("nodes", node_identifiers.join(","));
        let mut all_stopped = true;

        for node_identifier in node_identifiers {
            let node_result = sub.create_subresult("stopSchedulerAndTasks");
            node_result.add_param("node", node_identifier);

            let outcome = if node_identifier == self.node_id() {
                self.stop_scheduler_and_tasks_locally(timeout).await
            } else {
                let remote_timeout = timeout.unwrap_or(self.config.scheduler.wait_on_shutdown());
                match self.find_node(node_identifier).await {
                    Ok(node) => {
                        self.node_client
                            .stop_scheduler_and_tasks(&node, remote_timeout)
                            .await
                    }
                    Err(e) => Err(e),
                }
            };

            match outcome {
                Ok(true) => node_result.record_success(),
                Ok(false) => {
                    all_stopped = false;
                    node_result.record_warning("部分任务未在超时内停止");
                }
                Err(e) => {
                    all_stopped = false;
                    error!("停止节点 {} 的调度器和任务失败: {}", node_identifier, e);
                    node_result.record_fatal_error(e.to_string());
                }
            }
        }

        self.invalidate_cluster_status_cache().await;
        sub.compute_status();
        all_stopped
    }

    // ---- 任务与作业同步 ----

    /// 按任务状态调整作业和触发器，幂等
    ///
    /// 失败只记录警告并返回 false，仓储中的状态保持权威。
    pub async fn synchronize_task(&self, task: &TaskObject, result: &mut OperationResult) -> bool {
        let sub = result.create_subresult("synchronizeTask");
        let Some(oid) = task.oid.as_deref() else {
            sub.record_not_applicable();
            return true;
        };
        sub.add_param("oid", oid);

        match self.reconcile_job(task, oid).await {
            Ok(action) => {
                debug!("任务 {} 与调度器同步完成: {}", oid, action);
                sub.add_param("action", action);
                sub.record_success();
                true
            }
            Err(e) => {
                error!("任务 {} 与调度器同步失败: {}", oid, e);
                self.metrics.record_scheduler_sync_failure();
                sub.record_warning(format!("调度器同步失败，等待下一次全量同步修复: {e}"));
                false
            }
        }
    }

    async fn reconcile_job(&self, task: &TaskObject, oid: &str) -> TaskManagerResult<&'static str> {
        if task.execution_status == TaskExecutionStatus::Closed {
            let existed = self.job_store.delete_job(oid).await?;
            return Ok(if existed { "removed" } else { "absent" });
        }

        let mut action = "updated";
        if !self.job_store.check_exists(oid).await? {
            self.job_store.add_job(oid, true).await?;
            action = "created";
        }

        match task.execution_status {
            TaskExecutionStatus::Suspended => {
                self.job_store.pause_job(oid).await?;
            }
            TaskExecutionStatus::Waiting => {
                self.ensure_trigger(task, oid, true).await?;
                self.job_store.pause_job(oid).await?;
            }
            TaskExecutionStatus::Runnable => {
                self.ensure_trigger(task, oid, false).await?;
                self.job_store.resume_job(oid).await?;
            }
            TaskExecutionStatus::Closed => {}
        }
        Ok(action)
    }

    /// 触发器与期望一致时保留，避免重置下次触发时间
    async fn ensure_trigger(&self, task: &TaskObject, oid: &str, paused: bool) -> TaskManagerResult<()> {
        let existing = self.job_store.triggers_of(oid).await?;
        let Some(desired) = self.desired_trigger(task, oid).await else {
            if task.is_recurring() && !existing.is_empty() {
                self.job_store.unschedule_triggers(oid).await?;
            }
            return Ok(());
        };

        if existing.iter().any(|t| same_trigger(&t.spec, &desired)) {
            return Ok(());
        }
        let next_fire = self.job_store.schedule_trigger(oid, desired, paused).await?;
        debug!("任务 {} 的触发器已重建，下次触发: {:?}", oid, next_fire);
        Ok(())
    }

    async fn desired_trigger(&self, task: &TaskObject, oid: &str) -> Option<TriggerSpec> {
        if task.is_recurring() {
            let schedule = task.schedule.as_ref()?;
            if let Some(seconds) = schedule.interval_seconds {
                return Some(TriggerSpec::Interval { seconds });
            }
            if let Some(expression) = &schedule.cron {
                return Some(TriggerSpec::Cron {
                    expression: expression.clone(),
                });
            }
            warn!("周期任务 {} 没有调度规则，不创建触发器", oid);
            return None;
        }

        // 正在执行的单次任务不再追加触发器
        if self
            .job_store
            .currently_executing()
            .await
            .iter()
            .any(|key| key == oid)
        {
            return None;
        }
        Some(TriggerSpec::Once { at: Utc::now() })
    }

    /// 删除作业及其触发器；作业不存在时返回 `Ok(false)`
    pub async fn remove_task_from_scheduler(&self, oid: &str) -> TaskManagerResult<bool> {
        let removed = self.job_store.delete_job(oid).await?;
        if removed {
            debug!("已从调度器移除任务 {}", oid);
        }
        Ok(removed)
    }

    pub async fn pause_task_job(&self, oid: &str) -> TaskManagerResult<()> {
        if self.job_store.check_exists(oid).await? {
            self.job_store.pause_job(oid).await?;
        }
        Ok(())
    }

    pub async fn unschedule_task(&self, oid: &str) -> TaskManagerResult<()> {
        self.job_store.unschedule_triggers(oid).await
    }

    /// 立即触发一次可运行任务
    pub async fn schedule_runnable_task_now(&self, task: &TaskObject) -> TaskManagerResult<()> {
        let oid = task.oid.as_deref().ok_or_else(|| {
            TaskManagerError::illegal_state("只有持久化任务可以被调度")
        })?;
        if task.execution_status != TaskExecutionStatus::Runnable {
            return Err(TaskManagerError::illegal_state(format!(
                "任务 {} 当前状态为 {}，不能立即运行",
                oid, task.execution_status
            )));
        }
        self.job_store.add_job(oid, true).await?;
        self.job_store.trigger_now(oid).await?;
        info!("任务 {} 已安排立即运行", oid);
        Ok(())
    }

    pub async fn get_next_run_start_time(
        &self,
        oid: &str,
    ) -> TaskManagerResult<Option<DateTime<Utc>>> {
        let triggers = self.job_store.triggers_of(oid).await?;
        Ok(triggers
            .iter()
            .filter(|t| !t.paused)
            .filter_map(|t| t.next_fire_time)
            .min())
    }

    /// 全量同步：每个仓储任务同步一次，移除没有对应任务的作业
    pub async fn synchronize_job_stores(&self, result: &mut OperationResult) {
        let sub = result.create_subresult("synchronizeJobStores");
        let tasks = match self.task_repo.search_tasks(&TaskFilter::all()).await {
            Ok(tasks) => tasks,
            Err(e) => {
                error!("全量同步时查询任务失败: {}", e);
                sub.record_fatal_error(format!("查询任务失败: {e}"));
                return;
            }
        };

        let mut synchronized = 0usize;
        let mut failed = 0usize;
        let mut known_oids = HashSet::new();
        for task in &tasks {
            if let Some(oid) = &task.oid {
                known_oids.insert(oid.clone());
            }
            let mut task_result = OperationResult::new("synchronizeTask");
            if self.synchronize_task(task, &mut task_result).await {
                synchronized += 1;
            } else {
                failed += 1;
            }
        }

        let mut removed = 0usize;
        match self.job_store.job_keys().await {
            Ok(keys) => {
                for key in keys.iter().filter(|k| !known_oids.contains(*k)) {
                    match self.job_store.delete_job(key).await {
                        Ok(_) => {
                            info!("移除没有对应任务的作业: {}", key);
                            removed += 1;
                        }
                        Err(e) => {
                            warn!("移除孤立作业 {} 失败: {}", key, e);
                            failed += 1;
                        }
                    }
                }
            }
            Err(e) => {
                warn!("列出作业失败: {}", e);
                failed += 1;
            }
        }

        sub.add_param("synchronized", synchronized);
        sub.add_param("removed", removed);
        sub.add_param("failed", failed);
        if failed > 0 {
            sub.record_warning(format!("{failed} 个任务或作业同步失败"));
        } else {
            sub.record_success();
        }
        self.metrics.record_job_store_sync();
        info!(
            "作业存储全量同步完成: 同步 {} 个任务，移除 {} 个孤立作业，失败 {}",
            synchronized, removed, failed
        );
    }

    // ---- 集群状态 ----

    pub async fn invalidate_cluster_status_cache(&self) {
        *self.status_cache.write().await = None;
    }

    /// 汇总集群状态；远程节点失败只把该节点标为通信错误，查询本身不会失败
    pub async fn get_cluster_status_information(
        &self,
        force_refresh: bool,
        allow_cached: bool,
        result: &mut OperationResult,
    ) -> ClusterStatusInformation {
        let sub = result.create_subresult("getClusterStatusInformation");
        let ttl = self.config.cluster.status_cache_ttl();
        if allow_cached && !force_refresh && !ttl.is_zero() {
            if let Some((taken_at, cached)) = self.status_cache.read().await.as_ref() {
                if taken_at.elapsed() < ttl {
                    sub.add_param("cached", true);
                    sub.record_success();
                    return cached.clone();
                }
            }
        }

        let (info, communication_errors) = self.fetch_cluster_status().await;
        sub.add_param("nodes", info.nodes().len());
        if communication_errors > 0 {
            sub.record_warning(format!("{communication_errors} 个节点无法通信"));
        } else {
            sub.record_success();
        }
        info
    }

    async fn fetch_cluster_status(&self) -> (ClusterStatusInformation, usize) {
        let started = Instant::now();
        let mut info = ClusterStatusInformation::new();
        info.add_node_info(self.local_node_info().await, self.locally_running_tasks().await);

        let mut communication_errors = 0;
        if self.node_state.is_clustered() {
            match self.node_repo.search_nodes(&NodeFilter::all()).await {
                Ok(nodes) => {
                    let remote = nodes
                        .into_iter()
                        .filter(|n| n.node_identifier != self.node_id())
                        .map(|n| self.query_remote_node(n));
                    for runtime in join_all(remote).await {
                        if runtime.node.execution_status
                            == Some(NodeExecutionStatus::CommunicationError)
                        {
                            communication_errors += 1;
                        }
                        info.add_node_info(runtime.node, runtime.running_tasks);
                    }
                }
                Err(e) => warn!("查询集群节点列表失败，只返回本节点状态: {}", e),
            }
        }

        self.metrics
            .record_cluster_status_query(started.elapsed().as_secs_f64());
        *self.status_cache.write().await = Some((Instant::now(), info.clone()));
        (info, communication_errors)
    }

    async fn query_remote_node(&self, mut node: NodeObject) -> NodeRuntimeInfo {
        let mut connection = OperationResult::new("queryNodeStatus");
        connection.add_param("node", &node.node_identifier);

        if !node.running {
            node.execution_status = Some(NodeExecutionStatus::Down);
            connection.record_not_applicable();
            node.connection_result = Some(connection);
            return NodeRuntimeInfo {
                node,
                running_tasks: Vec::new(),
            };
        }

        let timeout = self.config.cluster.remote_call_timeout();
        let outcome = match tokio::time::timeout(timeout, self.node_client.node_status(&node)).await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(TaskManagerError::Timeout(format!(
                "查询节点 {} 状态超过 {:?}",
                node.node_identifier, timeout
            ))),
        };

        match outcome {
            Ok(report) => {
                node.execution_status = report
                    .node
                    .execution_status
                    .or(Some(NodeExecutionStatus::Running));
                node.error_status = report.node.error_status;
                connection.record_success();
                node.connection_result = Some(connection);
                NodeRuntimeInfo {
                    node,
                    running_tasks: report.running_tasks,
                }
            }
            Err(e) => {
                warn!("查询节点 {} 状态失败: {}", node.node_identifier, e);
                self.metrics
                    .record_node_communication_error(&node.node_identifier);
                node.execution_status = Some(NodeExecutionStatus::CommunicationError);
                connection.record_fatal_error(e.to_string());
                node.connection_result = Some(connection);
                NodeRuntimeInfo {
                    node,
                    running_tasks: Vec::new(),
                }
            }
        }
    }

    // ---- 停止任务 ----

    /// 通知任务停止并按 `wait` 等待；返回是否确认全部停止
    ///
    /// 等待期间的状态检查总是绕过集群状态缓存。
    pub async fn stop_tasks_run_and_wait(
        &self,
        tasks: &[TaskObject],
        wait: StopWait,
        also_clusterwide: bool,
        result: &mut OperationResult,
    ) -> bool {
        let sub = result.create_subresult("stopTasksRunAndWait");
        let oids: HashSet<String> = tasks.iter().filter_map(|t| t.oid.clone()).collect();
        sub.add_param("tasks", oids.len());
        if oids.is_empty() {
            sub.record_success();
            return true;
        }

        if wait == StopWait::DoNotStop {
            let running = self.await_stopped(&oids, StopWait::DoNotWait, false).await;
            sub.record_not_applicable();
            return running.is_empty();
        }

        self.cancel_local(&oids).await;
        if also_clusterwide && self.node_state.is_clustered() {
            let (info, _) = self.fetch_cluster_status().await;
            for oid in &oids {
                let Some(node) = info.find_node_running_task(oid) else {
                    continue;
                };
                if node.node_identifier == self.node_id() {
                    continue;
                }
                if let Err(e) = self.node_client.stop_task(node, oid).await {
                    warn!("通知节点 {} 停止任务 {} 失败: {}", node.node_identifier, oid, e);
                    sub.create_subresult("stopRemoteTask")
                        .record_warning(e.to_string());
                }
            }
        }

        let still_running = self.await_stopped(&oids, wait, also_clusterwide).await;
        if still_running.is_empty() {
            sub.record_success();
            true
        } else {
            let mut remaining: Vec<String> = still_running.into_iter().collect();
            remaining.sort();
            sub.add_param("stillRunning", remaining.join(","));
            sub.record_warning(format!("{} 个任务未在等待时间内停止", remaining.len()));
            false
        }
    }

    /// 轮询直到任务全部停止或等待结束，返回仍在运行的 OID
    async fn await_stopped(
        &self,
        oids: &HashSet<String>,
        wait: StopWait,
        also_clusterwide: bool,
    ) -> HashSet<String> {
        let deadline = match wait {
            StopWait::For(duration) => Some(Instant::now() + duration),
            _ => None,
        };
        let poll_interval = self.config.scheduler.stop_poll_interval();

        loop {
            let still_running = self.running_among(oids, also_clusterwide).await;
            if still_running.is_empty() {
                return still_running;
            }
            let expired = match wait {
                StopWait::Indefinitely => false,
                StopWait::For(_) => deadline.map(|d| Instant::now() >= d).unwrap_or(true),
                StopWait::DoNotWait | StopWait::DoNotStop => true,
            };
            if expired {
                return still_running;
            }
            // 等待期间新启动的本地运行同样需要停止
            self.cancel_local(&still_running).await;
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// 本地运行集合加上作业存储中仍在执行的作业
    ///
    /// 作业已触发但执行器尚未登记本地运行时，只有作业存储知道它在执行。
    async fn running_among(&self, oids: &HashSet<String>, also_clusterwide: bool) -> HashSet<String> {
        let mut running: HashSet<String> = self
            .running_tasks
            .read()
            .await
            .keys()
            .filter(|oid| oids.contains(*oid))
            .cloned()
            .collect();
        running.extend(
            self.job_store
                .currently_executing()
                .await
                .into_iter()
                .filter(|oid| oids.contains(oid)),
        );
        if also_clusterwide && self.node_state.is_clustered() {
            let (info, _) = self.fetch_cluster_status().await;
            running.extend(
                info.all_running_task_oids()
                    .into_iter()
                    .filter(|oid| oids.contains(oid)),
            );
        }
        running
    }
}

fn same_trigger(existing: &TriggerSpec, desired: &TriggerSpec) -> bool {
    match (existing, desired) {
        (TriggerSpec::Once { .. }, TriggerSpec::Once { .. }) => true,
        (a, b) => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_trigger_ignores_once_time() {
        let now = Utc::now();
        assert!(same_trigger(
            &TriggerSpec::Once { at: now },
            &TriggerSpec::Once {
                at: now + chrono::Duration::seconds(5)
            }
        ));
        assert!(same_trigger(
            &TriggerSpec::Interval { seconds: 5 },
            &TriggerSpec::Interval { seconds: 5 }
        ));
        assert!(!same_trigger(
            &TriggerSpec::Interval { seconds: 5 },
            &TriggerSpec::Interval { seconds: 6 }
        ));
        assert!(!same_trigger(
            &TriggerSpec::Cron {
                expression: "0 * * * * *".to_string()
            },
            &TriggerSpec::Interval { seconds: 60 }
        ));
    }
}
