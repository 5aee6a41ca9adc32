//! 测试环境组装与等待工具

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use taskmanager_core::TaskManagerConfig;
use taskmanager_domain::{OperationResult, TaskObject, TaskRepository};
use taskmanager_engine::TaskManager;
use taskmanager_infrastructure::{
    InMemoryJobStore, InMemoryNodeRepository, InMemoryTaskRepository, JobStoreConfig,
};
use tokio::time::sleep;

use crate::mocks::ScriptedNodeClient;

/// 通用等待工具
pub struct TestEnv;

impl TestEnv {
    /// 轮询直到条件成立或超时
    pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if condition().await {
                return true;
            }
            sleep(Duration::from_millis(10)).await;
        }
        condition().await
    }

    pub fn timestamp_with_offset(offset_seconds: i64) -> DateTime<Utc> {
        Utc::now() + chrono::Duration::seconds(offset_seconds)
    }
}

/// 基于内存仓储、内存作业存储和预设节点客户端的任务管理器
pub struct TestTaskManager {
    pub manager: Arc<TaskManager>,
    pub task_repo: Arc<InMemoryTaskRepository>,
    pub node_repo: Arc<InMemoryNodeRepository>,
    pub job_store: Arc<InMemoryJobStore>,
    pub node_client: Arc<ScriptedNodeClient>,
}

impl TestTaskManager {
    /// 测试模式配置，尚未初始化
    pub fn new(node_id: &str) -> Self {
        Self::with_config(TaskManagerConfig::for_testing(node_id))
    }

    pub fn with_config(config: TaskManagerConfig) -> Self {
        Self::with_repositories(
            config,
            Arc::new(InMemoryTaskRepository::new()),
            Arc::new(InMemoryNodeRepository::new()),
        )
    }

    /// 与其他测试节点共享仓储，模拟集群
    pub fn with_repositories(
        config: TaskManagerConfig,
        task_repo: Arc<InMemoryTaskRepository>,
        node_repo: Arc<InMemoryNodeRepository>,
    ) -> Self {
        let job_store = Arc::new(InMemoryJobStore::new(JobStoreConfig {
            thread_pool_size: config.scheduler.thread_pool_size,
            poll_interval: config.scheduler.poll_interval(),
        }));
        let node_client = Arc::new(ScriptedNodeClient::new());
        let manager = TaskManager::new(
            config,
            task_repo.clone(),
            node_repo.clone(),
            job_store.clone(),
            node_client.clone(),
        );
        Self {
            manager,
            task_repo,
            node_repo,
            job_store,
            node_client,
        }
    }

    /// 初始化并启动调度器
    pub async fn started(node_id: &str) -> Self {
        let env = Self::new(node_id);
        env.start().await;
        env
    }

    pub async fn start(&self) {
        let mut result = OperationResult::new("test");
        self.manager.init(&mut result).await.unwrap();
        self.manager.post_init(&mut result).await.unwrap();
    }

    pub async fn add(&self, task: TaskObject) -> String {
        let mut result = OperationResult::new("test");
        self.manager.add_task(task, &mut result).await.unwrap()
    }

    pub async fn get(&self, oid: &str) -> TaskObject {
        self.task_repo.get_task(oid).await.unwrap()
    }

    /// 等待任务在仓储中满足条件
    pub async fn wait_for_task<P>(&self, oid: &str, predicate: P, timeout: Duration) -> bool
    where
        P: Fn(&TaskObject) -> bool,
    {
        let repo = self.task_repo.clone();
        let predicate = &predicate;
        TestEnv::wait_for(
            move || {
                let repo = repo.clone();
                async move {
                    repo.get_task(oid)
                        .await
                        .map(|t| predicate(&t))
                        .unwrap_or(false)
                }
            },
            timeout,
        )
        .await
    }

    pub async fn shutdown(&self) {
        let mut result = OperationResult::new("test");
        self.manager.shutdown(&mut result).await;
    }
}
