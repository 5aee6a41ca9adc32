use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use taskmanager_api::{create_app, AppState};
use taskmanager_core::TaskManagerConfig;
use taskmanager_domain::{NodeRepository, OperationResult, TaskRepository};
use taskmanager_engine::TaskManager;
use taskmanager_infrastructure::{
    DatabaseManager, HttpNodeClient, InMemoryJobStore, InMemoryNodeRepository,
    InMemoryTaskRepository, JobStoreConfig, SqliteNodeRepository, SqliteTaskRepository,
};
use tokio::{net::TcpListener, sync::broadcast};
use tracing::{error, info, warn};

/// 组装好的任务管理器节点
pub struct Application {
    config: TaskManagerConfig,
    task_manager: Arc<TaskManager>,
    prometheus: Option<PrometheusHandle>,
}

impl Application {
    pub async fn new(config: TaskManagerConfig) -> Result<Self> {
        info!("初始化任务管理器节点: {}", config.node_id());

        // recorder 必须先于任务管理器安装，指标句柄在构造时绑定
        let prometheus = if config.observability.metrics_enabled {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .context("安装Prometheus指标记录器失败")?;
            Some(handle)
        } else {
            None
        };

        let (task_repo, node_repo) = create_repositories(&config).await?;
        let job_store = Arc::new(InMemoryJobStore::new(JobStoreConfig {
            thread_pool_size: config.scheduler.thread_pool_size,
            poll_interval: config.scheduler.poll_interval(),
        }));
        let node_client = Arc::new(
            HttpNodeClient::new(config.cluster.remote_call_timeout())
                .context("创建节点客户端失败")?,
        );

        let task_manager = TaskManager::new(
            config.clone(),
            task_repo,
            node_repo,
            job_store,
            node_client,
        );
        task_manager.register_builtin_handlers();

        Ok(Self {
            config,
            task_manager,
            prometheus,
        })
    }

    /// 初始化节点、启动调度器并提供管理接口，直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let mut result = OperationResult::new("startup");
        self.task_manager
            .init(&mut result)
            .await
            .context("任务管理器初始化失败")?;
        self.task_manager
            .post_init(&mut result)
            .await
            .context("任务管理器启动失败")?;
        result.compute_status();
        if result.is_error() {
            warn!("任务管理器启动时出现错误: {:?}", result.message);
        }
        info!(
            "任务管理器已启动，调度器运行中: {}",
            self.task_manager.is_running().await
        );

        if !self.config.api.enabled {
            info!("管理接口已禁用");
            let _ = shutdown_rx.recv().await;
            return Ok(());
        }

        let mut state = AppState::new(Arc::clone(&self.task_manager));
        if let Some(handle) = &self.prometheus {
            state = state.with_prometheus(handle.clone());
        }
        let app = create_app(state);

        let listener = TcpListener::bind(&self.config.api.bind_address)
            .await
            .with_context(|| format!("绑定管理接口地址失败: {}", self.config.api.bind_address))?;
        info!("管理接口监听: {}", self.config.api.bind_address);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("管理接口停止接收请求");
            })
            .await
            .context("管理接口运行失败")?;
        Ok(())
    }

    /// 停止本地任务和调度器并记录节点关闭
    pub async fn shutdown(&self, timeout: Duration) {
        let mut result = OperationResult::new("shutdown");
        match tokio::time::timeout(timeout, self.task_manager.shutdown(&mut result)).await {
            Ok(()) => {
                if result.is_error() {
                    warn!("任务管理器关闭时出现错误: {:?}", result.message);
                } else {
                    info!("任务管理器已关闭");
                }
            }
            Err(_) => error!("任务管理器关闭超时 ({:?})", timeout),
        }
    }
}

async fn create_repositories(
    config: &TaskManagerConfig,
) -> Result<(Arc<dyn TaskRepository>, Arc<dyn NodeRepository>)> {
    if config.database.is_memory() {
        info!("使用内存仓储，数据不会持久化");
        return Ok((
            Arc::new(InMemoryTaskRepository::new()),
            Arc::new(InMemoryNodeRepository::new()),
        ));
    }

    let database = DatabaseManager::new(&config.database.url, config.database.max_connections)
        .await
        .with_context(|| format!("连接数据库失败: {}", config.database.url))?;
    database.migrate().await?;
    info!("使用SQLite仓储: {}", config.database.url);
    Ok((
        Arc::new(SqliteTaskRepository::new(database.pool().clone())),
        Arc::new(SqliteNodeRepository::new(database.pool().clone())),
    ))
}
