//! 任务管理器门面
//!
//! 对外的唯一入口：任务与节点的增删改查、挂起恢复、清理以及处理器注册。
//! 持有执行管理器和集群管理器，处理器注册表、集群状态缓存等状态都归本实例所有。

mod cluster;
mod lifecycle;
mod maintenance;
mod search;
mod tasks;
mod transitions;

use std::sync::{Arc, Weak};

use taskmanager_core::TaskManagerConfig;
use taskmanager_domain::{
    JobStore, NodeClient, NodeRepository, OperationResult, TaskObject, TaskRepository,
};
use tracing::info;

use crate::cluster_manager::ClusterManager;
use crate::dependency_checker::DependencyChecker;
use crate::execution_manager::ExecutionManager;
use crate::handler::{HandlerRegistry, TaskHandler};
use crate::identifier::LightweightIdentifierGenerator;
use crate::job_executor::JobExecutor;
use crate::metrics::TaskManagerMetrics;
use crate::node_state::LocalNodeState;
use crate::task::TaskInstance;

pub use maintenance::{CleanupPolicy, CleanupSummary};

pub struct TaskManager {
    config: Arc<TaskManagerConfig>,
    node_state: Arc<LocalNodeState>,
    task_repo: Arc<dyn TaskRepository>,
    node_repo: Arc<dyn NodeRepository>,
    execution_manager: Arc<ExecutionManager>,
    cluster_manager: Arc<ClusterManager>,
    handlers: HandlerRegistry,
    dependency_checker: DependencyChecker,
    identifiers: LightweightIdentifierGenerator,
    metrics: Arc<TaskManagerMetrics>,
    self_ref: Weak<TaskManager>,
}

impl TaskManager {
    pub fn new(
        config: TaskManagerConfig,
        task_repo: Arc<dyn TaskRepository>,
        node_repo: Arc<dyn NodeRepository>,
        job_store: Arc<dyn JobStore>,
        node_client: Arc<dyn NodeClient>,
    ) -> Arc<Self> {
        let config = Arc::new(config);
        let node_state = Arc::new(LocalNodeState::from_config(&config));
        let metrics = Arc::new(TaskManagerMetrics::new());

        let execution_manager = Arc::new(ExecutionManager::new(
            Arc::clone(&config),
            Arc::clone(&node_state),
            Arc::clone(&job_store),
            node_client,
            Arc::clone(&task_repo),
            Arc::clone(&node_repo),
            Arc::clone(&metrics),
        ));
        let cluster_manager = Arc::new(ClusterManager::new(
            Arc::clone(&config),
            Arc::clone(&node_state),
            Arc::clone(&node_repo),
            Arc::clone(&metrics),
        ));

        let manager = Arc::new_cyclic(|self_ref| Self {
            identifiers: LightweightIdentifierGenerator::new(node_state.node_id()),
            dependency_checker: DependencyChecker::new(Arc::clone(&task_repo)),
            config,
            node_state,
            task_repo,
            node_repo,
            execution_manager,
            cluster_manager,
            handlers: HandlerRegistry::new(),
            metrics,
            self_ref: self_ref.clone(),
        });

        job_store.set_job_runner(Arc::new(JobExecutor::new(Arc::downgrade(&manager))));
        info!("任务管理器已创建，节点: {}", manager.node_id());
        manager
    }

    pub fn config(&self) -> &TaskManagerConfig {
        &self.config
    }

    pub fn execution_manager(&self) -> &Arc<ExecutionManager> {
        &self.execution_manager
    }

    pub fn cluster_manager(&self) -> &Arc<ClusterManager> {
        &self.cluster_manager
    }

    pub(crate) fn task_repository(&self) -> &Arc<dyn TaskRepository> {
        &self.task_repo
    }

    pub(crate) fn metrics(&self) -> &Arc<TaskManagerMetrics> {
        &self.metrics
    }

    pub fn node_id(&self) -> &str {
        self.node_state.node_id()
    }

    // ---- 处理器注册表 ----

    pub fn register_handler<S: Into<String>>(&self, uri: S, handler: Arc<dyn TaskHandler>) {
        self.handlers.register_handler(uri, handler);
    }

    pub fn get_handler(&self, uri: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get_handler(uri)
    }

    pub fn all_task_categories(&self) -> Vec<String> {
        self.handlers.all_task_categories()
    }

    pub fn handler_uri_for_category(&self, category: &str) -> Option<String> {
        self.handlers.handler_uri_for_category(category)
    }

    /// 注册内置的空操作和清理处理器
    pub fn register_builtin_handlers(self: &Arc<Self>) {
        use crate::handlers::{CleanupTaskHandler, NoOpTaskHandler, CLEANUP_HANDLER_URI, NOOP_HANDLER_URI};

        self.register_handler(NOOP_HANDLER_URI, Arc::new(NoOpTaskHandler::new()));
        self.register_handler(
            CLEANUP_HANDLER_URI,
            Arc::new(CleanupTaskHandler::new(Arc::downgrade(self))),
        );
    }

    // ---- 任务实例工厂 ----

    /// 新建临时任务，分配轻量级标识
    pub fn create_task_instance(&self, operation: &str) -> TaskInstance {
        let mut object = TaskObject::new(self.identifiers.generate(), operation);
        object.result = Some(OperationResult::new(operation));
        TaskInstance::new(object, Arc::clone(&self.task_repo))
    }

    /// 包装已有任务对象；缺少标识时补上
    pub fn create_task_instance_from(&self, mut object: TaskObject) -> TaskInstance {
        if object.task_identifier.trim().is_empty() {
            object.task_identifier = self.identifiers.generate();
        }
        TaskInstance::new(object, Arc::clone(&self.task_repo))
    }

    pub fn generate_task_identifier(&self) -> String {
        self.identifiers.generate()
    }
}
