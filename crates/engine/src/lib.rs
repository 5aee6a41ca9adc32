//! 分布式任务管理引擎
//!
//! 任务状态机、执行管理器、集群管理器和任务管理器门面。仓储是任务状态的权威来源，
//! 作业存储只是它的投影：每次状态迁移先写仓储，再同步作业和触发器。

pub mod cluster_manager;
pub mod cluster_status;
pub mod dependency_checker;
pub mod execution_manager;
pub mod handler;
pub mod handlers;
pub mod identifier;
pub mod job_executor;
pub mod metrics;
pub mod node_state;
pub mod task;
pub mod task_manager;

pub use cluster_manager::{ClusterMaintenance, ClusterManager};
pub use cluster_status::{ClusterStatusInformation, NodeRuntimeInfo, StopWait};
pub use execution_manager::{ExecutionManager, RunningTask};
pub use handler::{HandlerRegistry, TaskHandler, TaskRunResult, TaskRunResultStatus};
pub use handlers::{CleanupTaskHandler, NoOpTaskHandler, CLEANUP_HANDLER_URI, NOOP_HANDLER_URI};
pub use task::TaskInstance;
pub use task_manager::{CleanupPolicy, CleanupSummary, TaskManager};
