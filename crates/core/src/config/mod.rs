mod models;
mod task_manager_config;

pub use models::{
    ApiConfig, ClusterConfig, DatabaseConfig, NodeConfig, ObservabilityConfig, PolicyConfig,
    ResumePolicy, SchedulerConfig,
};
pub use task_manager_config::TaskManagerConfig;
