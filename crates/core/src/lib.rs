pub mod config;
pub mod logging;

pub use config::{
    ApiConfig, ClusterConfig, DatabaseConfig, NodeConfig, ObservabilityConfig, PolicyConfig,
    ResumePolicy, SchedulerConfig, TaskManagerConfig,
};
