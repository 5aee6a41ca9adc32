use std::path::Path;

use anyhow::{Context, Result};
use ::config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use super::models::{
    ApiConfig, ClusterConfig, DatabaseConfig, NodeConfig, ObservabilityConfig, PolicyConfig,
    SchedulerConfig,
};

const DEFAULT_NODE_ID: &str = "DefaultNode";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TaskManagerConfig {
    pub node: NodeConfig,
    pub scheduler: SchedulerConfig,
    pub cluster: ClusterConfig,
    pub policy: PolicyConfig,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub observability: ObservabilityConfig,
}

impl TaskManagerConfig {
    /// 加载配置：默认值 → 配置文件 → 环境变量（`TASKMANAGER_NODE__NODE_ID` 形式）
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let defaults =
            ConfigBuilder::try_from(&TaskManagerConfig::default()).context("构建默认配置失败")?;
        let mut builder = ConfigBuilder::builder().add_source(defaults);

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = ["config/taskmanager.toml", "taskmanager.toml"];
            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("TASKMANAGER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: TaskManagerConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: TaskManagerConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn validate(&self) -> Result<()> {
        self.node.validate().context("node 配置无效")?;
        self.scheduler.validate().context("scheduler 配置无效")?;
        self.cluster.validate().context("cluster 配置无效")?;
        self.database.validate().context("database 配置无效")?;
        self.api.validate().context("api 配置无效")?;
        self.observability
            .validate()
            .context("observability 配置无效")?;
        Ok(())
    }

    /// 节点标识：显式配置 → 主机名 → `DefaultNode`
    pub fn node_id(&self) -> String {
        if let Some(node_id) = &self.node.node_id {
            return node_id.clone();
        }
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| DEFAULT_NODE_ID.to_string())
    }

    pub fn hostname(&self) -> String {
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string())
    }

    /// 单元测试和集成测试使用的配置：不启动心跳，轮询更快
    pub fn for_testing<S: Into<String>>(node_id: S) -> Self {
        let mut config = Self::default();
        config.node.node_id = Some(node_id.into());
        config.node.test_mode = true;
        config.scheduler.poll_interval_ms = 20;
        config.scheduler.stop_poll_interval_ms = 10;
        config.scheduler.wait_on_shutdown_ms = 1000;
        config.cluster.status_cache_ttl_ms = 0;
        config.cluster.remote_call_timeout_ms = 500;
        config.api.enabled = false;
        config.observability.metrics_enabled = false;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = TaskManagerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.database.url, "memory");
        assert!(!config.node.clustered);
    }

    #[test]
    fn test_explicit_node_id_wins() {
        let config = TaskManagerConfig::for_testing("node-a");
        assert_eq!(config.node_id(), "node-a");
        assert!(!config.node_id().is_empty());
    }
}
