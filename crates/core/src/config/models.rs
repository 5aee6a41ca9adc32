use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NodeConfig {
    /// 未配置时使用主机名
    pub node_id: Option<String>,
    pub clustered: bool,
    /// 测试模式：不启动心跳线程，关闭时调度器保持暂停
    pub test_mode: bool,
    /// 其他节点访问本节点管理接口的地址
    pub management_url: Option<String>,
    pub stop_on_initialization_failure: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            clustered: false,
            test_mode: false,
            management_url: None,
            stop_on_initialization_failure: true,
        }
    }
}

impl NodeConfig {
    pub fn validate(&self) -> Result<()> {
        if let Some(node_id) = &self.node_id {
            if node_id.trim().is_empty() {
                return Err(anyhow!("node.node_id 不能为空字符串"));
            }
        }
        if let Some(url) = &self.management_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(anyhow!("node.management_url 必须以 http:// 或 https:// 开头"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    pub thread_pool_size: usize,
    /// 触发器轮询间隔
    pub poll_interval_ms: u64,
    /// 停止并等待任务时的轮询间隔
    pub stop_poll_interval_ms: u64,
    pub wait_on_shutdown_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            thread_pool_size: 10,
            poll_interval_ms: 200,
            stop_poll_interval_ms: 100,
            wait_on_shutdown_ms: 5000,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.thread_pool_size == 0 {
            return Err(anyhow!("scheduler.thread_pool_size 必须大于 0"));
        }
        if self.poll_interval_ms == 0 || self.stop_poll_interval_ms == 0 {
            return Err(anyhow!("scheduler 轮询间隔必须大于 0"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stop_poll_interval(&self) -> Duration {
        Duration::from_millis(self.stop_poll_interval_ms)
    }

    pub fn wait_on_shutdown(&self) -> Duration {
        Duration::from_millis(self.wait_on_shutdown_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClusterConfig {
    pub heartbeat_interval_seconds: u64,
    pub node_timeout_seconds: u64,
    /// 集群状态缓存的有效期，0 表示不缓存
    pub status_cache_ttl_ms: u64,
    pub remote_call_timeout_ms: u64,
    pub job_store_sync_every_n_heartbeats: u32,
    pub check_waiting_tasks_every_n_heartbeats: u32,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_seconds: 10,
            node_timeout_seconds: 30,
            status_cache_ttl_ms: 1000,
            remote_call_timeout_ms: 5000,
            job_store_sync_every_n_heartbeats: 30,
            check_waiting_tasks_every_n_heartbeats: 6,
        }
    }
}

impl ClusterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval_seconds == 0 {
            return Err(anyhow!("cluster.heartbeat_interval_seconds 必须大于 0"));
        }
        if self.node_timeout_seconds <= self.heartbeat_interval_seconds {
            return Err(anyhow!(
                "cluster.node_timeout_seconds ({}) 必须大于心跳间隔 ({})",
                self.node_timeout_seconds,
                self.heartbeat_interval_seconds
            ));
        }
        if self.remote_call_timeout_ms == 0 {
            return Err(anyhow!("cluster.remote_call_timeout_ms 必须大于 0"));
        }
        if self.job_store_sync_every_n_heartbeats == 0
            || self.check_waiting_tasks_every_n_heartbeats == 0
        {
            return Err(anyhow!("cluster 周期性任务的心跳倍数必须大于 0"));
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    pub fn status_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.status_cache_ttl_ms)
    }

    pub fn remote_call_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_call_timeout_ms)
    }
}

/// 恢复/取消暂停任务前是否检查任务正在其他节点执行
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResumePolicy {
    #[default]
    FailOpen,
    FenceRunningElsewhere,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct PolicyConfig {
    pub resume_policy: ResumePolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `memory` 或 `sqlite://...`
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "memory".to_string(),
            max_connections: 5,
        }
    }
}

impl DatabaseConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.is_memory() && !self.url.starts_with("sqlite:") {
            return Err(anyhow!(
                "database.url 必须是 memory 或以 sqlite: 开头，当前为: {}",
                self.url
            ));
        }
        if self.max_connections == 0 {
            return Err(anyhow!("database.max_connections 必须大于 0"));
        }
        Ok(())
    }

    pub fn is_memory(&self) -> bool {
        self.url == "memory"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub bind_address: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

impl ApiConfig {
    pub fn validate(&self) -> Result<()> {
        if self.enabled {
            self.bind_address
                .parse::<SocketAddr>()
                .map_err(|e| anyhow!("api.bind_address 无效 ({}): {e}", self.bind_address))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub log_format: String,
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
        }
    }
}

impl ObservabilityConfig {
    pub fn validate(&self) -> Result<()> {
        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => return Err(anyhow!("不支持的日志级别: {other}")),
        }
        match self.log_format.as_str() {
            "json" | "pretty" => Ok(()),
            other => Err(anyhow!("不支持的日志格式: {other}")),
        }
    }
}
