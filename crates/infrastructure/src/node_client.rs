use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use taskmanager_domain::{NodeClient, NodeObject, NodeStatusReport};
use taskmanager_errors::{TaskManagerError, TaskManagerResult};
use tracing::{debug, warn};

/// 管理接口统一的响应包装
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    data: Option<T>,
    message: Option<String>,
}

/// 通过 HTTP 管理接口访问远程节点
pub struct HttpNodeClient {
    http_client: reqwest::Client,
    request_timeout: Duration,
}

impl HttpNodeClient {
    pub fn new(request_timeout: Duration) -> TaskManagerResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| TaskManagerError::Internal(format!("创建HTTP客户端失败: {e}")))?;
        Ok(Self {
            http_client,
            request_timeout,
        })
    }

    fn base_url(node: &NodeObject) -> TaskManagerResult<&str> {
        node.management_url
            .as_deref()
            .map(|url| url.trim_end_matches('/'))
            .ok_or_else(|| {
                TaskManagerError::communication(&node.node_identifier, "节点未配置管理地址")
            })
    }

    async fn decode<T: DeserializeOwned>(
        node: &NodeObject,
        response: reqwest::Response,
    ) -> TaskManagerResult<Option<T>> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("节点 {} 返回 HTTP {}: {}", node.node_identifier, status, body);
            return Err(TaskManagerError::communication(
                &node.node_identifier,
                format!("HTTP {status} - {body}"),
            ));
        }

        let envelope: Envelope<T> = response.json().await.map_err(|e| {
            TaskManagerError::communication(&node.node_identifier, format!("响应解析失败: {e}"))
        })?;
        if !envelope.success {
            return Err(TaskManagerError::communication(
                &node.node_identifier,
                envelope.message.unwrap_or_else(|| "远程操作失败".to_string()),
            ));
        }
        Ok(envelope.data)
    }

    async fn post<T: DeserializeOwned>(
        &self,
        node: &NodeObject,
        path: &str,
        timeout: Duration,
    ) -> TaskManagerResult<Option<T>> {
        let url = format!("{}{}", Self::base_url(node)?, path);
        debug!("调用节点 {} 管理接口: POST {}", node.node_identifier, url);
        let response = self
            .http_client
            .post(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| TaskManagerError::communication(&node.node_identifier, e.to_string()))?;
        Self::decode(node, response).await
    }
}

#[async_trait]
impl NodeClient for HttpNodeClient {
    async fn node_status(&self, node: &NodeObject) -> TaskManagerResult<NodeStatusReport> {
        let url = format!("{}/api/node/status", Self::base_url(node)?);
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| TaskManagerError::communication(&node.node_identifier, e.to_string()))?;
        Self::decode::<NodeStatusReport>(node, response)
            .await?
            .ok_or_else(|| TaskManagerError::communication(&node.node_identifier, "响应缺少节点状态"))
    }

    async fn start_scheduler(&self, node: &NodeObject) -> TaskManagerResult<()> {
        self.post::<serde_json::Value>(node, "/api/node/scheduler/start", self.request_timeout)
            .await
            .map(|_| ())
    }

    async fn stop_scheduler(&self, node: &NodeObject) -> TaskManagerResult<()> {
        self.post::<serde_json::Value>(node, "/api/node/scheduler/stop", self.request_timeout)
            .await
            .map(|_| ())
    }

    async fn stop_scheduler_and_tasks(
        &self,
        node: &NodeObject,
        timeout: Duration,
    ) -> TaskManagerResult<bool> {
        let path = format!(
            "/api/node/scheduler/stop-with-tasks?timeout_ms={}",
            timeout.as_millis()
        );
        let stopped = self
            .post::<bool>(node, &path, timeout + self.request_timeout)
            .await?;
        Ok(stopped.unwrap_or(false))
    }

    async fn stop_task(&self, node: &NodeObject, oid: &str) -> TaskManagerResult<()> {
        let path = format!("/api/node/tasks/{oid}/stop");
        self.post::<serde_json::Value>(node, &path, self.request_timeout)
            .await
            .map(|_| ())
    }
}
