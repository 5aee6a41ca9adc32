use thiserror::Error;


#[derive(Debug, Error)]
pub enum TaskManagerError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("对象未找到: {object_type} {id}")]
    ObjectNotFound { object_type: String, id: String },
    #[error("对象已存在: {0}")]
    ObjectAlreadyExists(String),
    #[error("模式错误: {0}")]
    Schema(String),
    #[error("非法参数: {0}")]
    IllegalArgument(String),
    #[error("非法状态: {0}")]
    IllegalState(String),
    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },
    #[error("调度引擎错误: {0}")]
    JobStore(String),
    #[error("节点 {node} 通信失败: {message}")]
    Communication { node: String, message: String },
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("节点处于错误状态: {0}")]
    NodeInErrorState(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("操作超时: {0}")]
    Timeout(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type TaskManagerResult<T> = Result<T, TaskManagerError>;

impl TaskManagerError {
    pub fn task_not_found<S: Into<String>>(oid: S) -> Self {
        Self::ObjectNotFound {
            object_type: "Task".to_string(),
            id: oid.into(),
        }
    }
    pub fn node_not_found<S: Into<String>>(oid: S) -> Self {
        Self::ObjectNotFound {
            object_type: "Node".to_string(),
            id: oid.into(),
        }
    }
    pub fn schema<S: Into<String>>(msg: S) -> Self {
        Self::Schema(msg.into())
    }
    pub fn illegal_argument<S: Into<String>>(msg: S) -> Self {
        Self::IllegalArgument(msg.into())
    }
    pub fn illegal_state<S: Into<String>>(msg: S) -> Self {
        Self::IllegalState(msg.into())
    }
    pub fn job_store<S: Into<String>>(msg: S) -> Self {
        Self::JobStore(msg.into())
    }
    pub fn communication<N: Into<String>, S: Into<String>>(node: N, msg: S) -> Self {
        Self::Communication {
            node: node.into(),
            message: msg.into(),
        }
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn is_not_found(&self) -> bool {
        matches!(self, TaskManagerError::ObjectNotFound { .. })
    }
    pub fn is_schema(&self) -> bool {
        matches!(self, TaskManagerError::Schema(_))
    }
    /// 仓储层错误（未找到、模式错误、已存在）需要向直接调用者传播
    pub fn is_repository_error(&self) -> bool {
        matches!(
            self,
            TaskManagerError::ObjectNotFound { .. }
                | TaskManagerError::ObjectAlreadyExists(_)
                | TaskManagerError::Schema(_)
                | TaskManagerError::Database(_)
        )
    }
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TaskManagerError::JobStore(_)
                | TaskManagerError::Communication { .. }
                | TaskManagerError::Timeout(_)
        )
    }
}

impl From<serde_json::Error> for TaskManagerError {
    fn from(err: serde_json::Error) -> Self {
        TaskManagerError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for TaskManagerError {
    fn from(err: anyhow::Error) -> Self {
        TaskManagerError::Internal(err.to_string())
    }
}
