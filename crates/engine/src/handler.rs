//! 任务处理器 SPI 与注册表

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use taskmanager_domain::{OperationResult, OperationResultStatus, TaskObject};
use tracing::{info, warn};

use crate::task::TaskInstance;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskRunResultStatus {
    /// 本次运行正常结束；单次任务随后被关闭
    Finished,
    /// 因取消标志提前退出，任务保持可运行
    Interrupted,
    /// 暂时性失败，下次触发时重试
    TemporaryError,
    /// 永久性失败，单次任务被关闭，周期任务被挂起
    PermanentError,
}

impl TaskRunResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskRunResultStatus::Finished => "finished",
            TaskRunResultStatus::Interrupted => "interrupted",
            TaskRunResultStatus::TemporaryError => "temporary_error",
            TaskRunResultStatus::PermanentError => "permanent_error",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskRunResult {
    pub status: TaskRunResultStatus,
    pub progress: Option<u64>,
    pub operation_result: OperationResult,
}

impl TaskRunResult {
    pub fn new(status: TaskRunResultStatus, mut operation_result: OperationResult) -> Self {
        match status {
            TaskRunResultStatus::PermanentError if !operation_result.is_error() => {
                operation_result.record_fatal_error("任务处理器报告永久性错误");
            }
            TaskRunResultStatus::TemporaryError if !operation_result.is_error() => {
                operation_result.record_partial_error("任务处理器报告暂时性错误");
            }
            _ => operation_result.compute_status_if_unknown(),
        }
        Self {
            status,
            progress: None,
            operation_result,
        }
    }

    pub fn finished(operation_result: OperationResult) -> Self {
        Self::new(TaskRunResultStatus::Finished, operation_result)
    }

    pub fn interrupted(operation_result: OperationResult) -> Self {
        Self::new(TaskRunResultStatus::Interrupted, operation_result)
    }

    pub fn temporary_error(operation_result: OperationResult) -> Self {
        Self::new(TaskRunResultStatus::TemporaryError, operation_result)
    }

    pub fn permanent_error(operation_result: OperationResult) -> Self {
        Self::new(TaskRunResultStatus::PermanentError, operation_result)
    }

    pub fn with_progress(mut self, progress: u64) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn result_status(&self) -> OperationResultStatus {
        self.operation_result.status
    }
}

/// 任务处理器
///
/// 处理器在作业触发时被调用，应在迭代点检查 `task.can_run()` 以支持协作式取消。
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, task: &mut TaskInstance) -> TaskRunResult;

    /// 处理器声明的全部分类名，用于界面分组
    fn category_names(&self) -> Vec<String> {
        Vec::new()
    }

    /// 具体任务的分类
    fn category_name(&self, _task: &TaskObject) -> Option<String> {
        self.category_names().into_iter().next()
    }
}

/// 处理器注册表，URI 到处理器实例的映射
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn TaskHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_handler<S: Into<String>>(&self, uri: S, handler: Arc<dyn TaskHandler>) {
        let uri = uri.into();
        let previous = self
            .handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(uri.clone(), handler);
        if previous.is_some() {
            warn!("处理器 {} 被重新注册，旧实例已替换", uri);
        } else {
            info!("注册任务处理器: {}", uri);
        }
    }

    pub fn get_handler(&self, uri: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(uri)
            .cloned()
    }

    pub fn handler_uris(&self) -> Vec<String> {
        let mut uris: Vec<String> = self
            .handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        uris.sort();
        uris
    }

    /// 所有处理器声明的分类，去重排序
    pub fn all_task_categories(&self) -> Vec<String> {
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let categories: BTreeSet<String> = handlers
            .values()
            .flat_map(|handler| handler.category_names())
            .collect();
        categories.into_iter().collect()
    }

    /// 声明了该分类的处理器 URI；多个时取字典序最小的一个
    pub fn handler_uri_for_category(&self, category: &str) -> Option<String> {
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut uris: Vec<&String> = handlers
            .iter()
            .filter(|(_, handler)| handler.category_names().iter().any(|c| c == category))
            .map(|(uri, _)| uri)
            .collect();
        uris.sort();
        uris.first().map(|uri| uri.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CategorizedHandler(Vec<&'static str>);

    #[async_trait]
    impl TaskHandler for CategorizedHandler {
        async fn run(&self, _task: &mut TaskInstance) -> TaskRunResult {
            TaskRunResult::finished(OperationResult::new("run"))
        }

        fn category_names(&self) -> Vec<String> {
            self.0.iter().map(|c| c.to_string()).collect()
        }
    }

    #[test]
    fn test_registry_lookup_and_categories() {
        let registry = HandlerRegistry::new();
        registry.register_handler("uri:b", Arc::new(CategorizedHandler(vec!["Cleanup"])));
        registry.register_handler(
            "uri:a",
            Arc::new(CategorizedHandler(vec!["Demo", "Cleanup"])),
        );

        assert!(registry.get_handler("uri:a").is_some());
        assert!(registry.get_handler("uri:missing").is_none());
        assert_eq!(registry.all_task_categories(), vec!["Cleanup", "Demo"]);
        assert_eq!(
            registry.handler_uri_for_category("Cleanup").as_deref(),
            Some("uri:a")
        );
        assert_eq!(registry.handler_uri_for_category("Other"), None);
        assert_eq!(registry.handler_uris(), vec!["uri:a", "uri:b"]);
    }

    #[test]
    fn test_run_result_status_mapping() {
        let finished = TaskRunResult::finished(OperationResult::new("run"));
        assert_eq!(finished.result_status(), OperationResultStatus::Success);

        let failed = TaskRunResult::permanent_error(OperationResult::new("run"));
        assert_eq!(failed.result_status(), OperationResultStatus::FatalError);

        let retry = TaskRunResult::temporary_error(OperationResult::new("run")).with_progress(3);
        assert_eq!(retry.result_status(), OperationResultStatus::PartialError);
        assert_eq!(retry.progress, Some(3));
    }

    #[test]
    fn test_default_category_name_is_first_declared() {
        let handler = CategorizedHandler(vec!["Demo", "Other"]);
        let task = TaskObject::new("1-0-1", "t");
        assert_eq!(handler.category_name(&task).as_deref(), Some("Demo"));
    }
}
