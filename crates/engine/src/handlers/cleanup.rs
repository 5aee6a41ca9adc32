use std::sync::Weak;

use async_trait::async_trait;
use taskmanager_domain::{OperationResult, TaskObject};
use tracing::{error, info};

use crate::handler::{TaskHandler, TaskRunResult};
use crate::task::TaskInstance;
use crate::task_manager::{CleanupPolicy, TaskManager};

/// 按扩展数据中的 `max_age_seconds` 清理已关闭的任务
pub struct CleanupTaskHandler {
    task_manager: Weak<TaskManager>,
}

impl CleanupTaskHandler {
    pub fn new(task_manager: Weak<TaskManager>) -> Self {
        Self { task_manager }
    }
}

#[async_trait]
impl TaskHandler for CleanupTaskHandler {
    async fn run(&self, task: &mut TaskInstance) -> TaskRunResult {
        let mut result = OperationResult::new("cleanup");
        let manager = match TaskManager::require_alive(&self.task_manager) {
            Ok(manager) => manager,
            Err(e) => {
                result.record_fatal_error(e.to_string());
                return TaskRunResult::temporary_error(result);
            }
        };

        let policy: CleanupPolicy = match serde_json::from_value(task.extension().clone()) {
            Ok(policy) => policy,
            Err(_) if task.extension().is_null() => CleanupPolicy::default(),
            Err(e) => {
                error!("清理任务 {} 的策略无效: {}", task.task_identifier(), e);
                result.record_fatal_error(format!("清理策略无效: {e}"));
                return TaskRunResult::permanent_error(result);
            }
        };

        let cancel = task.cancellation_flag().clone();
        match manager.cleanup_tasks(&policy, Some(&cancel), &mut result).await {
            Ok(summary) => {
                info!(
                    "清理任务 {} 完成: 删除 {}，失败 {}",
                    task.task_identifier(),
                    summary.deleted,
                    summary.problems
                );
                result.compute_status();
                let progress = summary.deleted as u64;
                if summary.interrupted {
                    TaskRunResult::interrupted(result).with_progress(progress)
                } else {
                    TaskRunResult::finished(result).with_progress(progress)
                }
            }
            Err(e) => {
                error!("清理任务 {} 失败: {}", task.task_identifier(), e);
                result.record_fatal_error(e.to_string());
                TaskRunResult::temporary_error(result)
            }
        }
    }

    fn category_names(&self) -> Vec<String> {
        vec!["Cleanup".to_string()]
    }

    fn category_name(&self, _task: &TaskObject) -> Option<String> {
        Some("Cleanup".to_string())
    }
}
