use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use taskmanager_domain::{OperationResult, TaskObject};
use tracing::{debug, info, warn};

use crate::handler::{TaskHandler, TaskRunResult};
use crate::task::TaskInstance;

/// 空操作任务参数，从任务扩展数据读取
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoOpParams {
    pub steps: u64,
    /// 每一步之间的等待
    pub delay_ms: u64,
}

impl Default for NoOpParams {
    fn default() -> Self {
        Self {
            steps: 1,
            delay_ms: 0,
        }
    }
}

/// 按步骤空转的处理器，用于演示和测试取消、进度等行为
pub struct NoOpTaskHandler;

impl NoOpTaskHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NoOpTaskHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskHandler for NoOpTaskHandler {
    async fn run(&self, task: &mut TaskInstance) -> TaskRunResult {
        let mut result = OperationResult::new("noop");
        let params: NoOpParams = if task.extension().is_null() {
            NoOpParams::default()
        } else {
            match serde_json::from_value(task.extension().clone()) {
                Ok(params) => params,
                Err(e) => {
                    warn!("解析空操作任务参数失败: {}", e);
                    result.record_fatal_error(format!("参数无效: {e}"));
                    return TaskRunResult::permanent_error(result);
                }
            }
        };
        result.add_param("steps", params.steps);
        result.add_param("delayMs", params.delay_ms);
        info!(
            "空操作任务 {} 开始: {} 步，每步 {}ms",
            task.task_identifier(),
            params.steps,
            params.delay_ms
        );

        let delay = Duration::from_millis(params.delay_ms);
        let mut done = 0;
        for step in 0..params.steps {
            if !task.can_run() {
                info!("空操作任务 {} 在第 {} 步被中断", task.task_identifier(), step);
                result.record_warning(format!("在 {done}/{} 步后被中断", params.steps));
                return TaskRunResult::interrupted(result).with_progress(done);
            }
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            done += 1;
            task.set_progress(done);
            debug!("空操作任务 {} 完成第 {} 步", task.task_identifier(), done);
        }

        result.record_success();
        TaskRunResult::finished(result).with_progress(done)
    }

    fn category_names(&self) -> Vec<String> {
        vec!["Demo".to_string()]
    }

    fn category_name(&self, _task: &TaskObject) -> Option<String> {
        Some("Demo".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_defaults_and_partial_json() {
        let params: NoOpParams = serde_json::from_value(serde_json::json!({"delay_ms": 25})).unwrap();
        assert_eq!(params.steps, 1);
        assert_eq!(params.delay_ms, 25);
    }

    #[test]
    fn test_category() {
        let handler = NoOpTaskHandler::new();
        assert_eq!(handler.category_names(), vec!["Demo".to_string()]);
    }
}
