//! 批量删除与按策略清理已关闭的任务树

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use taskmanager_domain::{
    CancellationFlag, OperationResult, OperationResultStatus, TaskExecutionStatus, TaskFilter,
    TaskObject,
};
use taskmanager_errors::TaskManagerResult;
use tracing::{debug, error, info, warn};

use super::TaskManager;
use crate::cluster_status::StopWait;
use crate::task::list_subtree;

/// 清理策略：删除完成时间早于 `max_age_seconds` 之前的根任务及其子树
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CleanupPolicy {
    /// 未设置时不清理
    pub max_age_seconds: Option<u64>,
}

impl CleanupPolicy {
    pub fn max_age(seconds: u64) -> Self {
        Self {
            max_age_seconds: Some(seconds),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CleanupSummary {
    pub deleted: usize,
    pub problems: usize,
    /// 删除失败的子任务数，这些记录可能永久残留
    pub bigger_problems: usize,
    pub interrupted: bool,
}

impl TaskManager {
    /// 挂起后删除一组任务，可选包含整棵子树
    ///
    /// 读取失败的任务记录后跳过；所有读取成功的任务一起挂起、一起等待，
    /// 然后逐个删除，单个删除失败不影响其余任务。
    pub async fn suspend_and_delete_tasks(
        &self,
        oids: &[String],
        suspend_timeout: Option<Duration>,
        also_subtasks: bool,
        result: &mut OperationResult,
    ) {
        let result = result.create_subresult("suspendAndDeleteTasks");
        result.add_param("tasks", oids.len());
        result.add_param("alsoSubtasks", also_subtasks);

        let mut to_delete: Vec<TaskObject> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for oid in oids {
            let task = match self.task_repo.get_task(oid).await {
                Ok(task) => task,
                Err(e) => {
                    error!("读取待删除任务 {} 失败，跳过: {}", oid, e);
                    let sub = result.create_subresult("getTask");
                    sub.add_param("oid", oid);
                    sub.record_fatal_error(e.to_string());
                    continue;
                }
            };
            if also_subtasks {
                match list_subtree(self.task_repo.as_ref(), &task).await {
                    Ok(subtasks) => {
                        for subtask in subtasks {
                            if let Some(sub_oid) = subtask.oid.clone() {
                                if seen.insert(sub_oid) {
                                    to_delete.push(subtask);
                                }
                            }
                        }
                    }
                    Err(e) => {
                        error!("读取任务 {} 的子任务失败: {}", oid, e);
                        result
                            .create_subresult("listSubtasksDeeply")
                            .record_fatal_error(e.to_string());
                    }
                }
            }
            if seen.insert(oid.clone()) {
                to_delete.push(task);
            }
        }

        let (stopped, failures) = self
            .suspend_tasks_internal(to_delete.clone(), StopWait::from_timeout(suspend_timeout), result)
            .await;
        if !stopped {
            warn!("部分任务在删除前未停止运行");
        }
        for (oid, e) in &failures {
            warn!("删除前挂起任务 {} 失败: {}", oid, e);
        }

        let mut deleted = 0usize;
        for task in &to_delete {
            let Some(oid) = task.oid.as_deref() else {
                continue;
            };
            let sub = result.create_subresult("deleteTask");
            sub.add_param("oid", oid);
            match self.delete_task_record(oid, sub).await {
                Ok(()) => {
                    sub.record_success();
                    deleted += 1;
                }
                Err(e) => {
                    error!("删除任务 {} 失败: {}", oid, e);
                    sub.record_fatal_error(e.to_string());
                }
            }
        }

        result.add_param("deleted", deleted);
        result.compute_status();
        info!("挂起并删除任务完成: 请求 {} 个，删除 {} 个", oids.len(), deleted);
    }

    /// 按策略删除过期的已关闭任务树
    ///
    /// 每处理一棵树之前检查 `cancel`，被取消时停止并标记为中断。
    pub async fn cleanup_tasks(
        &self,
        policy: &CleanupPolicy,
        cancel: Option<&CancellationFlag>,
        result: &mut OperationResult,
    ) -> TaskManagerResult<CleanupSummary> {
        let result = result.create_subresult("cleanupTasks");
        let Some(max_age) = policy.max_age_seconds else {
            result.record_not_applicable();
            return Ok(CleanupSummary::default());
        };
        // 超出时间范围的时长意味着没有任务足够旧
        let Some(cutoff) = i64::try_from(max_age)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            info!("清理时长 {} 秒超出时间范围，没有需要清理的任务", max_age);
            result.add_param("maxAgeSeconds", max_age);
            result.record_success();
            return Ok(CleanupSummary::default());
        };
        result.add_param("cutoff", cutoff);
        info!("开始清理 {} 之前关闭的任务", cutoff);

        let filter = TaskFilter::all()
            .roots()
            .with_status(TaskExecutionStatus::Closed)
            .completed_before(cutoff);
        let roots = match self.task_repo.search_tasks(&filter).await {
            Ok(roots) => roots,
            Err(e) => {
                error!("查询过期任务失败: {}", e);
                result.record_fatal_error(e.to_string());
                return Err(e);
            }
        };
        debug!("找到 {} 棵待清理的任务树", roots.len());

        let mut summary = CleanupSummary::default();
        for root in &roots {
            if cancel.is_some_and(|flag| !flag.can_run()) {
                warn!("任务清理被中断");
                summary.interrupted = true;
                break;
            }

            let mut members = match list_subtree(self.task_repo.as_ref(), root).await {
                Ok(subtasks) => subtasks,
                Err(e) => {
                    error!("读取任务 {} 的子任务失败: {}", root.task_identifier, e);
                    summary.problems += 1;
                    continue;
                }
            };
            // 先删最深的子任务，最后删除根任务
            members.reverse();
            members.push(root.clone());

            for member in &members {
                let Some(oid) = member.oid.as_deref() else {
                    continue;
                };
                match self.delete_task_record(oid, result).await {
                    Ok(()) => summary.deleted += 1,
                    Err(e) => {
                        error!("删除过期任务 {} 失败: {}", member.entity_description(), e);
                        summary.problems += 1;
                        if member.task_identifier != root.task_identifier {
                            summary.bigger_problems += 1;
                        }
                    }
                }
            }
        }

        self.metrics.record_cleanup(summary.deleted, summary.problems);
        info!(
            "任务清理{}: 删除 {} 个任务，{} 个删除失败",
            if summary.interrupted { "被中断" } else { "完成" },
            summary.deleted,
            summary.problems
        );
        if summary.bigger_problems > 0 {
            error!(
                "{} 个子任务无法删除，需要人工检查，否则会一直残留在仓储中",
                summary.bigger_problems
            );
        }

        let suffix = if summary.interrupted { " 已中断。" } else { "" };
        let statistics = result.create_subresult("cleanupTasks.statistics");
        if summary.problems == 0 {
            statistics.record_status(
                OperationResultStatus::Success,
                format!("成功删除 {} 个任务。{}", summary.deleted, suffix),
            );
        } else {
            let mut message = format!(
                "成功删除 {} 个任务，{} 个任务删除失败。{}",
                summary.deleted, summary.problems, suffix
            );
            if summary.bigger_problems > 0 {
                message.push_str(&format!(" {} 个子任务无法删除，请查看日志。", summary.bigger_problems));
            }
            statistics.record_partial_error(message);
        }
        if summary.interrupted {
            result.record_partial_error("清理被中断");
        } else {
            result.compute_status();
        }
        Ok(summary)
    }
}
