//! 作业执行器
//!
//! 作业存储触发作业时回调这里：读取任务、找到处理器并运行，
//! 运行结束后记录结果，单次任务完成后关闭。

use std::sync::{Arc, Weak};
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use taskmanager_domain::{
    CancellationFlag, JobRunner, OperationResult, TaskExecutionStatus, TaskModification, TaskObject,
};
use tracing::{debug, error, info, warn};

use crate::cluster_status::StopWait;
use crate::handler::{TaskRunResult, TaskRunResultStatus};
use crate::task_manager::TaskManager;

pub struct JobExecutor {
    task_manager: Weak<TaskManager>,
}

impl JobExecutor {
    pub fn new(task_manager: Weak<TaskManager>) -> Self {
        Self { task_manager }
    }
}

#[async_trait]
impl JobRunner for JobExecutor {
    async fn execute(&self, job_key: &str, cancel: CancellationFlag) {
        let manager = match TaskManager::require_alive(&self.task_manager) {
            Ok(manager) => manager,
            Err(e) => {
                warn!("作业 {} 触发时{}", job_key, e);
                return;
            }
        };
        run_job(&manager, job_key, cancel).await;
    }
}

async fn run_job(manager: &Arc<TaskManager>, oid: &str, cancel: CancellationFlag) {
    let repo = manager.task_repository();
    let task = match repo.get_task(oid).await {
        Ok(task) => task,
        Err(e) if e.is_not_found() => {
            warn!("作业 {} 对应的任务已不存在，移除作业", oid);
            if let Err(e) = manager.execution_manager().remove_task_from_scheduler(oid).await {
                error!("移除作业 {} 失败: {}", oid, e);
            }
            return;
        }
        Err(e) => {
            error!("读取任务 {} 失败，本次不执行: {}", oid, e);
            return;
        }
    };

    if task.execution_status != TaskExecutionStatus::Runnable {
        debug!("任务 {} 状态为 {}，跳过本次触发", oid, task.execution_status);
        return;
    }

    let handler_uri = task.handler_uri.clone().unwrap_or_default();
    let Some(handler) = manager.get_handler(&handler_uri) else {
        close_without_handler(manager, task, &handler_uri).await;
        return;
    };

    let execution_manager = manager.execution_manager();
    execution_manager
        .register_running_task(&task, cancel.clone())
        .await;
    // 登记之后重新读取，首次读取后才到达的挂起或关闭在这里生效
    let task = match repo.get_task(oid).await {
        Ok(current) if current.execution_status == TaskExecutionStatus::Runnable && cancel.can_run() => {
            current
        }
        Ok(current) => {
            debug!(
                "任务 {} 在开始运行前变为 {}，放弃本次触发",
                oid, current.execution_status
            );
            execution_manager.unregister_running_task(oid).await;
            return;
        }
        Err(e) => {
            warn!("登记运行后重新读取任务 {} 失败，本次不执行: {}", oid, e);
            execution_manager.unregister_running_task(oid).await;
            return;
        }
    };
    if let Err(e) = repo
        .modify_task(
            oid,
            &[
                TaskModification::Node(Some(manager.node_id().to_string())),
                TaskModification::LastRunStartTimestamp(Some(Utc::now())),
            ],
        )
        .await
    {
        warn!("记录任务 {} 的运行开始失败: {}", oid, e);
    }

    info!("开始运行任务 {} ({})", task.name, oid);
    let started = Instant::now();
    let mut instance = manager
        .create_task_instance_from(task)
        .with_cancellation(cancel);

    // 处理器在独立任务中运行，panic 不会影响作业存储的工作线程
    let outcome = tokio::spawn(async move {
        let run_result = handler.run(&mut instance).await;
        (instance, run_result)
    })
    .await;

    let elapsed = started.elapsed().as_secs_f64();
    let run_result = match outcome {
        Ok((mut instance, run_result)) => {
            if let Err(e) = instance.save_pending_modifications().await {
                warn!("保存任务 {} 的待写修改失败: {}", oid, e);
            }
            let progress = run_result.progress.unwrap_or_else(|| instance.progress());
            record_run_finish(manager, oid, &run_result, progress).await;
            run_result
        }
        Err(e) => {
            error!("任务 {} 的处理器异常退出: {}", oid, e);
            manager.metrics().record_task_run_failure();
            let mut result = OperationResult::new("run");
            result.record_fatal_error(format!("处理器异常退出: {e}"));
            let run_result = TaskRunResult::permanent_error(result);
            let progress = repo.get_task(oid).await.map(|t| t.progress).unwrap_or(0);
            record_run_finish(manager, oid, &run_result, progress).await;
            run_result
        }
    };
    execution_manager.unregister_running_task(oid).await;

    manager
        .metrics()
        .record_task_run(&handler_uri, run_result.status.as_str(), elapsed);
    info!(
        "任务 {} 运行结束: {}，耗时 {:.3}s",
        oid,
        run_result.status.as_str(),
        elapsed
    );

    after_run(manager, oid, run_result.status).await;
}

async fn record_run_finish(manager: &TaskManager, oid: &str, run_result: &TaskRunResult, progress: u64) {
    let modifications = [
        TaskModification::Node(None),
        TaskModification::LastRunFinishTimestamp(Some(Utc::now())),
        TaskModification::Progress(progress),
        TaskModification::Result(Some(run_result.operation_result.clone())),
    ];
    if let Err(e) = manager.task_repository().modify_task(oid, &modifications).await {
        warn!("记录任务 {} 的运行结果失败: {}", oid, e);
    }
}

/// 单次任务正常结束或永久失败后关闭；周期任务永久失败后挂起
async fn after_run(manager: &TaskManager, oid: &str, status: TaskRunResultStatus) {
    let task = match manager.task_repository().get_task(oid).await {
        Ok(task) => task,
        Err(e) => {
            debug!("运行结束后任务 {} 已无法读取: {}", oid, e);
            return;
        }
    };
    if task.execution_status != TaskExecutionStatus::Runnable {
        return;
    }

    let mut result = OperationResult::new("afterRun");
    match (task.is_recurring(), status) {
        (false, TaskRunResultStatus::Finished | TaskRunResultStatus::PermanentError) => {
            if let Err(e) = manager.close_task_resolved(task, &mut result).await {
                error!("关闭已完成的任务 {} 失败: {}", oid, e);
            }
        }
        (true, TaskRunResultStatus::PermanentError) => {
            warn!("周期任务 {} 永久失败，挂起", oid);
            let (_, failures) = manager
                .suspend_tasks_internal(vec![task], StopWait::DoNotWait, &mut result)
                .await;
            for (oid, e) in failures {
                error!("挂起任务 {} 失败: {}", oid, e);
            }
        }
        _ => {}
    }
}

/// 找不到处理器的任务无法运行，直接以致命错误关闭
async fn close_without_handler(manager: &TaskManager, task: TaskObject, handler_uri: &str) {
    let oid = task.oid.clone().unwrap_or_default();
    error!("任务 {} 的处理器 '{}' 未注册，关闭任务", oid, handler_uri);
    let mut run_result = OperationResult::new("run");
    run_result.record_fatal_error(format!("找不到处理器: {handler_uri}"));
    if let Err(e) = manager
        .task_repository()
        .modify_task(&oid, &[TaskModification::Result(Some(run_result))])
        .await
    {
        warn!("记录任务 {} 的结果失败: {}", oid, e);
    }
    manager.metrics().record_task_run_failure();

    let mut result = OperationResult::new("closeTask");
    if let Err(e) = manager.close_task_resolved(task, &mut result).await {
        error!("关闭任务 {} 失败: {}", oid, e);
    }
}
