//! 任务状态迁移：挂起、恢复、暂停、取消暂停、立即运行

use taskmanager_core::ResumePolicy;
use taskmanager_domain::{
    OperationResult, TaskExecutionStatus, TaskFilter, TaskModification, TaskObject,
    TaskWaitingReason,
};
use taskmanager_errors::{TaskManagerError, TaskManagerResult};
use tracing::{debug, error, info, warn};

use super::TaskManager;
use crate::cluster_status::StopWait;
use crate::dependency_checker::is_waiting_for_other_tasks;

impl TaskManager {
    // ---- 挂起 ----

    /// 挂起单个任务；状态写入失败时返回错误，返回值表示执行线程是否已确认停止
    pub async fn suspend_task(
        &self,
        oid: &str,
        wait: StopWait,
        result: &mut OperationResult,
    ) -> TaskManagerResult<bool> {
        let result = result.create_subresult("suspendTask");
        result.add_param("oid", oid);
        let task = match self.task_repo.get_task(oid).await {
            Ok(task) => task,
            Err(e) => {
                result.record_fatal_error(e.to_string());
                return Err(e);
            }
        };

        let (stopped, mut failures) = self.suspend_tasks_internal(vec![task], wait, result).await;
        if let Some((_, e)) = failures.pop() {
            result.record_fatal_error(e.to_string());
            return Err(e);
        }
        result.compute_status();
        Ok(stopped)
    }

    /// 批量挂起；读取失败的任务记录后跳过
    pub async fn suspend_tasks(
        &self,
        oids: &[String],
        wait: StopWait,
        result: &mut OperationResult,
    ) -> bool {
        let result = result.create_subresult("suspendTasks");
        let mut tasks = Vec::new();
        for oid in oids {
            match self.task_repo.get_task(oid).await {
                Ok(task) => tasks.push(task),
                Err(e) => {
                    warn!("挂起时读取任务 {} 失败: {}", oid, e);
                    let sub = result.create_subresult("getTask");
                    sub.add_param("oid", oid);
                    sub.record_fatal_error(e.to_string());
                }
            }
        }
        let (stopped, _) = self.suspend_tasks_internal(tasks, wait, result).await;
        result.compute_status();
        stopped
    }

    /// 所有任务先写入 SUSPENDED 并暂停作业，再一起等待执行线程停止
    ///
    /// 已挂起的任务不重复写入，已关闭的任务只参与等待。返回是否全部停止以及写入失败的任务。
    pub(crate) async fn suspend_tasks_internal(
        &self,
        tasks: Vec<TaskObject>,
        wait: StopWait,
        result: &mut OperationResult,
    ) -> (bool, Vec<(String, TaskManagerError)>) {
        let mut failures = Vec::new();
        let mut to_stop = Vec::new();
        let mut suspended = 0usize;

        for mut task in tasks {
            let Some(oid) = task.oid.clone() else {
                let e = TaskManagerError::illegal_state(format!(
                    "任务 {} 尚未持久化，只有持久化任务可以挂起",
                    task.task_identifier
                ));
                result
                    .create_subresult("suspendTask")
                    .record_fatal_error(e.to_string());
                failures.push((task.task_identifier.clone(), e));
                continue;
            };

            match task.execution_status {
                TaskExecutionStatus::Suspended => {
                    debug!("任务 {} 已处于挂起状态", oid);
                }
                TaskExecutionStatus::Closed => {
                    debug!("任务 {} 已关闭，无需挂起", oid);
                }
                TaskExecutionStatus::Runnable | TaskExecutionStatus::Waiting => {
                    if let Err(e) = self
                        .task_repo
                        .modify_task(
                            &oid,
                            &[TaskModification::ExecutionStatus(TaskExecutionStatus::Suspended)],
                        )
                        .await
                    {
                        error!("挂起任务 {} 失败: {}", oid, e);
                        let sub = result.create_subresult("suspendTask");
                        sub.add_param("oid", &oid);
                        sub.record_fatal_error(e.to_string());
                        failures.push((oid, e));
                        continue;
                    }
                    task.execution_status = TaskExecutionStatus::Suspended;
                    suspended += 1;
                    info!("任务 {} 已挂起", oid);
                }
            }

            // 已挂起的任务也再同步一次，确保作业处于暂停
            self.execution_manager.synchronize_task(&task, result).await;
            to_stop.push(task);
        }

        self.metrics.record_tasks_suspended(suspended);
        let stopped = self
            .execution_manager
            .stop_tasks_run_and_wait(&to_stop, wait, true, result)
            .await;
        (stopped, failures)
    }

    // ---- 恢复 ----

    /// 只能恢复 SUSPENDED 状态的任务，其他状态返回致命错误且不修改任务
    pub async fn resume_task(&self, oid: &str, result: &mut OperationResult) -> TaskManagerResult<()> {
        let result = result.create_subresult("resumeTask");
        result.add_param("oid", oid);
        let outcome = self
            .transition_to_runnable(oid, TaskExecutionStatus::Suspended, result)
            .await;
        if outcome.is_ok() {
            self.metrics.record_tasks_resumed(1);
        }
        outcome
    }

    /// 批量恢复，单个任务的失败不影响其他任务
    pub async fn resume_tasks(&self, oids: &[String], result: &mut OperationResult) {
        let result = result.create_subresult("resumeTasks");
        for oid in oids {
            if let Err(e) = self.resume_task(oid, result).await {
                warn!("恢复任务 {} 失败: {}", oid, e);
            }
        }
        result.compute_status();
    }

    // ---- 暂停 / 取消暂停 ----

    /// RUNNABLE 进入 WAITING，作业保留但触发器暂停
    pub async fn pause_task(
        &self,
        oid: &str,
        reason: TaskWaitingReason,
        result: &mut OperationResult,
    ) -> TaskManagerResult<()> {
        let result = result.create_subresult("pauseTask");
        result.add_param("oid", oid);
        let task = match self.task_repo.get_task(oid).await {
            Ok(task) => task,
            Err(e) => {
                result.record_fatal_error(e.to_string());
                return Err(e);
            }
        };
        if task.execution_status != TaskExecutionStatus::Runnable {
            let e = TaskManagerError::illegal_state(format!(
                "只能暂停 RUNNABLE 状态的任务，任务 {} 当前状态为 {}",
                oid, task.execution_status
            ));
            result.record_fatal_error(e.to_string());
            return Err(e);
        }

        if let Err(e) = self
            .task_repo
            .modify_task(
                oid,
                &[
                    TaskModification::ExecutionStatus(TaskExecutionStatus::Waiting),
                    TaskModification::WaitingReason(Some(reason)),
                ],
            )
            .await
        {
            result.record_fatal_error(e.to_string());
            return Err(e);
        }
        self.synchronize_after_change(oid, result).await;
        info!("任务 {} 进入等待状态: {}", oid, reason.as_str());
        result.compute_status();
        Ok(())
    }

    /// WAITING 回到 RUNNABLE，清除等待原因
    pub async fn unpause_task(&self, oid: &str, result: &mut OperationResult) -> TaskManagerResult<()> {
        let result = result.create_subresult("unpauseTask");
        result.add_param("oid", oid);
        self.transition_to_runnable(oid, TaskExecutionStatus::Waiting, result)
            .await
    }

    async fn transition_to_runnable(
        &self,
        oid: &str,
        expected: TaskExecutionStatus,
        result: &mut OperationResult,
    ) -> TaskManagerResult<()> {
        let task = match self.task_repo.get_task(oid).await {
            Ok(task) => task,
            Err(e) => {
                result.record_fatal_error(e.to_string());
                return Err(e);
            }
        };
        if task.execution_status != expected {
            let e = TaskManagerError::illegal_state(format!(
                "任务 {} 当前状态为 {}，只有 {} 状态的任务可以执行该操作",
                oid, task.execution_status, expected
            ));
            warn!("{}", e);
            result.record_fatal_error(e.to_string());
            return Err(e);
        }

        if self.config.policy.resume_policy == ResumePolicy::FenceRunningElsewhere {
            let status = self
                .execution_manager
                .get_cluster_status_information(true, false, result)
                .await;
            if let Some(node) = status.find_node_running_task(oid) {
                let e = TaskManagerError::illegal_state(format!(
                    "任务 {} 仍在节点 {} 上执行",
                    oid, node.node_identifier
                ));
                warn!("{}", e);
                result.record_fatal_error(e.to_string());
                return Err(e);
            }
        }

        if let Err(e) = self
            .task_repo
            .modify_task(
                oid,
                &[
                    TaskModification::ExecutionStatus(TaskExecutionStatus::Runnable),
                    TaskModification::WaitingReason(None),
                ],
            )
            .await
        {
            result.record_fatal_error(e.to_string());
            return Err(e);
        }
        self.synchronize_after_change(oid, result).await;
        info!("任务 {} 从 {} 回到 RUNNABLE", oid, expected);
        result.compute_status();
        Ok(())
    }

    async fn synchronize_after_change(&self, oid: &str, result: &mut OperationResult) {
        match self.task_repo.get_task(oid).await {
            Ok(task) => {
                self.execution_manager.synchronize_task(&task, result).await;
            }
            Err(e) => warn!("状态修改后重新读取任务 {} 失败: {}", oid, e),
        }
    }

    // ---- 立即运行 ----

    /// 已关闭的任务重新打开后运行，可运行的任务立即触发，其他状态返回致命错误
    pub async fn schedule_task_now(&self, oid: &str, result: &mut OperationResult) -> TaskManagerResult<()> {
        let result = result.create_subresult("scheduleTaskNow");
        result.add_param("oid", oid);
        let mut task = match self.task_repo.get_task(oid).await {
            Ok(task) => task,
            Err(e) => {
                result.record_fatal_error(e.to_string());
                return Err(e);
            }
        };

        match task.execution_status {
            TaskExecutionStatus::Closed => {
                if let Err(e) = self
                    .task_repo
                    .modify_task(
                        oid,
                        &[
                            TaskModification::ExecutionStatus(TaskExecutionStatus::Runnable),
                            TaskModification::CompletionTimestamp(None),
                        ],
                    )
                    .await
                {
                    result.record_fatal_error(e.to_string());
                    return Err(e);
                }
                task.execution_status = TaskExecutionStatus::Runnable;
                task.completion_timestamp = None;
                info!("已关闭的任务 {} 重新打开", oid);
            }
            TaskExecutionStatus::Runnable => {}
            status => {
                let e = TaskManagerError::illegal_state(format!(
                    "任务 {oid} 当前状态为 {status}，不能立即运行"
                ));
                result.record_fatal_error(e.to_string());
                return Err(e);
            }
        }

        if let Err(e) = self.execution_manager.schedule_runnable_task_now(&task).await {
            error!("立即运行任务 {} 失败: {}", oid, e);
            result.record_fatal_error(e.to_string());
            return Err(e);
        }
        result.record_success();
        Ok(())
    }

    pub async fn schedule_tasks_now(&self, oids: &[String], result: &mut OperationResult) {
        let result = result.create_subresult("scheduleTasksNow");
        for oid in oids {
            if let Err(e) = self.schedule_task_now(oid, result).await {
                warn!("立即运行任务 {} 失败: {}", oid, e);
            }
        }
        result.compute_status();
    }

    // ---- 等待任务 ----

    /// 重新检查所有等待其他任务的任务，依赖满足的取消暂停；单个任务出错不影响扫描
    pub async fn check_waiting_tasks(&self, result: &mut OperationResult) -> usize {
        let result = result.create_subresult("checkWaitingTasks");
        let filter = TaskFilter::all()
            .with_status(TaskExecutionStatus::Waiting)
            .with_waiting_reason(TaskWaitingReason::OtherTasks);
        let waiting = match self.task_repo.search_tasks(&filter).await {
            Ok(tasks) => tasks,
            Err(e) => {
                error!("查询等待中的任务失败: {}", e);
                result.record_fatal_error(e.to_string());
                return 0;
            }
        };

        let mut unpaused = 0;
        for task in &waiting {
            match self.unpause_if_dependencies_satisfied(task, result).await {
                Ok(true) => unpaused += 1,
                Ok(false) => {}
                Err(e) => warn!("检查等待任务 {} 失败: {}", task.task_identifier, e),
            }
        }
        result.add_param("checked", waiting.len());
        result.add_param("unpaused", unpaused);
        result.compute_status();
        debug!("检查了 {} 个等待任务，{} 个恢复运行", waiting.len(), unpaused);
        unpaused
    }

    /// 任务关闭后检查等待它的父任务和依赖方
    pub(crate) async fn check_dependent_tasks_on_close(
        &self,
        closed: &TaskObject,
        result: &mut OperationResult,
    ) {
        let affected = match self.dependency_checker.waiting_tasks_affected_by(closed).await {
            Ok(affected) => affected,
            Err(e) => {
                warn!("查找等待任务 {} 的任务失败: {}", closed.task_identifier, e);
                return;
            }
        };
        for task in &affected {
            if let Err(e) = self.unpause_if_dependencies_satisfied(task, result).await {
                warn!("取消暂停任务 {} 失败: {}", task.task_identifier, e);
            }
        }
    }

    async fn unpause_if_dependencies_satisfied(
        &self,
        task: &TaskObject,
        result: &mut OperationResult,
    ) -> TaskManagerResult<bool> {
        if !is_waiting_for_other_tasks(task) {
            return Ok(false);
        }
        let oid = task
            .oid
            .as_deref()
            .ok_or_else(|| TaskManagerError::illegal_state("等待中的任务缺少 OID"))?;
        let check = self.dependency_checker.check_dependencies(task).await?;
        if !check.satisfied {
            return Ok(false);
        }
        info!("任务 {} 的依赖已满足，取消暂停", oid);
        self.unpause_task(oid, result).await?;
        Ok(true)
    }
}
