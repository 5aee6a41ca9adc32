use chrono::Utc;
use taskmanager_domain::{
    validate_schedule, GetOptions, OperationResult, TaskExecutionStatus, TaskFilter,
    TaskModification, TaskObject, TaskWaitingReason,
};
use taskmanager_errors::{TaskManagerError, TaskManagerResult};
use taskmanager_infrastructure::CronScheduler;
use tracing::{debug, error, info, warn};

use super::TaskManager;
use crate::task::TaskInstance;

impl TaskManager {
    pub async fn get_task(
        &self,
        oid: &str,
        result: &mut OperationResult,
    ) -> TaskManagerResult<TaskInstance> {
        let result = result.create_subresult("getTask");
        result.add_param("oid", oid);
        match self.task_repo.get_task(oid).await {
            Ok(object) => {
                result.record_success();
                Ok(self.create_task_instance_from(object))
            }
            Err(e) => {
                result.record_fatal_error(e.to_string());
                Err(e)
            }
        }
    }

    pub async fn get_task_by_identifier(
        &self,
        identifier: &str,
        result: &mut OperationResult,
    ) -> TaskManagerResult<TaskInstance> {
        let result = result.create_subresult("getTaskByIdentifier");
        result.add_param("identifier", identifier);
        let found = self
            .task_repo
            .search_tasks(&TaskFilter::all().with_identifier(identifier))
            .await
            .and_then(|tasks| {
                tasks.into_iter().next().ok_or_else(|| TaskManagerError::ObjectNotFound {
                    object_type: "Task".to_string(),
                    id: identifier.to_string(),
                })
            });
        match found {
            Ok(object) => {
                result.record_success();
                Ok(self.create_task_instance_from(object))
            }
            Err(e) => {
                result.record_fatal_error(e.to_string());
                Err(e)
            }
        }
    }

    /// 读取任务记录，按选项补充实际执行节点和下次运行时间
    pub async fn get_task_object(
        &self,
        oid: &str,
        options: GetOptions,
        result: &mut OperationResult,
    ) -> TaskManagerResult<TaskObject> {
        let result = result.create_subresult("getTaskObject");
        result.add_param("oid", oid);
        let task = match self.task_repo.get_task(oid).await {
            Ok(task) => task,
            Err(e) => {
                result.record_fatal_error(e.to_string());
                return Err(e);
            }
        };
        let mut tasks = vec![task];
        self.enrich_tasks(&mut tasks, options, result).await;
        result.compute_status();
        tasks
            .pop()
            .ok_or_else(|| TaskManagerError::Internal("任务补充后丢失".to_string()))
    }

    /// 把临时任务持久化并交给调度器，结果置为进行中
    pub async fn switch_to_background(
        &self,
        task: &mut TaskInstance,
        result: &mut OperationResult,
    ) -> TaskManagerResult<String> {
        let result = result.create_subresult("switchToBackground");
        result.add_param("identifier", task.task_identifier());
        if task.is_persistent() {
            let err = TaskManagerError::illegal_state(format!(
                "任务 {} 已经持久化",
                task.task_identifier()
            ));
            result.record_fatal_error(err.to_string());
            return Err(err);
        }

        task.result_mut().record_in_progress();
        let mut object = task.object().clone();
        object.execution_status = TaskExecutionStatus::Runnable;
        object.result = Some(task.result().clone());

        match self.add_task(object, result).await {
            Ok(oid) => {
                task.set_oid(oid.clone());
                task.refresh().await?;
                info!("任务 {} 已切换到后台运行 ({})", task.task_identifier(), oid);
                result.record_in_progress();
                Ok(oid)
            }
            Err(e) => {
                result.record_fatal_error(e.to_string());
                Err(e)
            }
        }
    }

    /// 校验并写入仓储，随后同步到调度器
    pub async fn add_task(
        &self,
        mut task: TaskObject,
        result: &mut OperationResult,
    ) -> TaskManagerResult<String> {
        let result = result.create_subresult("addTask");
        if let Err(e) = self.prepare_new_task(&mut task) {
            result.record_fatal_error(e.to_string());
            return Err(e);
        }
        result.add_param("identifier", &task.task_identifier);

        let oid = match self.task_repo.add_task(&task).await {
            Ok(oid) => oid,
            Err(e) => {
                error!("添加任务 {} 失败: {}", task.task_identifier, e);
                result.record_fatal_error(e.to_string());
                return Err(e);
            }
        };
        result.add_param("oid", &oid);
        if let Some(uri) = &task.handler_uri {
            if self.get_handler(uri).is_none() {
                warn!("任务 {} 的处理器 {} 尚未注册", oid, uri);
            }
        }

        self.on_task_create(&oid, result).await;
        result.compute_status();
        debug!("新增任务 {} ({})", oid, task.name);
        Ok(oid)
    }

    fn prepare_new_task(&self, task: &mut TaskObject) -> TaskManagerResult<()> {
        if task.task_identifier.trim().is_empty() {
            task.task_identifier = self.identifiers.generate();
        }
        if task.name.trim().is_empty() {
            return Err(TaskManagerError::schema("任务名称不能为空"));
        }
        if let Some(schedule) = &task.schedule {
            validate_schedule(schedule)?;
            if let Some(expr) = &schedule.cron {
                CronScheduler::validate_cron_expression(expr)?;
            }
        }
        if task.waiting_reason.is_some() && task.execution_status != TaskExecutionStatus::Waiting {
            return Err(TaskManagerError::schema("等待原因只能设置在 WAITING 状态的任务上"));
        }
        if task.execution_status == TaskExecutionStatus::Waiting && task.waiting_reason.is_none() {
            task.waiting_reason = Some(TaskWaitingReason::Other);
        }
        if task.execution_status == TaskExecutionStatus::Closed && task.completion_timestamp.is_none() {
            task.completion_timestamp = Some(Utc::now());
        }
        task.oid = None;
        task.node = None;
        Ok(())
    }

    /// 仓储修改；涉及状态或调度规则时重建触发器
    pub async fn modify_task(
        &self,
        oid: &str,
        modifications: &[TaskModification],
        result: &mut OperationResult,
    ) -> TaskManagerResult<()> {
        let result = result.create_subresult("modifyTask");
        result.add_param("oid", oid);

        let mut modifications = modifications.to_vec();
        for modification in &modifications {
            if let TaskModification::Schedule(Some(schedule)) = modification {
                if let Some(expr) = &schedule.cron {
                    if let Err(e) = CronScheduler::validate_cron_expression(expr) {
                        result.record_fatal_error(e.to_string());
                        return Err(TaskManagerError::schema(e.to_string()));
                    }
                }
            }
        }
        let closes = modifications
            .iter()
            .any(|m| *m == TaskModification::ExecutionStatus(TaskExecutionStatus::Closed));
        let sets_completion = modifications
            .iter()
            .any(|m| matches!(m, TaskModification::CompletionTimestamp(_)));
        if closes && !sets_completion {
            modifications.push(TaskModification::CompletionTimestamp(Some(Utc::now())));
        }

        if let Err(e) = self.task_repo.modify_task(oid, &modifications).await {
            result.record_fatal_error(e.to_string());
            return Err(e);
        }

        if modifications.iter().any(TaskModification::affects_scheduling) {
            match self.task_repo.get_task(oid).await {
                Ok(task) => {
                    self.execution_manager.synchronize_task(&task, result).await;
                    if closes {
                        self.check_dependent_tasks_on_close(&task, result).await;
                    }
                }
                Err(e) => warn!("修改后重新读取任务 {} 失败: {}", oid, e),
            }
        }
        result.compute_status();
        Ok(())
    }

    /// 删除任务；任务似乎仍在执行时给出警告但照常删除
    pub async fn delete_task(&self, oid: &str, result: &mut OperationResult) -> TaskManagerResult<()> {
        let result = result.create_subresult("deleteTask");
        result.add_param("oid", oid);

        let task = match self.task_repo.get_task(oid).await {
            Ok(task) => task,
            Err(e) => {
                result.record_fatal_error(e.to_string());
                return Err(e);
            }
        };

        let mut status_result = OperationResult::new("checkRunning");
        let running_elsewhere = self
            .execution_manager
            .get_cluster_status_information(false, true, &mut status_result)
            .await
            .is_task_running(oid);
        if running_elsewhere || self.execution_manager.is_task_running_locally(oid).await {
            warn!("任务 {} 似乎仍在执行，仍然删除", oid);
            result
                .create_subresult("checkRunning")
                .record_warning(format!("任务 {} 似乎仍在执行", task.name));
        }

        if let Err(e) = self.delete_task_record(oid, result).await {
            result.record_fatal_error(e.to_string());
            return Err(e);
        }
        result.compute_status();
        Ok(())
    }

    /// 仓储删除后移除作业，作业移除失败不影响结果
    pub(crate) async fn delete_task_record(
        &self,
        oid: &str,
        result: &mut OperationResult,
    ) -> TaskManagerResult<()> {
        self.task_repo.delete_task(oid).await?;
        self.metrics.record_task_deleted();
        self.on_task_delete(oid, result).await;
        debug!("已删除任务 {}", oid);
        Ok(())
    }

    /// 任务写入仓储后调用，建立作业和触发器
    pub async fn on_task_create(&self, oid: &str, result: &mut OperationResult) {
        match self.task_repo.get_task(oid).await {
            Ok(task) => {
                self.execution_manager.synchronize_task(&task, result).await;
            }
            Err(e) => {
                warn!("新建任务 {} 读取失败，跳过调度同步: {}", oid, e);
                result
                    .create_subresult("onTaskCreate")
                    .record_warning(e.to_string());
            }
        }
    }

    pub async fn on_task_delete(&self, oid: &str, result: &mut OperationResult) {
        if let Err(e) = self.execution_manager.remove_task_from_scheduler(oid).await {
            error!("从调度器移除任务 {} 失败: {}", oid, e);
            self.metrics.record_scheduler_sync_failure();
            result
                .create_subresult("onTaskDelete")
                .record_warning(format!("从调度器移除失败: {e}"));
        }
    }

    /// 关闭任务：写入完成时间，移除作业，检查等待它的任务；重复关闭不报错
    pub async fn close_task(&self, oid: &str, result: &mut OperationResult) -> TaskManagerResult<()> {
        let result = result.create_subresult("closeTask");
        result.add_param("oid", oid);
        let task = match self.task_repo.get_task(oid).await {
            Ok(task) => task,
            Err(e) => {
                result.record_fatal_error(e.to_string());
                return Err(e);
            }
        };
        if let Err(e) = self.close_task_resolved(task, result).await {
            result.record_fatal_error(e.to_string());
            return Err(e);
        }
        result.compute_status();
        Ok(())
    }

    pub(crate) async fn close_task_resolved(
        &self,
        mut task: TaskObject,
        result: &mut OperationResult,
    ) -> TaskManagerResult<()> {
        let oid = task
            .oid
            .clone()
            .ok_or_else(|| TaskManagerError::illegal_state("只有持久化任务可以关闭"))?;

        if !task.is_closed() {
            let now = Utc::now();
            self.task_repo
                .modify_task(
                    &oid,
                    &[
                        TaskModification::ExecutionStatus(TaskExecutionStatus::Closed),
                        TaskModification::WaitingReason(None),
                        TaskModification::CompletionTimestamp(Some(now)),
                    ],
                )
                .await?;
            task.execution_status = TaskExecutionStatus::Closed;
            task.waiting_reason = None;
            task.completion_timestamp = Some(now);
            info!("任务 {} 已关闭", oid);
        }

        self.execution_manager.synchronize_task(&task, result).await;
        self.check_dependent_tasks_on_close(&task, result).await;
        Ok(())
    }

    pub async fn validate_cron_expression(&self, expression: &str) -> TaskManagerResult<()> {
        CronScheduler::validate_cron_expression(expression)
    }
}
