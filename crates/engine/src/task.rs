//! 任务实例
//!
//! `TaskInstance` 是持久化任务记录在内存中的可变投影。普通 setter 只修改内存，
//! 对持久化任务同时记下待保存的增量；`*_immediate` 系列先写仓储再更新内存，
//! 仓储报错时内存保持不变。

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use taskmanager_domain::{
    apply_task_modifications, CancellationFlag, OperationResult, ScheduleSpec, TaskExecutionStatus,
    TaskFilter, TaskModification, TaskObject, TaskPersistenceStatus, TaskRecurrence,
    TaskRepository, TaskWaitingReason,
};
use taskmanager_errors::{TaskManagerError, TaskManagerResult};
use tracing::{debug, trace};

use crate::dependency_checker::DependencyChecker;

pub struct TaskInstance {
    object: TaskObject,
    repository: Arc<dyn TaskRepository>,
    cancel: CancellationFlag,
    result: OperationResult,
    pending: Vec<TaskModification>,
}

impl TaskInstance {
    pub fn new(object: TaskObject, repository: Arc<dyn TaskRepository>) -> Self {
        let result = object
            .result
            .clone()
            .unwrap_or_else(|| OperationResult::new(format!("run {}", object.task_identifier)));
        Self {
            object,
            repository,
            cancel: CancellationFlag::new(),
            result,
            pending: Vec::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn object(&self) -> &TaskObject {
        &self.object
    }

    pub fn into_object(self) -> TaskObject {
        self.object
    }

    pub fn oid(&self) -> Option<&str> {
        self.object.oid.as_deref()
    }

    pub fn task_identifier(&self) -> &str {
        &self.object.task_identifier
    }

    pub fn name(&self) -> &str {
        &self.object.name
    }

    pub fn execution_status(&self) -> TaskExecutionStatus {
        self.object.execution_status
    }

    pub fn waiting_reason(&self) -> Option<TaskWaitingReason> {
        self.object.waiting_reason
    }

    pub fn handler_uri(&self) -> Option<&str> {
        self.object.handler_uri.as_deref()
    }

    pub fn extension(&self) -> &serde_json::Value {
        &self.object.extension
    }

    pub fn progress(&self) -> u64 {
        self.object.progress
    }

    pub fn persistence_status(&self) -> TaskPersistenceStatus {
        self.object.persistence_status()
    }

    pub fn is_persistent(&self) -> bool {
        self.persistence_status() == TaskPersistenceStatus::Persistent
    }

    pub fn is_transient(&self) -> bool {
        !self.is_persistent()
    }

    /// 处理器在迭代点轮询；被挂起或节点停止时返回 false
    pub fn can_run(&self) -> bool {
        self.cancel.can_run()
    }

    pub fn cancellation_flag(&self) -> &CancellationFlag {
        &self.cancel
    }

    pub fn result(&self) -> &OperationResult {
        &self.result
    }

    pub fn result_mut(&mut self) -> &mut OperationResult {
        &mut self.result
    }

    pub fn set_result(&mut self, result: OperationResult) {
        self.result = result.clone();
        self.set(TaskModification::Result(Some(result)));
    }

    pub fn has_pending_modifications(&self) -> bool {
        !self.pending.is_empty()
    }

    pub(crate) fn set_oid(&mut self, oid: String) {
        self.object.oid = Some(oid);
        self.pending.clear();
    }

    pub(crate) fn require_oid(&self) -> TaskManagerResult<&str> {
        self.object.oid.as_deref().ok_or_else(|| {
            TaskManagerError::illegal_state(format!(
                "任务 {} 尚未持久化，只有持久化任务支持该操作",
                self.object.task_identifier
            ))
        })
    }

    fn set(&mut self, modification: TaskModification) {
        if self.is_persistent() {
            self.pending.push(modification);
        }
    }

    // 普通 setter：修改内存，持久化任务记下增量

    pub fn set_name<S: Into<String>>(&mut self, name: S) {
        let name = name.into();
        self.object.name = name.clone();
        self.set(TaskModification::Name(name));
    }

    pub fn set_category(&mut self, category: Option<String>) {
        self.object.category = category.clone();
        self.set(TaskModification::Category(category));
    }

    pub fn set_handler_uri(&mut self, uri: Option<String>) {
        self.object.handler_uri = uri.clone();
        self.set(TaskModification::HandlerUri(uri));
    }

    pub fn set_schedule(&mut self, schedule: Option<ScheduleSpec>) {
        self.object.schedule = schedule.clone();
        self.set(TaskModification::Schedule(schedule));
    }

    pub fn set_recurrence(&mut self, recurrence: TaskRecurrence) {
        self.object.recurrence = recurrence;
        self.set(TaskModification::Recurrence(recurrence));
    }

    /// 周期任务，按固定间隔执行
    pub fn make_recurring_interval(&mut self, seconds: u64) {
        self.set_recurrence(TaskRecurrence::Recurring);
        self.set_schedule(Some(ScheduleSpec::interval(seconds)));
    }

    pub fn make_recurring_cron<S: Into<String>>(&mut self, expression: S) {
        self.set_recurrence(TaskRecurrence::Recurring);
        self.set_schedule(Some(ScheduleSpec::cron(expression)));
    }

    pub fn make_single(&mut self) {
        self.set_recurrence(TaskRecurrence::Single);
        self.set_schedule(None);
    }

    pub fn set_parent(&mut self, parent_identifier: Option<String>) {
        self.object.parent = parent_identifier.clone();
        self.set(TaskModification::Parent(parent_identifier));
    }

    pub fn set_extension(&mut self, extension: serde_json::Value) {
        self.object.extension = extension.clone();
        self.set(TaskModification::Extension(extension));
    }

    pub fn set_progress(&mut self, progress: u64) {
        self.object.progress = progress;
        self.set(TaskModification::Progress(progress));
    }

    pub fn increment_progress(&mut self) {
        self.set_progress(self.object.progress + 1);
    }

    /// 声明 `identifier` 对应的任务等待本任务结束
    pub fn add_dependent<S: Into<String>>(&mut self, identifier: S) {
        let identifier = identifier.into();
        if !self.object.dependents.contains(&identifier) {
            self.object.dependents.push(identifier.clone());
        }
        self.set(TaskModification::AddDependent(identifier));
    }

    pub fn set_initial_execution_status(&mut self, status: TaskExecutionStatus) -> TaskManagerResult<()> {
        if self.is_persistent() {
            return Err(TaskManagerError::illegal_state(
                "持久化任务的执行状态只能通过立即写入修改",
            ));
        }
        self.object.execution_status = status;
        Ok(())
    }

    /// 把累积的增量一次写入仓储
    pub async fn save_pending_modifications(&mut self) -> TaskManagerResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let oid = self.require_oid()?.to_string();
        let modifications = std::mem::take(&mut self.pending);
        trace!("保存任务 {} 的 {} 个待写增量", oid, modifications.len());
        if let Err(e) = self.repository.modify_task(&oid, &modifications).await {
            self.pending = modifications;
            return Err(e);
        }
        Ok(())
    }

    // 立即写入：先仓储，后内存

    async fn modify_immediate(&mut self, modifications: Vec<TaskModification>) -> TaskManagerResult<()> {
        let oid = self.require_oid()?.to_string();
        self.repository.modify_task(&oid, &modifications).await?;
        apply_task_modifications(&mut self.object, &modifications)?;
        debug!("任务 {} 已立即写入 {} 个增量", oid, modifications.len());
        Ok(())
    }

    pub async fn set_execution_status_immediate(
        &mut self,
        status: TaskExecutionStatus,
    ) -> TaskManagerResult<()> {
        self.modify_immediate(vec![TaskModification::ExecutionStatus(status)])
            .await
    }

    pub async fn set_waiting_reason_immediate(
        &mut self,
        reason: Option<TaskWaitingReason>,
    ) -> TaskManagerResult<()> {
        self.modify_immediate(vec![TaskModification::WaitingReason(reason)])
            .await
    }

    pub async fn set_completion_timestamp_immediate(
        &mut self,
        timestamp: Option<DateTime<Utc>>,
    ) -> TaskManagerResult<()> {
        self.modify_immediate(vec![TaskModification::CompletionTimestamp(timestamp)])
            .await
    }

    /// 状态与等待原因一起写入；离开 WAITING 时等待原因被清空
    pub async fn set_status_and_waiting_reason_immediate(
        &mut self,
        status: TaskExecutionStatus,
        reason: Option<TaskWaitingReason>,
    ) -> TaskManagerResult<()> {
        let reason = if status == TaskExecutionStatus::Waiting {
            reason
        } else {
            None
        };
        self.modify_immediate(vec![
            TaskModification::ExecutionStatus(status),
            TaskModification::WaitingReason(reason),
        ])
        .await
    }

    /// 从仓储重新加载；内存中未保存的增量被丢弃
    pub async fn refresh(&mut self) -> TaskManagerResult<()> {
        let oid = self.require_oid()?.to_string();
        self.object = self.repository.get_task(&oid).await?;
        self.pending.clear();
        Ok(())
    }

    pub async fn list_subtasks(&self) -> TaskManagerResult<Vec<TaskObject>> {
        if self.is_transient() {
            return Ok(Vec::new());
        }
        self.repository
            .search_tasks(&TaskFilter::all().children_of(self.object.task_identifier.clone()))
            .await
    }

    /// 整棵子任务树，广度优先，不含自身
    pub async fn list_subtasks_deeply(&self) -> TaskManagerResult<Vec<TaskObject>> {
        list_subtree(self.repository.as_ref(), &self.object).await
    }

    /// 本任务等待的前置任务，即依赖方列表中含本任务 identifier 的任务
    pub async fn list_prerequisite_tasks(&self) -> TaskManagerResult<Vec<TaskObject>> {
        if self.is_transient() {
            return Ok(Vec::new());
        }
        self.repository
            .search_tasks(&TaskFilter::all().with_dependent(self.object.task_identifier.clone()))
            .await
    }

    /// 所有子任务和前置任务都已关闭
    pub async fn dependencies_satisfied(&self) -> TaskManagerResult<bool> {
        if self.is_transient() {
            return Ok(true);
        }
        let checker = DependencyChecker::new(Arc::clone(&self.repository));
        Ok(checker.check_dependencies(&self.object).await?.satisfied)
    }
}

/// 广度优先列出任务的整棵子树，已访问的 identifier 不重复展开
pub(crate) async fn list_subtree(
    repository: &dyn TaskRepository,
    root: &TaskObject,
) -> TaskManagerResult<Vec<TaskObject>> {
    if root.oid.is_none() {
        return Ok(Vec::new());
    }
    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(root.task_identifier.clone());
    let mut queue: VecDeque<String> = VecDeque::from([root.task_identifier.clone()]);
    let mut subtree = Vec::new();

    while let Some(identifier) = queue.pop_front() {
        let children = repository
            .search_tasks(&TaskFilter::all().children_of(identifier))
            .await?;
        for child in children {
            if visited.insert(child.task_identifier.clone()) {
                queue.push_back(child.task_identifier.clone());
                subtree.push(child);
            }
        }
    }
    Ok(subtree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskmanager_infrastructure::InMemoryTaskRepository;

    async fn persisted(repo: &Arc<InMemoryTaskRepository>, task: TaskObject) -> TaskObject {
        let oid = repo.add_task(&task).await.unwrap();
        repo.get_task(&oid).await.unwrap()
    }

    #[tokio::test]
    async fn test_immediate_setter_writes_repository_first() {
        let repo = Arc::new(InMemoryTaskRepository::new());
        let object = persisted(&repo, TaskObject::new("1-0-1", "root")).await;
        let oid = object.oid.clone().unwrap();
        let mut task = TaskInstance::new(object, repo.clone());

        task.set_status_and_waiting_reason_immediate(
            TaskExecutionStatus::Waiting,
            Some(TaskWaitingReason::OtherTasks),
        )
        .await
        .unwrap();

        let stored = repo.get_task(&oid).await.unwrap();
        assert_eq!(stored.execution_status, TaskExecutionStatus::Waiting);
        assert_eq!(stored.waiting_reason, Some(TaskWaitingReason::OtherTasks));
        assert_eq!(task.execution_status(), TaskExecutionStatus::Waiting);
    }

    #[tokio::test]
    async fn test_immediate_setter_keeps_memory_on_repository_error() {
        let repo = Arc::new(InMemoryTaskRepository::new());
        let object = persisted(&repo, TaskObject::new("1-0-1", "root")).await;
        let oid = object.oid.clone().unwrap();
        let mut task = TaskInstance::new(object, repo.clone());
        repo.delete_task(&oid).await.unwrap();

        let err = task
            .set_execution_status_immediate(TaskExecutionStatus::Suspended)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(task.execution_status(), TaskExecutionStatus::Runnable);
    }

    #[tokio::test]
    async fn test_transient_task_rejects_immediate_changes() {
        let repo = Arc::new(InMemoryTaskRepository::new());
        let mut task = TaskInstance::new(TaskObject::new("1-0-1", "t"), repo);
        assert!(task.is_transient());
        let err = task
            .set_execution_status_immediate(TaskExecutionStatus::Suspended)
            .await
            .unwrap_err();
        assert!(matches!(err, TaskManagerError::IllegalState(_)));

        task.set_name("renamed");
        assert!(!task.has_pending_modifications());
    }

    #[tokio::test]
    async fn test_pending_modifications_saved_together() {
        let repo = Arc::new(InMemoryTaskRepository::new());
        let object = persisted(&repo, TaskObject::new("1-0-1", "root")).await;
        let oid = object.oid.clone().unwrap();
        let mut task = TaskInstance::new(object, repo.clone());

        task.set_name("renamed");
        task.set_progress(7);
        assert!(task.has_pending_modifications());
        task.save_pending_modifications().await.unwrap();
        assert!(!task.has_pending_modifications());

        let stored = repo.get_task(&oid).await.unwrap();
        assert_eq!(stored.name, "renamed");
        assert_eq!(stored.progress, 7);
    }

    #[tokio::test]
    async fn test_subtasks_and_dependencies() {
        let repo = Arc::new(InMemoryTaskRepository::new());
        let root = persisted(&repo, TaskObject::new("root", "root")).await;

        let mut child = TaskObject::new("child", "child");
        child.parent = Some("root".to_string());
        let child = persisted(&repo, child).await;

        let mut grandchild = TaskObject::new("grandchild", "grandchild");
        grandchild.parent = Some("child".to_string());
        persisted(&repo, grandchild).await;

        let task = TaskInstance::new(root, repo.clone());
        assert_eq!(task.list_subtasks().await.unwrap().len(), 1);
        let deep = task.list_subtasks_deeply().await.unwrap();
        let ids: Vec<&str> = deep.iter().map(|t| t.task_identifier.as_str()).collect();
        assert_eq!(ids, vec!["child", "grandchild"]);
        assert!(!task.dependencies_satisfied().await.unwrap());

        repo.modify_task(
            child.oid.as_deref().unwrap(),
            &[TaskModification::ExecutionStatus(TaskExecutionStatus::Closed)],
        )
        .await
        .unwrap();
        assert!(task.dependencies_satisfied().await.unwrap());
    }

    #[tokio::test]
    async fn test_prerequisites_block_dependencies() {
        let repo = Arc::new(InMemoryTaskRepository::new());
        let waiting = persisted(&repo, TaskObject::new("waiting", "waiting")).await;
        let mut prerequisite = TaskObject::new("pre", "pre");
        prerequisite.dependents = vec!["waiting".to_string()];
        persisted(&repo, prerequisite).await;

        let task = TaskInstance::new(waiting, repo.clone());
        assert_eq!(task.list_prerequisite_tasks().await.unwrap().len(), 1);
        assert!(!task.dependencies_satisfied().await.unwrap());
    }

    #[test]
    fn test_cancellation_is_visible_to_handler() {
        let repo = Arc::new(InMemoryTaskRepository::new());
        let flag = CancellationFlag::new();
        let task = TaskInstance::new(TaskObject::new("1-0-1", "t"), repo).with_cancellation(flag.clone());
        assert!(task.can_run());
        flag.cancel();
        assert!(!task.can_run());
    }
}
