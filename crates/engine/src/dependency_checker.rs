use std::sync::Arc;

use taskmanager_domain::{
    TaskExecutionStatus, TaskFilter, TaskObject, TaskRepository, TaskWaitingReason,
};
use taskmanager_errors::TaskManagerResult;
use tracing::debug;

/// 等待其他任务的任务能否继续
pub struct DependencyChecker {
    task_repo: Arc<dyn TaskRepository>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DependencyCheckResult {
    pub satisfied: bool,
    /// 尚未关闭的子任务和前置任务 identifier
    pub blocking_tasks: Vec<String>,
}

impl DependencyChecker {
    pub fn new(task_repo: Arc<dyn TaskRepository>) -> Self {
        Self { task_repo }
    }

    /// 子任务和前置任务全部关闭才算满足
    pub async fn check_dependencies(
        &self,
        task: &TaskObject,
    ) -> TaskManagerResult<DependencyCheckResult> {
        let subtasks = self
            .task_repo
            .search_tasks(&TaskFilter::all().children_of(task.task_identifier.clone()))
            .await?;
        let prerequisites = self
            .task_repo
            .search_tasks(&TaskFilter::all().with_dependent(task.task_identifier.clone()))
            .await?;

        let blocking_tasks: Vec<String> = subtasks
            .iter()
            .chain(prerequisites.iter())
            .filter(|t| !t.is_closed())
            .map(|t| t.task_identifier.clone())
            .collect();

        if blocking_tasks.is_empty() {
            debug!("任务 {} 的依赖已全部满足", task.task_identifier);
        } else {
            debug!(
                "任务 {} 仍在等待 {} 个任务: {:?}",
                task.task_identifier,
                blocking_tasks.len(),
                blocking_tasks
            );
        }

        Ok(DependencyCheckResult {
            satisfied: blocking_tasks.is_empty(),
            blocking_tasks,
        })
    }

    /// 任务关闭后需要重新检查的等待任务：父任务和依赖方
    pub async fn waiting_tasks_affected_by(
        &self,
        closed: &TaskObject,
    ) -> TaskManagerResult<Vec<TaskObject>> {
        let mut identifiers: Vec<&String> = closed.dependents.iter().collect();
        if let Some(parent) = &closed.parent {
            identifiers.push(parent);
        }

        let mut affected: Vec<TaskObject> = Vec::new();
        for identifier in identifiers {
            let found = self
                .task_repo
                .search_tasks(&TaskFilter::all().with_identifier(identifier.clone()))
                .await?;
            for task in found {
                if is_waiting_for_other_tasks(&task)
                    && !affected.iter().any(|t| t.oid == task.oid)
                {
                    affected.push(task);
                }
            }
        }
        Ok(affected)
    }
}

pub fn is_waiting_for_other_tasks(task: &TaskObject) -> bool {
    task.execution_status == TaskExecutionStatus::Waiting
        && task.waiting_reason == Some(TaskWaitingReason::OtherTasks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskmanager_infrastructure::InMemoryTaskRepository;

    fn waiting(identifier: &str) -> TaskObject {
        let mut task = TaskObject::new(identifier, identifier);
        task.execution_status = TaskExecutionStatus::Waiting;
        task.waiting_reason = Some(TaskWaitingReason::OtherTasks);
        task
    }

    #[tokio::test]
    async fn test_blocking_subtasks_reported() {
        let repo = Arc::new(InMemoryTaskRepository::new());
        let parent = waiting("parent");
        repo.add_task(&parent).await.unwrap();

        let mut child = TaskObject::new("child", "child");
        child.parent = Some("parent".to_string());
        repo.add_task(&child).await.unwrap();

        let mut done = TaskObject::new("done", "done");
        done.parent = Some("parent".to_string());
        done.execution_status = TaskExecutionStatus::Closed;
        repo.add_task(&done).await.unwrap();

        let checker = DependencyChecker::new(repo.clone());
        let result = checker.check_dependencies(&parent).await.unwrap();
        assert!(!result.satisfied);
        assert_eq!(result.blocking_tasks, vec!["child".to_string()]);
    }

    #[tokio::test]
    async fn test_affected_waiting_tasks() {
        let repo = Arc::new(InMemoryTaskRepository::new());
        repo.add_task(&waiting("parent")).await.unwrap();
        repo.add_task(&waiting("follower")).await.unwrap();
        repo.add_task(&TaskObject::new("runnable", "runnable"))
            .await
            .unwrap();

        let mut closed = TaskObject::new("child", "child");
        closed.parent = Some("parent".to_string());
        closed.dependents = vec!["follower".to_string(), "runnable".to_string()];
        closed.execution_status = TaskExecutionStatus::Closed;

        let checker = DependencyChecker::new(repo.clone());
        let affected = checker.waiting_tasks_affected_by(&closed).await.unwrap();
        let mut ids: Vec<&str> = affected.iter().map(|t| t.task_identifier.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["follower", "parent"]);
    }
}
