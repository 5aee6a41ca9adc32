use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use taskmanager_domain::{
    apply_task_modifications, TaskFilter, TaskModification, TaskObject, TaskRepository,
};
use taskmanager_errors::{TaskManagerError, TaskManagerResult};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct InMemoryTaskRepository {
    tasks: Arc<RwLock<HashMap<String, TaskObject>>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn get_task(&self, oid: &str) -> TaskManagerResult<TaskObject> {
        self.tasks
            .read()
            .await
            .get(oid)
            .cloned()
            .ok_or_else(|| TaskManagerError::task_not_found(oid))
    }

    async fn search_tasks(&self, filter: &TaskFilter) -> TaskManagerResult<Vec<TaskObject>> {
        let tasks = self.tasks.read().await;
        let mut matching: Vec<TaskObject> = tasks
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.task_identifier.cmp(&b.task_identifier));
        Ok(filter.page(matching))
    }

    async fn count_tasks(&self, filter: &TaskFilter) -> TaskManagerResult<usize> {
        let tasks = self.tasks.read().await;
        Ok(tasks.values().filter(|t| filter.matches(t)).count())
    }

    async fn add_task(&self, task: &TaskObject) -> TaskManagerResult<String> {
        let mut tasks = self.tasks.write().await;
        if tasks
            .values()
            .any(|t| t.task_identifier == task.task_identifier)
        {
            return Err(TaskManagerError::ObjectAlreadyExists(format!(
                "任务标识 {} 已存在",
                task.task_identifier
            )));
        }

        let oid = task
            .oid
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        if tasks.contains_key(&oid) {
            return Err(TaskManagerError::ObjectAlreadyExists(format!(
                "任务 OID {oid} 已存在"
            )));
        }

        let mut stored = task.clone();
        stored.oid = Some(oid.clone());
        stored.next_run_start_timestamp = None;
        tasks.insert(oid.clone(), stored);
        debug!("添加任务: {} ({})", oid, task.name);
        Ok(oid)
    }

    async fn modify_task(
        &self,
        oid: &str,
        modifications: &[TaskModification],
    ) -> TaskManagerResult<()> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(oid)
            .ok_or_else(|| TaskManagerError::task_not_found(oid))?;
        apply_task_modifications(task, modifications)
    }

    async fn delete_task(&self, oid: &str) -> TaskManagerResult<()> {
        match self.tasks.write().await.remove(oid) {
            Some(_) => {
                debug!("删除任务: {}", oid);
                Ok(())
            }
            None => Err(TaskManagerError::task_not_found(oid)),
        }
    }
}
