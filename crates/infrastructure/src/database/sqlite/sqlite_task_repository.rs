use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use taskmanager_domain::task_query_builder::{TaskQueryBuilder, TaskQueryParam};
use taskmanager_domain::{
    apply_task_modifications, TaskFilter, TaskModification, TaskObject, TaskRepository,
};
use taskmanager_errors::{TaskManagerError, TaskManagerResult};
use tracing::debug;
use uuid::Uuid;

use super::map_insert_error;

/// SQLite 任务仓储
///
/// 可查询的字段单独成列，完整对象以 JSON 存放在 `body` 中。
pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &SqliteRow) -> TaskManagerResult<TaskObject> {
        let oid: String = row.try_get("oid")?;
        let body: String = row.try_get("body")?;
        let mut task: TaskObject = serde_json::from_str(&body)?;
        task.oid = Some(oid);
        Ok(task)
    }

    async fn fetch_filtered(
        &self,
        sql: &str,
        params: Vec<TaskQueryParam>,
    ) -> TaskManagerResult<Vec<SqliteRow>> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = match param {
                TaskQueryParam::String(value) => query.bind(value),
                TaskQueryParam::Int64(value) => query.bind(value),
            };
        }
        Ok(query.fetch_all(&self.pool).await?)
    }

    async fn write_task(
        executor: &mut sqlx::SqliteConnection,
        task: &TaskObject,
        oid: &str,
    ) -> TaskManagerResult<u64> {
        let body = serde_json::to_string(task)?;
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET task_identifier = ?, name = ?, parent = ?, execution_status = ?,
                waiting_reason = ?, handler_uri = ?, completion_timestamp_ms = ?, body = ?
            WHERE oid = ?
            "#,
        )
        .bind(&task.task_identifier)
        .bind(&task.name)
        .bind(&task.parent)
        .bind(task.execution_status.as_str())
        .bind(task.waiting_reason.map(|r| r.as_str()))
        .bind(&task.handler_uri)
        .bind(task.completion_timestamp.map(|ts| ts.timestamp_millis()))
        .bind(body)
        .bind(oid)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    async fn get_task(&self, oid: &str) -> TaskManagerResult<TaskObject> {
        let row = sqlx::query("SELECT oid, body FROM tasks WHERE oid = ?")
            .bind(oid)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Self::row_to_task(&row),
            None => Err(TaskManagerError::task_not_found(oid)),
        }
    }

    async fn search_tasks(&self, filter: &TaskFilter) -> TaskManagerResult<Vec<TaskObject>> {
        let (sql, params) = TaskQueryBuilder::build_select_query(filter);
        let rows = self.fetch_filtered(&sql, params).await?;

        let mut tasks = Vec::with_capacity(rows.len());
        for row in &rows {
            let task = Self::row_to_task(row)?;
            if filter.matches(&task) {
                tasks.push(task);
            }
        }
        Ok(filter.page(tasks))
    }

    async fn count_tasks(&self, filter: &TaskFilter) -> TaskManagerResult<usize> {
        let (sql, params) = TaskQueryBuilder::build_count_query(filter);
        let rows = self.fetch_filtered(&sql, params).await?;

        let mut count = 0;
        for row in &rows {
            if filter.matches(&Self::row_to_task(row)?) {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn add_task(&self, task: &TaskObject) -> TaskManagerResult<String> {
        let oid = task
            .oid
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut stored = task.clone();
        stored.oid = Some(oid.clone());
        stored.next_run_start_timestamp = None;
        let body = serde_json::to_string(&stored)?;

        sqlx::query(
            r#"
            INSERT INTO tasks (oid, task_identifier, name, parent, execution_status,
                               waiting_reason, handler_uri, completion_timestamp_ms, body)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&oid)
        .bind(&stored.task_identifier)
        .bind(&stored.name)
        .bind(&stored.parent)
        .bind(stored.execution_status.as_str())
        .bind(stored.waiting_reason.map(|r| r.as_str()))
        .bind(&stored.handler_uri)
        .bind(stored.completion_timestamp.map(|ts| ts.timestamp_millis()))
        .bind(body)
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, &format!("任务 {}", stored.task_identifier)))?;

        debug!("添加任务成功: {} ({})", oid, stored.name);
        Ok(oid)
    }

    async fn modify_task(
        &self,
        oid: &str,
        modifications: &[TaskModification],
    ) -> TaskManagerResult<()> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT oid, body FROM tasks WHERE oid = ?")
            .bind(oid)
            .fetch_optional(&mut *tx)
            .await?;
        let mut task = match row {
            Some(row) => Self::row_to_task(&row)?,
            None => return Err(TaskManagerError::task_not_found(oid)),
        };

        apply_task_modifications(&mut task, modifications)?;

        if Self::write_task(&mut *tx, &task, oid).await? == 0 {
            return Err(TaskManagerError::task_not_found(oid));
        }
        tx.commit().await?;

        debug!("修改任务成功: {}", oid);
        Ok(())
    }

    async fn delete_task(&self, oid: &str) -> TaskManagerResult<()> {
        let result = sqlx::query("DELETE FROM tasks WHERE oid = ?")
            .bind(oid)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(TaskManagerError::task_not_found(oid));
        }

        debug!("删除任务成功: {}", oid);
        Ok(())
    }
}
