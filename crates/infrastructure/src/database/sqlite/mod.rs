mod sqlite_node_repository;
mod sqlite_task_repository;

pub use sqlite_node_repository::SqliteNodeRepository;
pub use sqlite_task_repository::SqliteTaskRepository;

use taskmanager_errors::TaskManagerError;

/// 唯一约束冲突转换为“已存在”，其他数据库错误原样保留
pub(crate) fn map_insert_error(err: sqlx::Error, what: &str) -> TaskManagerError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            TaskManagerError::ObjectAlreadyExists(what.to_string())
        }
        _ => TaskManagerError::Database(err),
    }
}
