use crate::queries::{ParentFilter, TaskFilter};

/// 把 `TaskFilter` 中可下推的条件翻译成 SQLite 查询
///
/// 类别、依赖方等存放在 JSON 正文里的条件不下推，由调用方对结果再执行
/// `TaskFilter::matches`，分页也在那之后进行。
pub struct TaskQueryBuilder;

pub const TASK_COLUMNS: &str = "oid, body";

impl TaskQueryBuilder {
    pub fn build_select_query(filter: &TaskFilter) -> (String, Vec<TaskQueryParam>) {
        let mut query = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE 1=1");
        let params = Self::push_conditions(&mut query, filter);
        query.push_str(" ORDER BY task_identifier ASC");
        (query, params)
    }

    pub fn build_count_query(filter: &TaskFilter) -> (String, Vec<TaskQueryParam>) {
        let mut query = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE 1=1");
        let params = Self::push_conditions(&mut query, filter);
        (query, params)
    }

    fn push_conditions(query: &mut String, filter: &TaskFilter) -> Vec<TaskQueryParam> {
        let mut params = Vec::new();

        if let Some(status) = filter.execution_status {
            query.push_str(" AND execution_status = ?");
            params.push(TaskQueryParam::String(status.as_str().to_string()));
        }

        if let Some(reason) = filter.waiting_reason {
            query.push_str(" AND waiting_reason = ?");
            params.push(TaskQueryParam::String(reason.as_str().to_string()));
        }

        match &filter.parent {
            ParentFilter::Any => {}
            ParentFilter::Root => query.push_str(" AND parent IS NULL"),
            ParentFilter::Of(parent) => {
                query.push_str(" AND parent = ?");
                params.push(TaskQueryParam::String(parent.clone()));
            }
        }

        if let Some(cutoff) = filter.completed_before {
            query.push_str(" AND completion_timestamp_ms IS NOT NULL AND completion_timestamp_ms < ?");
            params.push(TaskQueryParam::Int64(cutoff.timestamp_millis()));
        }

        if let Some(identifier) = &filter.task_identifier {
            query.push_str(" AND task_identifier = ?");
            params.push(TaskQueryParam::String(identifier.clone()));
        }

        if let Some(uri) = &filter.handler_uri {
            query.push_str(" AND handler_uri = ?");
            params.push(TaskQueryParam::String(uri.clone()));
        }

        if let Some(fragment) = &filter.name_contains {
            query.push_str(" AND name LIKE ?");
            params.push(TaskQueryParam::String(format!("%{fragment}%")));
        }

        params
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskQueryParam {
    String(String),
    Int64(i64),
}

impl TaskQueryParam {
    pub fn type_name(&self) -> &'static str {
        match self {
            TaskQueryParam::String(_) => "TEXT",
            TaskQueryParam::Int64(_) => "INTEGER",
        }
    }
}
