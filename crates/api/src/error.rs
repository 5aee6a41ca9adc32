use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use taskmanager_errors::TaskManagerError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("任务管理器错误: {0}")]
    TaskManager(#[from] TaskManagerError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("内部服务器错误: {0}")]
    Internal(String),
}

impl ApiError {
    fn status_and_type(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::TaskManager(err) => match err {
                TaskManagerError::ObjectNotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                TaskManagerError::ObjectAlreadyExists(_) => (StatusCode::CONFLICT, "CONFLICT"),
                TaskManagerError::InvalidCron { .. } => {
                    (StatusCode::BAD_REQUEST, "INVALID_CRON_EXPRESSION")
                }
                TaskManagerError::Schema(_) | TaskManagerError::IllegalArgument(_) => {
                    (StatusCode::BAD_REQUEST, "BAD_REQUEST")
                }
                TaskManagerError::IllegalState(_) => (StatusCode::CONFLICT, "ILLEGAL_STATE"),
                TaskManagerError::NodeInErrorState(_) => {
                    (StatusCode::SERVICE_UNAVAILABLE, "NODE_IN_ERROR_STATE")
                }
                TaskManagerError::Communication { .. } => {
                    (StatusCode::BAD_GATEWAY, "COMMUNICATION_ERROR")
                }
                TaskManagerError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            },
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status_and_type();
        if status.is_server_error() {
            tracing::error!("请求处理失败: {}", self);
        }

        // 与成功响应同一信封，远程节点客户端据 success 判断
        let body = Json(json!({
            "success": false,
            "data": null,
            "message": self.to_string(),
            "error": {
                "type": error_type,
                "code": status.as_u16(),
            },
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_maps_to_404() {
        let error: ApiError = TaskManagerError::task_not_found("t-1").into();
        assert_eq!(error.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_invalid_cron_maps_to_400() {
        let error: ApiError = TaskManagerError::InvalidCron {
            expr: "bad".to_string(),
            message: "parse".to_string(),
        }
        .into();
        assert_eq!(error.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_illegal_state_maps_to_conflict() {
        let error: ApiError = TaskManagerError::illegal_state("wrong state").into();
        assert_eq!(error.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_internal_error_maps_to_500() {
        let error = ApiError::Internal("boom".to_string());
        assert_eq!(
            error.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
