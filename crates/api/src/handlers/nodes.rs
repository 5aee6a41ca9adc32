use axum::extract::{Query, State};
use serde::Deserialize;
use taskmanager_domain::{GetOptions, NodeFilter, OperationResult};

use crate::{
    error::ApiResult,
    response::{success, ListResponse},
    routes::AppState,
};

#[derive(Debug, Default, Deserialize)]
pub struct NodeQueryParams {
    pub node_identifier: Option<String>,
    #[serde(default)]
    pub no_fetch: bool,
}

/// 集群节点列表，默认合并各节点的实时状态
pub async fn list_nodes(
    State(state): State<AppState>,
    Query(params): Query<NodeQueryParams>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let filter = match params.node_identifier {
        Some(identifier) => NodeFilter::with_identifier(identifier),
        None => NodeFilter::all(),
    };
    let options = GetOptions {
        no_fetch: params.no_fetch,
        retrieve_next_run_start_time: false,
    };
    let mut result = OperationResult::new("listNodes");
    let nodes = state
        .task_manager
        .search_nodes(&filter, options, &mut result)
        .await?;
    let total = nodes.len();
    Ok(success(ListResponse::new(nodes, total)))
}
