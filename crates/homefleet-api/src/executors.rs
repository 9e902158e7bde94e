// Executor catalog HTTP routes

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use homefleet_contracts::{ActionInfo, ExecutorInfo, ListResponse};
use homefleet_executors::ExecutorRegistry;

use crate::error::ApiError;

/// App state for executor routes
#[derive(Clone)]
pub struct AppState {
    pub registry: ExecutorRegistry,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/executors", get(list_executors))
        .route("/v1/executors/:executor_type/actions", get(list_actions))
        .route(
            "/v1/executors/:executor_type/actions/:action_name/schema",
            get(action_schema),
        )
        .with_state(state)
}

/// GET /v1/executors - List registered executor backends
#[utoipa::path(
    get,
    path = "/v1/executors",
    responses(
        (status = 200, description = "Registered executors", body = ListResponse<ExecutorInfo>)
    ),
    tag = "executors"
)]
pub async fn list_executors(State(state): State<AppState>) -> Json<ListResponse<ExecutorInfo>> {
    Json(ListResponse::new(state.registry.list()))
}

/// GET /v1/executors/{executor_type}/actions - Action catalog for an executor
#[utoipa::path(
    get,
    path = "/v1/executors/{executor_type}/actions",
    params(
        ("executor_type" = String, Path, description = "Executor type identifier")
    ),
    responses(
        (status = 200, description = "Available actions", body = ListResponse<ActionInfo>),
        (status = 404, description = "Unknown executor type")
    ),
    tag = "executors"
)]
pub async fn list_actions(
    State(state): State<AppState>,
    Path(executor_type): Path<String>,
) -> Result<Json<ListResponse<ActionInfo>>, ApiError> {
    let executor = state
        .registry
        .get(&executor_type)
        .ok_or_else(|| ApiError::not_found(format!("Unknown executor type '{executor_type}'")))?;

    let actions = executor.list_actions().await?;
    Ok(Json(ListResponse::new(actions)))
}

/// GET /v1/executors/{executor_type}/actions/{action_name}/schema
#[utoipa::path(
    get,
    path = "/v1/executors/{executor_type}/actions/{action_name}/schema",
    params(
        ("executor_type" = String, Path, description = "Executor type identifier"),
        ("action_name" = String, Path, description = "Action name")
    ),
    responses(
        (status = 200, description = "JSON schema for the action's extra_vars"),
        (status = 404, description = "Unknown executor, action, or no schema")
    ),
    tag = "executors"
)]
pub async fn action_schema(
    State(state): State<AppState>,
    Path((executor_type, action_name)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let executor = state
        .registry
        .get(&executor_type)
        .ok_or_else(|| ApiError::not_found(format!("Unknown executor type '{executor_type}'")))?;

    let schema = executor
        .action_schema(&action_name)
        .await
        .ok_or_else(|| ApiError::not_found(format!("No schema for action '{action_name}'")))?;
    Ok(Json(schema))
}
