// Workflow template and instance HTTP routes

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use homefleet_contracts::{
    Job, ListResponse, WorkflowInstance, WorkflowStep, WorkflowTemplate,
};
use homefleet_engine::engine::StartWorkflow;
use homefleet_engine::{plan, WorkflowEngine};
use homefleet_storage::{
    AuditEntry, CreateWorkflowTemplate, Database, UpdateWorkflowTemplate, WorkflowTemplateRow,
};
use serde::Deserialize;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::error::ApiError;

/// App state for workflow routes
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub engine: Arc<WorkflowEngine>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateWorkflowTemplateRequest {
    pub name: String,
    pub description: Option<String>,
    pub steps: Vec<WorkflowStep>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateWorkflowTemplateRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub steps: Option<Vec<WorkflowStep>>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RunWorkflowRequest {
    pub device_ids: Vec<i64>,
    #[serde(default)]
    pub rollback_on_failure: bool,
    pub extra_vars: Option<serde_json::Value>,
    pub vault_secret_id: Option<i64>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ListInstancesParams {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_per_page")]
    pub per_page: i64,
}

fn default_page() -> i64 {
    1
}

fn default_per_page() -> i64 {
    50
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/workflows", get(list_templates).post(create_template))
        .route(
            "/v1/workflows/:template_id",
            get(get_template).put(update_template).delete(delete_template),
        )
        .route("/v1/workflows/:template_id/run", post(run_workflow))
        .route("/v1/workflow-instances", get(list_instances))
        .route(
            "/v1/workflow-instances/:instance_id",
            get(get_instance).delete(delete_instance),
        )
        .route("/v1/workflow-instances/:instance_id/jobs", get(instance_jobs))
        .route(
            "/v1/workflow-instances/:instance_id/cancel",
            post(cancel_instance),
        )
        .with_state(state)
}

fn template_to_dto(row: WorkflowTemplateRow) -> Result<WorkflowTemplate, ApiError> {
    let steps: Vec<WorkflowStep> = serde_json::from_value(row.steps)
        .map_err(|e| ApiError::internal(format!("Corrupt template steps: {e}")))?;
    Ok(WorkflowTemplate {
        id: row.id,
        name: row.name,
        description: row.description,
        steps,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

/// POST /v1/workflows - Create a workflow template
#[utoipa::path(
    post,
    path = "/v1/workflows",
    request_body = CreateWorkflowTemplateRequest,
    responses(
        (status = 201, description = "Template created", body = WorkflowTemplate),
        (status = 400, description = "Invalid steps"),
        (status = 409, description = "Name already in use")
    ),
    tag = "workflows"
)]
pub async fn create_template(
    State(state): State<AppState>,
    Json(req): Json<CreateWorkflowTemplateRequest>,
) -> Result<(StatusCode, Json<WorkflowTemplate>), ApiError> {
    plan::validate_steps(&req.steps).map_err(ApiError::validation)?;

    if state
        .db
        .get_workflow_template_by_name(&req.name)
        .await?
        .is_some()
    {
        return Err(ApiError::conflict(format!(
            "Workflow template '{}' already exists",
            req.name
        )));
    }

    let row = state
        .db
        .create_workflow_template(CreateWorkflowTemplate {
            name: req.name,
            description: req.description,
            steps: serde_json::to_value(&req.steps)
                .map_err(|e| ApiError::internal(e.to_string()))?,
        })
        .await?;

    state
        .db
        .audit(AuditEntry::success("template_created", "workflow_template", row.id))
        .await;

    Ok((StatusCode::CREATED, Json(template_to_dto(row)?)))
}

/// GET /v1/workflows
#[utoipa::path(
    get,
    path = "/v1/workflows",
    responses(
        (status = 200, description = "Templates", body = ListResponse<WorkflowTemplate>)
    ),
    tag = "workflows"
)]
pub async fn list_templates(
    State(state): State<AppState>,
) -> Result<Json<ListResponse<WorkflowTemplate>>, ApiError> {
    let rows = state.db.list_workflow_templates().await?;
    let templates = rows
        .into_iter()
        .map(template_to_dto)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(ListResponse::new(templates)))
}

/// GET /v1/workflows/{template_id}
#[utoipa::path(
    get,
    path = "/v1/workflows/{template_id}",
    params(("template_id" = i64, Path, description = "Template ID")),
    responses(
        (status = 200, description = "Template", body = WorkflowTemplate),
        (status = 404, description = "Template not found")
    ),
    tag = "workflows"
)]
pub async fn get_template(
    State(state): State<AppState>,
    Path(template_id): Path<i64>,
) -> Result<Json<WorkflowTemplate>, ApiError> {
    let row = state
        .db
        .get_workflow_template(template_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Workflow template {template_id} not found")))?;
    Ok(Json(template_to_dto(row)?))
}

/// PUT /v1/workflows/{template_id}
#[utoipa::path(
    put,
    path = "/v1/workflows/{template_id}",
    request_body = UpdateWorkflowTemplateRequest,
    params(("template_id" = i64, Path, description = "Template ID")),
    responses(
        (status = 200, description = "Template updated", body = WorkflowTemplate),
        (status = 400, description = "Invalid steps"),
        (status = 404, description = "Template not found")
    ),
    tag = "workflows"
)]
pub async fn update_template(
    State(state): State<AppState>,
    Path(template_id): Path<i64>,
    Json(req): Json<UpdateWorkflowTemplateRequest>,
) -> Result<Json<WorkflowTemplate>, ApiError> {
    let steps_json = match &req.steps {
        Some(steps) => {
            plan::validate_steps(steps).map_err(ApiError::validation)?;
            Some(serde_json::to_value(steps).map_err(|e| ApiError::internal(e.to_string()))?)
        }
        None => None,
    };

    let row = state
        .db
        .update_workflow_template(
            template_id,
            UpdateWorkflowTemplate {
                name: req.name,
                description: req.description,
                steps: steps_json,
            },
        )
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Workflow template {template_id} not found")))?;

    state
        .db
        .audit(AuditEntry::success("template_updated", "workflow_template", row.id))
        .await;

    Ok(Json(template_to_dto(row)?))
}

/// DELETE /v1/workflows/{template_id} - Past runs keep their snapshots
#[utoipa::path(
    delete,
    path = "/v1/workflows/{template_id}",
    params(("template_id" = i64, Path, description = "Template ID")),
    responses(
        (status = 204, description = "Template deleted"),
        (status = 404, description = "Template not found")
    ),
    tag = "workflows"
)]
pub async fn delete_template(
    State(state): State<AppState>,
    Path(template_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let deleted = state.db.delete_workflow_template(template_id).await?;
    if !deleted {
        return Err(ApiError::not_found(format!(
            "Workflow template {template_id} not found"
        )));
    }
    state
        .db
        .audit(AuditEntry::success("template_deleted", "workflow_template", template_id))
        .await;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/workflows/{template_id}/run - Start a workflow instance
#[utoipa::path(
    post,
    path = "/v1/workflows/{template_id}/run",
    request_body = RunWorkflowRequest,
    params(("template_id" = i64, Path, description = "Template ID")),
    responses(
        (status = 201, description = "Instance started", body = WorkflowInstance),
        (status = 400, description = "Validation failure"),
        (status = 404, description = "Template not found")
    ),
    tag = "workflows"
)]
pub async fn run_workflow(
    State(state): State<AppState>,
    Path(template_id): Path<i64>,
    Json(req): Json<RunWorkflowRequest>,
) -> Result<(StatusCode, Json<WorkflowInstance>), ApiError> {
    if req.device_ids.is_empty() {
        return Err(ApiError::validation("device_ids must not be empty"));
    }

    let instance = state
        .engine
        .start_workflow(StartWorkflow {
            template_id,
            device_ids: req.device_ids,
            rollback_on_failure: req.rollback_on_failure,
            extra_vars: req.extra_vars,
            vault_secret_id: req.vault_secret_id,
        })
        .await?;

    tracing::info!(instance_id = instance.id, template_id, "Workflow started");
    Ok((StatusCode::CREATED, Json(WorkflowInstance::from(instance))))
}

/// GET /v1/workflow-instances
#[utoipa::path(
    get,
    path = "/v1/workflow-instances",
    params(
        ("page" = Option<i64>, Query, description = "Page number (default 1)"),
        ("per_page" = Option<i64>, Query, description = "Page size (max 100)")
    ),
    responses(
        (status = 200, description = "Instances", body = ListResponse<WorkflowInstance>)
    ),
    tag = "workflows"
)]
pub async fn list_instances(
    State(state): State<AppState>,
    Query(params): Query<ListInstancesParams>,
) -> Result<Json<ListResponse<WorkflowInstance>>, ApiError> {
    let rows = state
        .db
        .list_workflow_instances(params.page, params.per_page)
        .await?;
    Ok(Json(ListResponse::new(
        rows.into_iter().map(WorkflowInstance::from).collect(),
    )))
}

/// GET /v1/workflow-instances/{instance_id}
#[utoipa::path(
    get,
    path = "/v1/workflow-instances/{instance_id}",
    params(("instance_id" = i64, Path, description = "Instance ID")),
    responses(
        (status = 200, description = "Instance", body = WorkflowInstance),
        (status = 404, description = "Instance not found")
    ),
    tag = "workflows"
)]
pub async fn get_instance(
    State(state): State<AppState>,
    Path(instance_id): Path<i64>,
) -> Result<Json<WorkflowInstance>, ApiError> {
    let row = state
        .db
        .get_workflow_instance(instance_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Workflow instance {instance_id} not found")))?;
    Ok(Json(WorkflowInstance::from(row)))
}

/// GET /v1/workflow-instances/{instance_id}/jobs - Jobs in step order
#[utoipa::path(
    get,
    path = "/v1/workflow-instances/{instance_id}/jobs",
    params(("instance_id" = i64, Path, description = "Instance ID")),
    responses(
        (status = 200, description = "Jobs of the instance", body = ListResponse<Job>),
        (status = 404, description = "Instance not found")
    ),
    tag = "workflows"
)]
pub async fn instance_jobs(
    State(state): State<AppState>,
    Path(instance_id): Path<i64>,
) -> Result<Json<ListResponse<Job>>, ApiError> {
    let _instance = state
        .db
        .get_workflow_instance(instance_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Workflow instance {instance_id} not found")))?;

    let rows = state.db.list_jobs_for_instance(instance_id).await?;
    Ok(Json(ListResponse::new(
        rows.into_iter().map(Job::from).collect(),
    )))
}

/// POST /v1/workflow-instances/{instance_id}/cancel
#[utoipa::path(
    post,
    path = "/v1/workflow-instances/{instance_id}/cancel",
    params(("instance_id" = i64, Path, description = "Instance ID")),
    responses(
        (status = 200, description = "Instance cancelled", body = WorkflowInstance),
        (status = 404, description = "Instance not found"),
        (status = 409, description = "Instance not cancellable")
    ),
    tag = "workflows"
)]
pub async fn cancel_instance(
    State(state): State<AppState>,
    Path(instance_id): Path<i64>,
) -> Result<Json<WorkflowInstance>, ApiError> {
    let instance = state.engine.cancel_workflow(instance_id).await?;
    Ok(Json(WorkflowInstance::from(instance)))
}

/// DELETE /v1/workflow-instances/{instance_id} - Cascades to its jobs
#[utoipa::path(
    delete,
    path = "/v1/workflow-instances/{instance_id}",
    params(("instance_id" = i64, Path, description = "Instance ID")),
    responses(
        (status = 204, description = "Instance deleted"),
        (status = 404, description = "Instance not found")
    ),
    tag = "workflows"
)]
pub async fn delete_instance(
    State(state): State<AppState>,
    Path(instance_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let deleted = state.db.delete_workflow_instance(instance_id).await?;
    if !deleted {
        return Err(ApiError::not_found(format!(
            "Workflow instance {instance_id} not found"
        )));
    }
    state
        .db
        .audit(AuditEntry::success("instance_deleted", "workflow_instance", instance_id))
        .await;
    Ok(StatusCode::NO_CONTENT)
}
