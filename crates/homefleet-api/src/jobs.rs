// Job HTTP routes
//
// Creation validates everything up front (safe name, known executor, real
// action, existing devices and secret) so a persisted job is always
// dispatchable. The only execution path is the task queue; no handler
// spawns a subprocess.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use futures::stream::{self, Stream, StreamExt};
use homefleet_contracts::{
    ErrorCategory, Job, JobStatus, JobStreamEvent, ListResponse,
};
use homefleet_core::validate::is_safe_action_name;
use homefleet_core::Vault;
use homefleet_engine::WorkflowEngine;
use homefleet_executors::{ExecuteRequest, ExecutorRegistry, TargetDevice};
use homefleet_storage::{
    AuditEntry, CreateJob, Database, DeviceRow, JobFilter, JobMutation, JobRow,
};
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, sync::Arc, time::Duration};
use utoipa::ToSchema;

use crate::error::ApiError;

/// App state for job routes
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub registry: ExecutorRegistry,
    pub vault: Vault,
    pub engine: Arc<WorkflowEngine>,
}

/// Request to create a job
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateJobRequest {
    pub device_id: i64,
    /// Additional targets for multi-device jobs (must include reachable IPs).
    pub device_ids: Option<Vec<i64>>,
    #[serde(default = "default_executor_type")]
    pub executor_type: String,
    pub action_name: String,
    pub action_config: Option<serde_json::Value>,
    pub extra_vars: Option<serde_json::Value>,
    pub vault_secret_id: Option<i64>,
}

fn default_executor_type() -> String {
    "ansible".to_string()
}

/// Query parameters for listing jobs
#[derive(Debug, Deserialize, ToSchema)]
pub struct ListJobsParams {
    pub device_id: Option<i64>,
    pub executor_type: Option<String>,
    pub workflow_instance_id: Option<i64>,
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

/// Query parameters for the log stream
#[derive(Debug, Deserialize, ToSchema)]
pub struct StreamParams {
    /// Replay persisted events from the start of the stream (default true);
    /// false attaches live at the current position.
    #[serde(default = "default_replay")]
    pub replay: bool,
}

fn default_replay() -> bool {
    true
}

/// Log snapshot response
#[derive(Debug, Serialize, ToSchema)]
pub struct JobLogsResponse {
    pub job_id: i64,
    pub status: JobStatus,
    pub progress: i32,
    pub log_output: Option<String>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/jobs", get(list_jobs).post(create_job))
        .route("/v1/jobs/:job_id", get(get_job).delete(delete_job))
        .route("/v1/jobs/:job_id/logs", get(get_job_logs))
        .route("/v1/jobs/:job_id/logs/stream", get(stream_job_logs))
        .route("/v1/jobs/:job_id/cancel", post(cancel_job))
        .route("/v1/jobs/:job_id/rerun", post(rerun_job))
        .with_state(state)
}

/// Validate the request against the registry and inventory, returning the
/// devices so dispatch can reuse them.
async fn validate_job_spec(
    state: &AppState,
    executor_type: &str,
    action_name: &str,
    action_config: Option<&serde_json::Value>,
    device_id: i64,
    device_ids: Option<&Vec<i64>>,
    vault_secret_id: Option<i64>,
) -> Result<Vec<DeviceRow>, ApiError> {
    if !is_safe_action_name(action_name) {
        return Err(ApiError::validation(format!(
            "Invalid action name '{action_name}'"
        )));
    }

    let Some(executor) = state.registry.get(executor_type) else {
        return Err(ApiError::validation(format!(
            "Unknown executor type '{executor_type}'"
        )));
    };
    if !executor.validate(action_name, action_config).await {
        return Err(ApiError::validation(format!(
            "Unknown or invalid action '{action_name}'"
        )));
    }

    let mut all_ids = vec![device_id];
    if let Some(extra) = device_ids {
        for id in extra {
            if !all_ids.contains(id) {
                all_ids.push(*id);
            }
        }
    }
    let devices = state.db.get_devices_by_ids(&all_ids).await?;
    if devices.len() != all_ids.len() {
        return Err(ApiError::validation("One or more devices not found"));
    }
    for device in &devices {
        if device.ip_address.as_deref().unwrap_or("").is_empty() {
            return Err(ApiError::validation(format!(
                "Device '{}' (ID: {}) has no IP address",
                device.name, device.id
            )));
        }
    }

    if let Some(secret_id) = vault_secret_id {
        if state.db.get_vault_secret(secret_id).await?.is_none() {
            return Err(ApiError::validation(format!(
                "Vault secret {secret_id} not found"
            )));
        }
    }

    Ok(devices)
}

/// Enqueue a created job. On queue failure the job is failed terminally and
/// the caller sees 503.
async fn dispatch_job(
    state: &AppState,
    job: &JobRow,
    devices: &[DeviceRow],
) -> Result<JobRow, ApiError> {
    let executor = state
        .registry
        .get(&job.executor_type)
        .ok_or_else(|| ApiError::validation(format!("Unknown executor type '{}'", job.executor_type)))?;

    // Decrypt in memory for this dispatch only.
    let vault_password = match job.vault_secret_id {
        Some(secret_id) => {
            let secret = state
                .db
                .get_vault_secret(secret_id)
                .await?
                .ok_or_else(|| ApiError::validation(format!("Vault secret {secret_id} not found")))?;
            Some(
                state
                    .vault
                    .decrypt(&secret.encrypted_content)
                    .map_err(|e| ApiError::vault_invalid(e.to_string()))?,
            )
        }
        None => None,
    };

    let primary = &devices[0];
    let targets = if devices.len() > 1 {
        Some(
            devices
                .iter()
                .map(|d| TargetDevice {
                    ip: d.ip_address.clone().unwrap_or_default(),
                    name: d.name.clone(),
                })
                .collect(),
        )
    } else {
        None
    };

    let request = ExecuteRequest {
        job_id: job.id,
        primary_ip: primary.ip_address.clone().unwrap_or_default(),
        primary_name: primary.name.clone(),
        action_name: job.action_name.clone(),
        config: job.action_config.clone(),
        extra_vars: job.extra_vars.clone(),
        devices: targets,
        vault_password,
    };

    match executor.execute(request).await {
        Ok(task_id) => {
            let updated = state
                .db
                .transition_job(
                    job.id,
                    JobStatus::Pending,
                    JobStatus::Pending,
                    JobMutation {
                        worker_task_id: Some(task_id),
                        ..Default::default()
                    },
                )
                .await?;
            Ok(updated.unwrap_or_else(|| job.clone()))
        }
        Err(e) => {
            tracing::error!(job_id = job.id, "Failed to enqueue job: {:#}", e);
            state
                .db
                .transition_job(
                    job.id,
                    JobStatus::Pending,
                    JobStatus::Failed,
                    JobMutation {
                        error_category: Some(ErrorCategory::QueueUnavailable.to_string()),
                        completed_at: Some(Utc::now()),
                        ..Default::default()
                    },
                )
                .await?;
            Err(ApiError::queue_unavailable("Could not enqueue job"))
        }
    }
}

/// POST /v1/jobs - Create and dispatch a job
#[utoipa::path(
    post,
    path = "/v1/jobs",
    request_body = CreateJobRequest,
    responses(
        (status = 201, description = "Job created and enqueued", body = Job),
        (status = 400, description = "Validation failure"),
        (status = 503, description = "Task queue unavailable")
    ),
    tag = "jobs"
)]
pub async fn create_job(
    State(state): State<AppState>,
    Json(req): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<Job>), ApiError> {
    let devices = validate_job_spec(
        &state,
        &req.executor_type,
        &req.action_name,
        req.action_config.as_ref(),
        req.device_id,
        req.device_ids.as_ref(),
        req.vault_secret_id,
    )
    .await?;

    let multi = req
        .device_ids
        .as_ref()
        .map(|ids| !ids.is_empty())
        .unwrap_or(false);
    let row = state
        .db
        .create_job(CreateJob {
            device_id: req.device_id,
            device_ids: if multi {
                Some(devices.iter().map(|d| d.id).collect())
            } else {
                None
            },
            executor_type: req.executor_type,
            action_name: req.action_name,
            action_config: req.action_config,
            extra_vars: req.extra_vars,
            vault_secret_id: req.vault_secret_id,
            workflow_instance_id: None,
            step_order: None,
            depends_on_job_ids: None,
            is_rollback: false,
        })
        .await?;

    state
        .db
        .audit(AuditEntry::success("job_created", "automation_job", row.id))
        .await;

    let row = dispatch_job(&state, &row, &devices).await?;
    tracing::info!(job_id = row.id, "Job created and enqueued");

    Ok((StatusCode::CREATED, Json(Job::from(row))))
}

/// GET /v1/jobs - List jobs (newest first)
#[utoipa::path(
    get,
    path = "/v1/jobs",
    params(
        ("device_id" = Option<i64>, Query, description = "Filter by device"),
        ("executor_type" = Option<String>, Query, description = "Filter by executor type"),
        ("workflow_instance_id" = Option<i64>, Query, description = "Filter by workflow instance"),
        ("page" = Option<i64>, Query, description = "Page number (default 1)"),
        ("per_page" = Option<i64>, Query, description = "Page size (max 100)")
    ),
    responses(
        (status = 200, description = "Jobs", body = ListResponse<Job>)
    ),
    tag = "jobs"
)]
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<ListJobsParams>,
) -> Result<Json<ListResponse<Job>>, ApiError> {
    let rows = state
        .db
        .list_jobs(JobFilter {
            device_id: params.device_id,
            executor_type: params.executor_type,
            workflow_instance_id: params.workflow_instance_id,
            page: params.page,
            per_page: params.per_page,
        })
        .await?;

    Ok(Json(ListResponse::new(
        rows.into_iter().map(Job::from).collect(),
    )))
}

/// GET /v1/jobs/{job_id}
#[utoipa::path(
    get,
    path = "/v1/jobs/{job_id}",
    params(("job_id" = i64, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Job found", body = Job),
        (status = 404, description = "Job not found")
    ),
    tag = "jobs"
)]
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
) -> Result<Json<Job>, ApiError> {
    let row = state
        .db
        .get_job(job_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Job {job_id} not found")))?;
    Ok(Json(Job::from(row)))
}

/// GET /v1/jobs/{job_id}/logs - Snapshot of redacted, clipped output
#[utoipa::path(
    get,
    path = "/v1/jobs/{job_id}/logs",
    params(("job_id" = i64, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Log snapshot", body = JobLogsResponse),
        (status = 404, description = "Job not found")
    ),
    tag = "jobs"
)]
pub async fn get_job_logs(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
) -> Result<Json<JobLogsResponse>, ApiError> {
    let row = state
        .db
        .get_job(job_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Job {job_id} not found")))?;

    Ok(Json(JobLogsResponse {
        job_id: row.id,
        status: row.status(),
        progress: row.progress,
        log_output: row.log_output,
    }))
}

/// GET /v1/jobs/{job_id}/logs/stream - Server-Sent Events stream of the
/// job's log channel, ending after the `[[STREAM_COMPLETE]]` sentinel.
#[utoipa::path(
    get,
    path = "/v1/jobs/{job_id}/logs/stream",
    params(
        ("job_id" = i64, Path, description = "Job ID"),
        ("replay" = Option<bool>, Query, description = "Replay persisted events from the start (default true)")
    ),
    responses(
        (status = 200, description = "Event stream", content_type = "text/event-stream"),
        (status = 404, description = "Job not found")
    ),
    tag = "jobs"
)]
pub async fn stream_job_logs(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
    Query(params): Query<StreamParams>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let _job = state
        .db
        .get_job(job_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Job {job_id} not found")))?;

    // Live-only attachment starts past everything already published.
    let start_sequence = if params.replay {
        0
    } else {
        state
            .db
            .list_job_events(job_id, None)
            .await?
            .last()
            .map(|e| e.sequence)
            .unwrap_or(0)
    };

    tracing::info!(job_id, replay = params.replay, "Starting log stream");
    let db = state.db.clone();

    // Poll-and-replay loop in the shape of the events table: emit everything
    // past the cursor, stop once the complete event has been delivered.
    let stream = stream::unfold(
        (start_sequence, false),
        move |(last_sequence, done)| {
            let db = db.clone();
            async move {
                if done {
                    return None;
                }
                match db.list_job_events(job_id, Some(last_sequence)).await {
                    Ok(events) if !events.is_empty() => {
                        let new_sequence = events.last().unwrap().sequence;
                        let finished = events
                            .iter()
                            .any(|e| JobStreamEvent::from(e.event_type.as_str()) == JobStreamEvent::Complete);

                        let sse_events: Vec<Result<SseEvent, Infallible>> = events
                            .into_iter()
                            .map(|event| {
                                Ok(SseEvent::default()
                                    .event(&event.event_type)
                                    .data(event.payload)
                                    .id(event.sequence.to_string()))
                            })
                            .collect();

                        Some((stream::iter(sse_events), (new_sequence, finished)))
                    }
                    Ok(_) => {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Some((stream::iter(vec![]), (last_sequence, false)))
                    }
                    Err(e) => {
                        tracing::error!(job_id, "Failed to fetch log events: {}", e);
                        None
                    }
                }
            }
        },
    )
    .flatten();

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// POST /v1/jobs/{job_id}/cancel - Cooperative cancellation
#[utoipa::path(
    post,
    path = "/v1/jobs/{job_id}/cancel",
    params(("job_id" = i64, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Cancellation accepted", body = Job),
        (status = 404, description = "Job not found"),
        (status = 409, description = "Job already terminal")
    ),
    tag = "jobs"
)]
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
) -> Result<Json<Job>, ApiError> {
    let row = state
        .db
        .get_job(job_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Job {job_id} not found")))?;

    match row.status() {
        // Not yet picked up: cancel synchronously.
        JobStatus::Pending => {
            let now = Utc::now();
            let updated = state
                .db
                .transition_job(
                    job_id,
                    JobStatus::Pending,
                    JobStatus::Cancelled,
                    JobMutation {
                        log_output: Some("cancelled before execution".to_string()),
                        cancelled_at: Some(now),
                        completed_at: Some(now),
                        ..Default::default()
                    },
                )
                .await?;
            match updated {
                Some(row) => {
                    if let Err(e) = state.db.publish_stream_complete(job_id, "cancelled", 0).await {
                        tracing::warn!(job_id, "Failed to publish stream completion: {}", e);
                    }
                    state
                        .db
                        .audit(AuditEntry::success("job_cancelled", "automation_job", job_id))
                        .await;
                    if row.workflow_instance_id.is_some() {
                        if let Err(e) = state.engine.on_job_complete(job_id).await {
                            tracing::error!(job_id, "Workflow callback failed: {:#}", e);
                        }
                    }
                    Ok(Json(Job::from(row)))
                }
                // Lost the race with a worker claim; fall back to the flag.
                None => {
                    let row = state
                        .db
                        .request_job_cancel(job_id)
                        .await?
                        .ok_or_else(|| ApiError::conflict("Job is no longer cancellable"))?;
                    Ok(Json(Job::from(row)))
                }
            }
        }
        // Running: set the flag, the worker observes it within its poll
        // cadence and terminates the subprocess.
        JobStatus::Running => {
            let row = state
                .db
                .request_job_cancel(job_id)
                .await?
                .ok_or_else(|| ApiError::conflict("Job is no longer cancellable"))?;
            state
                .db
                .audit(AuditEntry::success("job_cancel_requested", "automation_job", job_id))
                .await;
            Ok(Json(Job::from(row)))
        }
        status => Err(ApiError::conflict(format!(
            "Cannot cancel job in {status} state"
        ))),
    }
}

/// POST /v1/jobs/{job_id}/rerun - Create a fresh job from a past one
#[utoipa::path(
    post,
    path = "/v1/jobs/{job_id}/rerun",
    params(("job_id" = i64, Path, description = "Job ID")),
    responses(
        (status = 201, description = "New job created and enqueued", body = Job),
        (status = 400, description = "Original spec no longer valid"),
        (status = 404, description = "Job not found")
    ),
    tag = "jobs"
)]
pub async fn rerun_job(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
) -> Result<(StatusCode, Json<Job>), ApiError> {
    let original = state
        .db
        .get_job(job_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Job {job_id} not found")))?;

    // Re-validate: playbooks, devices, and secrets may have changed since.
    let devices = validate_job_spec(
        &state,
        &original.executor_type,
        &original.action_name,
        original.action_config.as_ref(),
        original.device_id,
        original.device_ids.as_ref(),
        original.vault_secret_id,
    )
    .await?;

    // Reruns are standalone - the workflow relation is not copied.
    let row = state
        .db
        .create_job(CreateJob {
            device_id: original.device_id,
            device_ids: original.device_ids.clone(),
            executor_type: original.executor_type.clone(),
            action_name: original.action_name.clone(),
            action_config: original.action_config.clone(),
            extra_vars: original.extra_vars.clone(),
            vault_secret_id: original.vault_secret_id,
            workflow_instance_id: None,
            step_order: None,
            depends_on_job_ids: None,
            is_rollback: false,
        })
        .await?;

    state
        .db
        .audit(
            AuditEntry::success("job_rerun", "automation_job", row.id)
                .with_details(serde_json::json!({ "source_job_id": job_id })),
        )
        .await;

    let row = dispatch_job(&state, &row, &devices).await?;
    Ok((StatusCode::CREATED, Json(Job::from(row))))
}

/// DELETE /v1/jobs/{job_id}
#[utoipa::path(
    delete,
    path = "/v1/jobs/{job_id}",
    params(("job_id" = i64, Path, description = "Job ID")),
    responses(
        (status = 204, description = "Job deleted"),
        (status = 404, description = "Job not found")
    ),
    tag = "jobs"
)]
pub async fn delete_job(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let deleted = state.db.delete_job(job_id).await?;
    if !deleted {
        return Err(ApiError::not_found(format!("Job {job_id} not found")));
    }
    state
        .db
        .audit(AuditEntry::success("job_deleted", "automation_job", job_id))
        .await;
    Ok(StatusCode::NO_CONTENT)
}
