// Homefleet API server

mod error;
mod executors;
mod jobs;
mod vault_secrets;
mod workflows;

use anyhow::{Context, Result};
use axum::{routing::get, Json, Router};
use homefleet_contracts::*;
use homefleet_core::{AppConfig, Vault};
use homefleet_engine::WorkflowEngine;
use homefleet_executors::ExecutorRegistry;
use homefleet_storage::Database;
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        jobs::create_job,
        jobs::list_jobs,
        jobs::get_job,
        jobs::get_job_logs,
        jobs::stream_job_logs,
        jobs::cancel_job,
        jobs::rerun_job,
        jobs::delete_job,
        executors::list_executors,
        executors::list_actions,
        executors::action_schema,
        workflows::create_template,
        workflows::list_templates,
        workflows::get_template,
        workflows::update_template,
        workflows::delete_template,
        workflows::run_workflow,
        workflows::list_instances,
        workflows::get_instance,
        workflows::instance_jobs,
        workflows::cancel_instance,
        workflows::delete_instance,
        vault_secrets::create_secret,
        vault_secrets::list_secrets,
        vault_secrets::get_secret,
        vault_secrets::update_secret,
        vault_secrets::delete_secret,
    ),
    components(
        schemas(
            Job, JobStatus, ErrorCategory,
            WorkflowTemplate, WorkflowStep, WorkflowInstance, WorkflowStatus,
            VaultSecret,
            ExecutorInfo, ActionInfo,
            JobStreamEvent, StatusPayload,
            jobs::CreateJobRequest,
            jobs::JobLogsResponse,
            workflows::CreateWorkflowTemplateRequest,
            workflows::UpdateWorkflowTemplateRequest,
            workflows::RunWorkflowRequest,
            vault_secrets::CreateVaultSecretRequest,
            vault_secrets::UpdateVaultSecretRequest,
        )
    ),
    tags(
        (name = "jobs", description = "Automation job execution endpoints"),
        (name = "executors", description = "Executor catalog endpoints"),
        (name = "workflows", description = "Workflow template and instance endpoints"),
        (name = "vault", description = "Vault secret management endpoints")
    ),
    info(
        title = "Homefleet API",
        version = "0.3.0",
        description = "API for automating configuration management across a homelab fleet",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "homefleet_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("homefleet-api starting...");

    let config = AppConfig::from_env().context("Failed to load configuration")?;

    let db = Database::from_url(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await.context("Failed to run migrations")?;
    tracing::info!("Connected to database");

    let registry = ExecutorRegistry::with_builtins(db.clone(), &config.playbook_dir);
    let vault = Vault::new(&config.vault.encryption_key);
    let engine = Arc::new(WorkflowEngine::new(
        db.clone(),
        registry.clone(),
        vault.clone(),
    ));
    let db = Arc::new(db);

    let jobs_state = jobs::AppState {
        db: db.clone(),
        registry: registry.clone(),
        vault: vault.clone(),
        engine: engine.clone(),
    };
    let executors_state = executors::AppState {
        registry: registry.clone(),
    };
    let workflows_state = workflows::AppState {
        db: db.clone(),
        engine: engine.clone(),
    };
    let vault_state = vault_secrets::AppState {
        db: db.clone(),
        vault,
    };

    let app = Router::new()
        .route("/health", get(health))
        .merge(jobs::routes(jobs_state))
        .merge(executors::routes(executors_state))
        .merge(workflows::routes(workflows_state))
        .merge(vault_secrets::routes(vault_state))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;
    tracing::info!("Listening on {}", config.bind_addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
