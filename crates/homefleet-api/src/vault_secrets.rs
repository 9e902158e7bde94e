// Vault secret CRUD HTTP routes
//
// Values are write-only: requests carry plaintext in, responses never carry
// plaintext or ciphertext out.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use homefleet_contracts::{ListResponse, VaultSecret};
use homefleet_core::validate::is_valid_secret_name;
use homefleet_core::Vault;
use homefleet_storage::{AuditEntry, CreateVaultSecret, Database, UpdateVaultSecret, VaultSecretRow};
use serde::Deserialize;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::error::ApiError;

/// App state for vault routes
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub vault: Vault,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateVaultSecretRequest {
    pub name: String,
    pub description: Option<String>,
    /// Plaintext to encrypt; never stored or echoed back.
    pub content: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateVaultSecretRequest {
    pub description: Option<String>,
    pub content: Option<String>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/vault/secrets", get(list_secrets).post(create_secret))
        .route(
            "/v1/vault/secrets/:secret_id",
            get(get_secret).put(update_secret).delete(delete_secret),
        )
        .with_state(state)
}

fn to_dto(row: VaultSecretRow) -> VaultSecret {
    VaultSecret {
        id: row.id,
        name: row.name,
        description: row.description,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}

/// POST /v1/vault/secrets - Create an encrypted secret
#[utoipa::path(
    post,
    path = "/v1/vault/secrets",
    request_body = CreateVaultSecretRequest,
    responses(
        (status = 201, description = "Secret created", body = VaultSecret),
        (status = 400, description = "Invalid secret name"),
        (status = 409, description = "Name already in use")
    ),
    tag = "vault"
)]
pub async fn create_secret(
    State(state): State<AppState>,
    Json(req): Json<CreateVaultSecretRequest>,
) -> Result<(StatusCode, Json<VaultSecret>), ApiError> {
    if !is_valid_secret_name(&req.name) {
        return Err(ApiError::validation(format!(
            "Invalid secret name '{}'",
            req.name
        )));
    }
    if state.db.get_vault_secret_by_name(&req.name).await?.is_some() {
        return Err(ApiError::conflict(format!(
            "Secret '{}' already exists",
            req.name
        )));
    }

    let encrypted_content = state
        .vault
        .encrypt(&req.content)
        .map_err(|e| ApiError::vault_invalid(e.to_string()))?;

    let row = state
        .db
        .create_vault_secret(CreateVaultSecret {
            name: req.name,
            description: req.description,
            encrypted_content,
        })
        .await?;

    state
        .db
        .audit(AuditEntry::success("secret_created", "vault_secret", row.id))
        .await;

    Ok((StatusCode::CREATED, Json(to_dto(row))))
}

/// GET /v1/vault/secrets - List secret metadata
#[utoipa::path(
    get,
    path = "/v1/vault/secrets",
    responses(
        (status = 200, description = "Secrets (metadata only)", body = ListResponse<VaultSecret>)
    ),
    tag = "vault"
)]
pub async fn list_secrets(
    State(state): State<AppState>,
) -> Result<Json<ListResponse<VaultSecret>>, ApiError> {
    let rows = state.db.list_vault_secrets().await?;
    Ok(Json(ListResponse::new(
        rows.into_iter().map(to_dto).collect(),
    )))
}

/// GET /v1/vault/secrets/{secret_id}
#[utoipa::path(
    get,
    path = "/v1/vault/secrets/{secret_id}",
    params(("secret_id" = i64, Path, description = "Secret ID")),
    responses(
        (status = 200, description = "Secret metadata", body = VaultSecret),
        (status = 404, description = "Secret not found")
    ),
    tag = "vault"
)]
pub async fn get_secret(
    State(state): State<AppState>,
    Path(secret_id): Path<i64>,
) -> Result<Json<VaultSecret>, ApiError> {
    let row = state
        .db
        .get_vault_secret(secret_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Secret {secret_id} not found")))?;
    Ok(Json(to_dto(row)))
}

/// PUT /v1/vault/secrets/{secret_id} - Update description and/or rotate content
#[utoipa::path(
    put,
    path = "/v1/vault/secrets/{secret_id}",
    request_body = UpdateVaultSecretRequest,
    params(("secret_id" = i64, Path, description = "Secret ID")),
    responses(
        (status = 200, description = "Secret updated", body = VaultSecret),
        (status = 404, description = "Secret not found")
    ),
    tag = "vault"
)]
pub async fn update_secret(
    State(state): State<AppState>,
    Path(secret_id): Path<i64>,
    Json(req): Json<UpdateVaultSecretRequest>,
) -> Result<Json<VaultSecret>, ApiError> {
    let encrypted_content = match &req.content {
        Some(content) => Some(
            state
                .vault
                .encrypt(content)
                .map_err(|e| ApiError::vault_invalid(e.to_string()))?,
        ),
        None => None,
    };

    let row = state
        .db
        .update_vault_secret(
            secret_id,
            UpdateVaultSecret {
                description: req.description,
                encrypted_content,
            },
        )
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Secret {secret_id} not found")))?;

    state
        .db
        .audit(AuditEntry::success("secret_updated", "vault_secret", row.id))
        .await;

    Ok(Json(to_dto(row)))
}

/// DELETE /v1/vault/secrets/{secret_id}
#[utoipa::path(
    delete,
    path = "/v1/vault/secrets/{secret_id}",
    params(("secret_id" = i64, Path, description = "Secret ID")),
    responses(
        (status = 204, description = "Secret deleted"),
        (status = 404, description = "Secret not found")
    ),
    tag = "vault"
)]
pub async fn delete_secret(
    State(state): State<AppState>,
    Path(secret_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let deleted = state.db.delete_vault_secret(secret_id).await?;
    if !deleted {
        return Err(ApiError::not_found(format!("Secret {secret_id} not found")));
    }
    state
        .db
        .audit(AuditEntry::success("secret_deleted", "vault_secret", secret_id))
        .await;
    Ok(StatusCode::NO_CONTENT)
}
