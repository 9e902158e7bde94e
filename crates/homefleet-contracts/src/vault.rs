// Vault secret DTO - metadata only, never content

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Named encrypted secret. The API never returns plaintext or ciphertext;
/// decryption happens in memory at execution dispatch.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct VaultSecret {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
