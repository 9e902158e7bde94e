// Executor catalog DTOs

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// An executor backend registered with the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ExecutorInfo {
    #[serde(rename = "type")]
    pub executor_type: String,
    pub display_name: String,
    pub description: String,
}

/// A named unit of configuration work an executor can run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct ActionInfo {
    pub name: String,
    pub display_name: String,
    pub description: String,
    /// JSON-Schema-shaped description of accepted extra_vars, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_schema: Option<serde_json::Value>,
}
