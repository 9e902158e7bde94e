// Workflow DTOs - reusable step templates and their execution instances

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Workflow instance status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    RollingBack,
    RolledBack,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed
                | WorkflowStatus::Failed
                | WorkflowStatus::Cancelled
                | WorkflowStatus::RolledBack
        )
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::Running => "running",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Cancelled => "cancelled",
            WorkflowStatus::RollingBack => "rolling_back",
            WorkflowStatus::RolledBack => "rolled_back",
        };
        write!(f, "{}", s)
    }
}

impl From<&str> for WorkflowStatus {
    fn from(s: &str) -> Self {
        match s {
            "running" => WorkflowStatus::Running,
            "completed" => WorkflowStatus::Completed,
            "failed" => WorkflowStatus::Failed,
            "cancelled" => WorkflowStatus::Cancelled,
            "rolling_back" => WorkflowStatus::RollingBack,
            "rolled_back" => WorkflowStatus::RolledBack,
            _ => WorkflowStatus::Pending,
        }
    }
}

/// One step of a workflow template.
///
/// `depends_on` lists the `order` values of steps that must complete first;
/// each must be strictly lower than this step's `order`, so templates are
/// DAGs by construction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct WorkflowStep {
    pub order: i32,
    pub action_name: String,
    #[serde(default = "default_executor_type")]
    pub executor_type: String,
    #[serde(default)]
    pub depends_on: Vec<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_vars: Option<serde_json::Value>,
}

fn default_executor_type() -> String {
    "ansible".to_string()
}

/// Workflow template - a reusable step DAG
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WorkflowTemplate {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub steps: Vec<WorkflowStep>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Workflow instance - a live execution of a template with a frozen snapshot
/// of its steps
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WorkflowInstance {
    pub id: i64,
    /// Null when the originating template has been deleted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_id: Option<i64>,
    pub template_snapshot: serde_json::Value,
    pub status: WorkflowStatus,
    pub device_ids: Vec<i64>,
    pub rollback_on_failure: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_vars: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vault_secret_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}
