// Database models (internal, may differ from public DTOs)

use chrono::{DateTime, Utc};
use homefleet_contracts::{ErrorCategory, Job, JobStatus, WorkflowInstance, WorkflowStatus};
use sqlx::FromRow;
use uuid::Uuid;

// ============================================
// Device models (read-only inventory collaborator)
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct DeviceRow {
    pub id: i64,
    pub name: String,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ============================================
// Job models
// ============================================

/// Job row from database.
/// `device_ids` and `depends_on_job_ids` are stored as JSONB; the
/// `sqlx(json)` attribute handles the conversion.
#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub id: i64,
    pub device_id: i64,
    #[sqlx(json(nullable))]
    pub device_ids: Option<Vec<i64>>,
    pub executor_type: String,
    pub action_name: String,
    pub action_config: Option<serde_json::Value>,
    pub extra_vars: Option<serde_json::Value>,
    pub vault_secret_id: Option<i64>,
    pub status: String,
    pub progress: i32,
    pub task_count: i32,
    pub tasks_completed: i32,
    pub log_output: Option<String>,
    pub error_category: Option<String>,
    pub cancel_requested: bool,
    pub worker_task_id: Option<Uuid>,
    pub workflow_instance_id: Option<i64>,
    pub step_order: Option<i32>,
    #[sqlx(json(nullable))]
    pub depends_on_job_ids: Option<Vec<i64>>,
    pub is_rollback: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl JobRow {
    pub fn status(&self) -> JobStatus {
        JobStatus::from(self.status.as_str())
    }
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        let status = row.status();
        Job {
            id: row.id,
            device_id: row.device_id,
            device_ids: row.device_ids,
            executor_type: row.executor_type,
            action_name: row.action_name,
            action_config: row.action_config,
            extra_vars: row.extra_vars,
            vault_secret_id: row.vault_secret_id,
            status,
            progress: row.progress,
            task_count: row.task_count,
            tasks_completed: row.tasks_completed,
            error_category: row.error_category.as_deref().map(ErrorCategory::from),
            cancel_requested: row.cancel_requested,
            worker_task_id: row.worker_task_id,
            workflow_instance_id: row.workflow_instance_id,
            step_order: row.step_order,
            depends_on_job_ids: row.depends_on_job_ids,
            is_rollback: row.is_rollback,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            cancelled_at: row.cancelled_at,
        }
    }
}

/// Input for creating a PENDING job
#[derive(Debug, Clone, Default)]
pub struct CreateJob {
    pub device_id: i64,
    pub device_ids: Option<Vec<i64>>,
    pub executor_type: String,
    pub action_name: String,
    pub action_config: Option<serde_json::Value>,
    pub extra_vars: Option<serde_json::Value>,
    pub vault_secret_id: Option<i64>,
    pub workflow_instance_id: Option<i64>,
    pub step_order: Option<i32>,
    pub depends_on_job_ids: Option<Vec<i64>>,
    pub is_rollback: bool,
}

/// Fields a state transition may write alongside the status change.
/// `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct JobMutation {
    pub progress: Option<i32>,
    pub task_count: Option<i32>,
    pub tasks_completed: Option<i32>,
    pub log_output: Option<String>,
    pub error_category: Option<String>,
    pub worker_task_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// Filters for listing jobs
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub device_id: Option<i64>,
    pub executor_type: Option<String>,
    pub workflow_instance_id: Option<i64>,
    pub page: i64,
    pub per_page: i64,
}

// ============================================
// Workflow models
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct WorkflowTemplateRow {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub steps: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateWorkflowTemplate {
    pub name: String,
    pub description: Option<String>,
    pub steps: serde_json::Value,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateWorkflowTemplate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub steps: Option<serde_json::Value>,
}

#[derive(Debug, Clone, FromRow)]
pub struct WorkflowInstanceRow {
    pub id: i64,
    pub template_id: Option<i64>,
    pub template_snapshot: serde_json::Value,
    pub status: String,
    #[sqlx(json)]
    pub device_ids: Vec<i64>,
    pub rollback_on_failure: bool,
    pub extra_vars: Option<serde_json::Value>,
    pub vault_secret_id: Option<i64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowInstanceRow {
    pub fn status(&self) -> WorkflowStatus {
        WorkflowStatus::from(self.status.as_str())
    }
}

impl From<WorkflowInstanceRow> for WorkflowInstance {
    fn from(row: WorkflowInstanceRow) -> Self {
        let status = row.status();
        WorkflowInstance {
            id: row.id,
            template_id: row.template_id,
            template_snapshot: row.template_snapshot,
            status,
            device_ids: row.device_ids,
            rollback_on_failure: row.rollback_on_failure,
            extra_vars: row.extra_vars,
            vault_secret_id: row.vault_secret_id,
            error_message: row.error_message,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateWorkflowInstance {
    pub template_id: Option<i64>,
    pub template_snapshot: serde_json::Value,
    pub device_ids: Vec<i64>,
    pub rollback_on_failure: bool,
    pub extra_vars: Option<serde_json::Value>,
    pub vault_secret_id: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateWorkflowInstance {
    pub status: Option<String>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

// ============================================
// Vault secret models
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct VaultSecretRow {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub encrypted_content: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateVaultSecret {
    pub name: String,
    pub description: Option<String>,
    pub encrypted_content: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateVaultSecret {
    pub description: Option<String>,
    pub encrypted_content: Option<Vec<u8>>,
}

// ============================================
// Task queue models
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct TaskMessageRow {
    pub id: Uuid,
    pub job_id: i64,
    pub executor_type: String,
    pub params: serde_json::Value,
    pub status: String,
    pub attempt: i32,
    pub max_attempts: i32,
    pub available_at: DateTime<Utc>,
    pub locked_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateTaskMessage {
    pub job_id: i64,
    pub executor_type: String,
    /// Serializable primitives only: ids, strings, maps.
    pub params: serde_json::Value,
}

// ============================================
// Job log event models (per-job stream)
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct JobLogEventRow {
    pub id: i64,
    pub job_id: i64,
    pub sequence: i32,
    pub event_type: String,
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

// ============================================
// Audit models (write-only sink)
// ============================================

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<i64>,
    pub details: Option<serde_json::Value>,
    pub status: String,
}

impl AuditEntry {
    pub fn success(
        action: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: i64,
    ) -> Self {
        Self {
            action: action.into(),
            resource_type: resource_type.into(),
            resource_id: Some(resource_id),
            details: None,
            status: "success".to_string(),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}
