// Job DTOs — one execution of one action against a device (or set of devices)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Job lifecycle status.
///
/// Transitions form a monotonic lattice: pending → running → one of
/// {completed, failed, cancelled}; pending may also go straight to failed
/// (dispatch rejected) or cancelled (cancel before execution). Terminal
/// states never change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether `self → to` is a legal lattice edge.
    pub fn can_transition_to(&self, to: JobStatus) -> bool {
        match self {
            JobStatus::Pending => matches!(
                to,
                JobStatus::Running | JobStatus::Failed | JobStatus::Cancelled
            ),
            JobStatus::Running => to.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl From<&str> for JobStatus {
    fn from(s: &str) -> Self {
        match s {
            "running" => JobStatus::Running,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            "cancelled" => JobStatus::Cancelled,
            _ => JobStatus::Pending,
        }
    }
}

/// Machine-readable failure category attached to failed jobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    NotFound,
    Authentication,
    Permission,
    Connectivity,
    Timeout,
    Execution,
    QueueUnavailable,
    VaultInvalid,
}

impl ErrorCategory {
    /// Transient categories are retried by the task queue; the rest are
    /// terminal on first occurrence.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCategory::Connectivity | ErrorCategory::Timeout | ErrorCategory::Execution
        )
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Permission => "permission",
            ErrorCategory::Connectivity => "connectivity",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Execution => "execution",
            ErrorCategory::QueueUnavailable => "queue_unavailable",
            ErrorCategory::VaultInvalid => "vault_invalid",
        };
        write!(f, "{}", s)
    }
}

impl From<&str> for ErrorCategory {
    fn from(s: &str) -> Self {
        match s {
            "validation" => ErrorCategory::Validation,
            "not_found" => ErrorCategory::NotFound,
            "authentication" => ErrorCategory::Authentication,
            "permission" => ErrorCategory::Permission,
            "connectivity" => ErrorCategory::Connectivity,
            "timeout" => ErrorCategory::Timeout,
            "queue_unavailable" => ErrorCategory::QueueUnavailable,
            "vault_invalid" => ErrorCategory::VaultInvalid,
            _ => ErrorCategory::Execution,
        }
    }
}

/// Job - one execution of one action against a primary device
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Job {
    pub id: i64,
    pub device_id: i64,
    /// Present only for multi-target jobs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_ids: Option<Vec<i64>>,
    pub executor_type: String,
    pub action_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_config: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_vars: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vault_secret_id: Option<i64>,
    pub status: JobStatus,
    pub progress: i32,
    pub task_count: i32,
    pub tasks_completed: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_category: Option<ErrorCategory>,
    pub cancel_requested: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_task_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_instance_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_order: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depends_on_job_ids: Option<Vec<i64>>,
    pub is_rollback: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_have_no_exits() {
        for from in [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled] {
            for to in [
                JobStatus::Pending,
                JobStatus::Running,
                JobStatus::Completed,
                JobStatus::Failed,
                JobStatus::Cancelled,
            ] {
                assert!(!from.can_transition_to(to), "{from} → {to} must be illegal");
            }
        }
    }

    #[test]
    fn pending_can_cancel_without_running() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Cancelled));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Completed));
    }

    #[test]
    fn category_round_trips_through_str() {
        for cat in [
            ErrorCategory::Validation,
            ErrorCategory::QueueUnavailable,
            ErrorCategory::VaultInvalid,
        ] {
            assert_eq!(ErrorCategory::from(cat.to_string().as_str()), cat);
        }
    }

    #[test]
    fn retryable_split_matches_taxonomy() {
        assert!(ErrorCategory::Connectivity.is_retryable());
        assert!(ErrorCategory::Timeout.is_retryable());
        assert!(ErrorCategory::Execution.is_retryable());
        assert!(!ErrorCategory::Validation.is_retryable());
        assert!(!ErrorCategory::Authentication.is_retryable());
        assert!(!ErrorCategory::Permission.is_retryable());
        assert!(!ErrorCategory::VaultInvalid.is_retryable());
    }
}
