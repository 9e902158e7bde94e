// Workflow engine
//
// Drives a template's job graph to a terminal state. The engine never holds
// in-memory graph state between calls: every decision re-reads the job rows,
// so it is safe to call from any worker or API process.
//
// Ordering guarantees: a dependent job is dispatched only after all its
// ancestors are COMPLETED; rollback jobs run one at a time in strict reverse
// step order.

use anyhow::Result;
use chrono::Utc;
use homefleet_contracts::{ErrorCategory, JobStatus, WorkflowStatus, WorkflowStep};
use homefleet_core::validate::merge_extra_vars;
use homefleet_core::Vault;
use homefleet_executors::{ExecuteRequest, ExecutorRegistry, TargetDevice};
use homefleet_storage::{
    AuditEntry, CreateJob, CreateWorkflowInstance, Database, DeviceRow, JobMutation, JobRow,
    UpdateWorkflowInstance, WorkflowInstanceRow,
};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::plan;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Workflow template {0} not found")]
    TemplateNotFound(i64),

    #[error("Workflow instance {0} not found")]
    InstanceNotFound(i64),

    #[error("Invalid workflow template: {0}")]
    InvalidTemplate(String),

    #[error("Workflow requires at least one device")]
    NoDevices,

    #[error("Devices not found: {0:?}")]
    DevicesNotFound(Vec<i64>),

    #[error("Device '{name}' (ID: {id}) has no IP address")]
    DeviceMissingIp { id: i64, name: String },

    #[error("Vault secret {0} not found")]
    SecretNotFound(i64),

    #[error("Failed to decrypt vault secret")]
    VaultInvalid,

    #[error("Cannot cancel workflow in {0} state")]
    NotCancellable(WorkflowStatus),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Request to start a workflow instance.
#[derive(Debug, Clone)]
pub struct StartWorkflow {
    pub template_id: i64,
    pub device_ids: Vec<i64>,
    pub rollback_on_failure: bool,
    pub extra_vars: Option<Value>,
    pub vault_secret_id: Option<i64>,
}

pub struct WorkflowEngine {
    db: Database,
    registry: ExecutorRegistry,
    vault: Vault,
}

impl WorkflowEngine {
    pub fn new(db: Database, registry: ExecutorRegistry, vault: Vault) -> Self {
        Self {
            db,
            registry,
            vault,
        }
    }

    /// Start a new workflow instance: snapshot the template, create one
    /// PENDING job per step, and dispatch every step without dependencies.
    pub async fn start_workflow(
        &self,
        input: StartWorkflow,
    ) -> Result<WorkflowInstanceRow, EngineError> {
        let template = self
            .db
            .get_workflow_template(input.template_id)
            .await?
            .ok_or(EngineError::TemplateNotFound(input.template_id))?;

        let steps: Vec<WorkflowStep> = serde_json::from_value(template.steps.clone())
            .map_err(|e| EngineError::InvalidTemplate(e.to_string()))?;
        plan::validate_steps(&steps).map_err(EngineError::InvalidTemplate)?;

        if input.device_ids.is_empty() {
            return Err(EngineError::NoDevices);
        }

        let devices = self.db.get_devices_by_ids(&input.device_ids).await?;
        if devices.len() != input.device_ids.len() {
            let found: HashSet<i64> = devices.iter().map(|d| d.id).collect();
            let missing: Vec<i64> = input
                .device_ids
                .iter()
                .copied()
                .filter(|id| !found.contains(id))
                .collect();
            return Err(EngineError::DevicesNotFound(missing));
        }
        for device in &devices {
            if device.ip_address.as_deref().unwrap_or("").is_empty() {
                return Err(EngineError::DeviceMissingIp {
                    id: device.id,
                    name: device.name.clone(),
                });
            }
        }

        // Decrypt up front so a bad secret fails the start, not a step.
        let vault_password = match input.vault_secret_id {
            Some(secret_id) => {
                let secret = self
                    .db
                    .get_vault_secret(secret_id)
                    .await?
                    .ok_or(EngineError::SecretNotFound(secret_id))?;
                Some(
                    self.vault
                        .decrypt(&secret.encrypted_content)
                        .map_err(|_| EngineError::VaultInvalid)?,
                )
            }
            None => None,
        };

        let instance = self
            .db
            .create_workflow_instance(CreateWorkflowInstance {
                template_id: Some(template.id),
                template_snapshot: plan::snapshot(&template.name, &steps),
                device_ids: input.device_ids.clone(),
                rollback_on_failure: input.rollback_on_failure,
                extra_vars: input.extra_vars.clone(),
                vault_secret_id: input.vault_secret_id,
            })
            .await?;

        // One PENDING job per step; dependency orders map to the freshly
        // assigned job ids.
        let mut sorted_steps = steps.clone();
        sorted_steps.sort_by_key(|s| s.order);
        let primary_device = devices[0].id;
        let mut step_jobs: HashMap<i32, i64> = HashMap::new();
        for step in &sorted_steps {
            let merged = merge_extra_vars(&[
                input.extra_vars.as_ref(),
                step.extra_vars.as_ref(),
            ]);
            let depends_on_job_ids: Vec<i64> = step
                .depends_on
                .iter()
                .filter_map(|order| step_jobs.get(order).copied())
                .collect();

            let job = self
                .db
                .create_job(CreateJob {
                    device_id: primary_device,
                    device_ids: if input.device_ids.len() > 1 {
                        Some(input.device_ids.clone())
                    } else {
                        None
                    },
                    executor_type: step.executor_type.clone(),
                    action_name: step.action_name.clone(),
                    action_config: None,
                    extra_vars: if merged.is_empty() {
                        None
                    } else {
                        Some(Value::Object(merged))
                    },
                    vault_secret_id: input.vault_secret_id,
                    workflow_instance_id: Some(instance.id),
                    step_order: Some(step.order),
                    depends_on_job_ids: if depends_on_job_ids.is_empty() {
                        None
                    } else {
                        Some(depends_on_job_ids)
                    },
                    is_rollback: false,
                })
                .await?;
            step_jobs.insert(step.order, job.id);
        }

        let instance = self
            .set_instance_status(instance.id, WorkflowStatus::Running, None, false)
            .await?;

        self.db
            .audit(
                AuditEntry::success("workflow_started", "workflow_instance", instance.id)
                    .with_details(serde_json::json!({ "template": template.name })),
            )
            .await;

        self.dispatch_ready(&instance, &devices, vault_password.as_deref())
            .await?;

        Ok(instance)
    }

    /// Called when a job belonging to a workflow reaches a terminal state.
    pub async fn on_job_complete(&self, job_id: i64) -> Result<(), EngineError> {
        let Some(job) = self.db.get_job(job_id).await? else {
            return Ok(());
        };
        let Some(instance_id) = job.workflow_instance_id else {
            return Ok(());
        };
        let Some(instance) = self.db.get_workflow_instance(instance_id).await? else {
            return Ok(());
        };

        match instance.status() {
            WorkflowStatus::RollingBack => self.continue_rollback(&instance).await,
            WorkflowStatus::Running => self.advance(&instance, &job).await,
            _ => Ok(()),
        }
    }

    async fn advance(
        &self,
        instance: &WorkflowInstanceRow,
        job: &JobRow,
    ) -> Result<(), EngineError> {
        match job.status() {
            JobStatus::Completed => {
                let jobs = self.db.list_jobs_for_instance(instance.id).await?;
                let all_done = jobs
                    .iter()
                    .filter(|j| !j.is_rollback)
                    .all(|j| j.status() == JobStatus::Completed);
                if all_done {
                    self.set_instance_status(instance.id, WorkflowStatus::Completed, None, true)
                        .await?;
                    tracing::info!(instance_id = instance.id, "Workflow completed");
                } else {
                    let (devices, vault_password) = self.load_dispatch_context(instance).await?;
                    self.dispatch_ready(instance, &devices, vault_password.as_deref())
                        .await?;
                }
                Ok(())
            }
            JobStatus::Failed => {
                if instance.rollback_on_failure {
                    self.trigger_rollback(instance).await
                } else {
                    let message = format!(
                        "Step {} ({}) failed",
                        job.step_order.unwrap_or(0),
                        job.action_name
                    );
                    self.set_instance_status(
                        instance.id,
                        WorkflowStatus::Failed,
                        Some(message),
                        true,
                    )
                    .await?;
                    Ok(())
                }
            }
            JobStatus::Cancelled => {
                let message = format!(
                    "Step {} ({}) cancelled",
                    job.step_order.unwrap_or(0),
                    job.action_name
                );
                self.set_instance_status(instance.id, WorkflowStatus::Failed, Some(message), true)
                    .await?;
                Ok(())
            }
            // Non-terminal callbacks carry no new information.
            _ => Ok(()),
        }
    }

    /// Dispatch every pending non-rollback job whose dependencies are all
    /// COMPLETED, in ascending step order.
    async fn dispatch_ready(
        &self,
        instance: &WorkflowInstanceRow,
        devices: &[DeviceRow],
        vault_password: Option<&str>,
    ) -> Result<(), EngineError> {
        let jobs = self.db.list_jobs_for_instance(instance.id).await?;
        let ready = plan::ready_job_ids(&jobs);
        for job_id in ready {
            if let Some(job) = jobs.iter().find(|j| j.id == job_id) {
                self.dispatch_job(instance, job, devices, vault_password)
                    .await?;
            }
        }
        Ok(())
    }

    async fn dispatch_job(
        &self,
        instance: &WorkflowInstanceRow,
        job: &JobRow,
        devices: &[DeviceRow],
        vault_password: Option<&str>,
    ) -> Result<(), EngineError> {
        let Some(executor) = self.registry.get(&job.executor_type) else {
            tracing::error!(job_id = job.id, executor = %job.executor_type, "Executor not found");
            self.fail_job(job, ErrorCategory::Validation).await?;
            self.set_instance_status(
                instance.id,
                WorkflowStatus::Failed,
                Some(format!("Unknown executor type '{}'", job.executor_type)),
                true,
            )
            .await?;
            return Ok(());
        };

        let primary = &devices[0];
        let primary_ip = primary.ip_address.clone().unwrap_or_default();
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
            primary_ip,
            primary_name: primary.name.clone(),
            action_name: job.action_name.clone(),
            config: job.action_config.clone(),
            extra_vars: job.extra_vars.clone(),
            devices: targets,
            vault_password: vault_password.map(String::from),
        };

        match executor.execute(request).await {
            Ok(task_id) => {
                self.db
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
                tracing::info!(
                    job_id = job.id,
                    step_order = job.step_order.unwrap_or(0),
                    "Dispatched workflow job"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(job_id = job.id, "Failed to dispatch job: {}", e);
                self.fail_job(job, ErrorCategory::QueueUnavailable).await?;
                self.set_instance_status(
                    instance.id,
                    WorkflowStatus::Failed,
                    Some(format!(
                        "Step {} ({}) failed to dispatch",
                        job.step_order.unwrap_or(0),
                        job.action_name
                    )),
                    true,
                )
                .await?;
                Ok(())
            }
        }
    }

    /// Enter rollback: create one rollback job per completed step with a
    /// declared rollback action, in reverse order, then start the first.
    async fn trigger_rollback(&self, instance: &WorkflowInstanceRow) -> Result<(), EngineError> {
        let instance = self
            .set_instance_status(instance.id, WorkflowStatus::RollingBack, None, false)
            .await?;
        tracing::info!(instance_id = instance.id, "Starting rollback");

        let steps = plan::snapshot_steps(&instance.template_snapshot);
        let jobs = self.db.list_jobs_for_instance(instance.id).await?;
        let completed_orders: HashSet<i32> = jobs
            .iter()
            .filter(|j| !j.is_rollback && j.status() == JobStatus::Completed)
            .filter_map(|j| j.step_order)
            .collect();

        let rollback_steps = plan::rollback_plan(&steps, &completed_orders);
        if rollback_steps.is_empty() {
            self.set_instance_status(
                instance.id,
                WorkflowStatus::Failed,
                Some("Workflow failed, no rollback actions defined".to_string()),
                true,
            )
            .await?;
            return Ok(());
        }

        let primary_device = *instance.device_ids.first().unwrap_or(&0);
        for step in &rollback_steps {
            self.db
                .create_job(CreateJob {
                    device_id: primary_device,
                    device_ids: if instance.device_ids.len() > 1 {
                        Some(instance.device_ids.clone())
                    } else {
                        None
                    },
                    executor_type: step.executor_type.clone(),
                    action_name: step
                        .rollback_action
                        .clone()
                        .expect("rollback plan only contains steps with rollback actions"),
                    action_config: None,
                    extra_vars: instance.extra_vars.clone(),
                    vault_secret_id: instance.vault_secret_id,
                    workflow_instance_id: Some(instance.id),
                    // Negated to mark rollback phase while preserving the
                    // reverse execution order under ascending sort.
                    step_order: Some(-step.order),
                    depends_on_job_ids: None,
                    is_rollback: true,
                })
                .await?;
        }

        self.continue_rollback(&instance).await
    }

    /// Dispatch the next rollback job, strictly one at a time, or settle the
    /// instance once all rollback jobs are terminal.
    async fn continue_rollback(&self, instance: &WorkflowInstanceRow) -> Result<(), EngineError> {
        let jobs = self.db.list_jobs_for_instance(instance.id).await?;
        let rollbacks: Vec<&JobRow> = jobs.iter().filter(|j| j.is_rollback).collect();

        if rollbacks
            .iter()
            .any(|j| j.status() == JobStatus::Failed || j.status() == JobStatus::Cancelled)
        {
            self.set_instance_status(
                instance.id,
                WorkflowStatus::Failed,
                Some("Rollback failed".to_string()),
                true,
            )
            .await?;
            return Ok(());
        }

        if rollbacks.iter().any(|j| j.status() == JobStatus::Running) {
            return Ok(());
        }

        // Pending rollbacks sort ascending on negated step order, which is
        // exactly reverse order of the steps they compensate.
        let next = rollbacks
            .iter()
            .filter(|j| j.status() == JobStatus::Pending)
            .min_by_key(|j| (j.step_order.unwrap_or(0), j.id));

        match next {
            Some(job) => {
                let (devices, vault_password) = self.load_dispatch_context(instance).await?;
                self.dispatch_job(instance, job, &devices, vault_password.as_deref())
                    .await
            }
            None => {
                self.set_instance_status(instance.id, WorkflowStatus::RolledBack, None, true)
                    .await?;
                tracing::info!(instance_id = instance.id, "Workflow rolled back");
                Ok(())
            }
        }
    }

    /// Cancel a PENDING or RUNNING workflow. Pending jobs are cancelled
    /// synchronously; running jobs get the cooperative flag and the workers
    /// observe it.
    pub async fn cancel_workflow(
        &self,
        instance_id: i64,
    ) -> Result<WorkflowInstanceRow, EngineError> {
        let instance = self
            .db
            .get_workflow_instance(instance_id)
            .await?
            .ok_or(EngineError::InstanceNotFound(instance_id))?;

        let status = instance.status();
        if !matches!(status, WorkflowStatus::Pending | WorkflowStatus::Running) {
            return Err(EngineError::NotCancellable(status));
        }

        let jobs = self.db.list_jobs_for_instance(instance_id).await?;
        for job in &jobs {
            match job.status() {
                JobStatus::Pending => {
                    self.db
                        .transition_job(
                            job.id,
                            JobStatus::Pending,
                            JobStatus::Cancelled,
                            JobMutation {
                                cancelled_at: Some(Utc::now()),
                                completed_at: Some(Utc::now()),
                                ..Default::default()
                            },
                        )
                        .await?;
                }
                JobStatus::Running => {
                    self.db.request_job_cancel(job.id).await?;
                }
                _ => {}
            }
        }

        let instance = self
            .set_instance_status(instance_id, WorkflowStatus::Cancelled, None, true)
            .await?;
        tracing::info!(instance_id, "Workflow cancelled");
        Ok(instance)
    }

    async fn fail_job(&self, job: &JobRow, category: ErrorCategory) -> Result<()> {
        self.db
            .transition_job(
                job.id,
                job.status(),
                JobStatus::Failed,
                JobMutation {
                    error_category: Some(category.to_string()),
                    completed_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;
        self.db
            .audit(
                AuditEntry::success("job_failed", "automation_job", job.id)
                    .with_details(serde_json::json!({ "category": category.to_string() })),
            )
            .await;
        Ok(())
    }

    async fn set_instance_status(
        &self,
        instance_id: i64,
        status: WorkflowStatus,
        error_message: Option<String>,
        terminal: bool,
    ) -> Result<WorkflowInstanceRow, EngineError> {
        let now = Utc::now();
        let update = UpdateWorkflowInstance {
            status: Some(status.to_string()),
            error_message,
            started_at: if status == WorkflowStatus::Running {
                Some(now)
            } else {
                None
            },
            completed_at: if terminal { Some(now) } else { None },
        };
        let instance = self
            .db
            .update_workflow_instance(instance_id, update)
            .await?
            .ok_or(EngineError::InstanceNotFound(instance_id))?;

        self.db
            .audit(
                AuditEntry::success("workflow_status", "workflow_instance", instance_id)
                    .with_details(serde_json::json!({ "status": status.to_string() })),
            )
            .await;
        Ok(instance)
    }

    /// Devices and (re-decrypted) vault password for dispatching more jobs
    /// of an already-running instance.
    async fn load_dispatch_context(
        &self,
        instance: &WorkflowInstanceRow,
    ) -> Result<(Vec<DeviceRow>, Option<String>), EngineError> {
        let devices = self.db.get_devices_by_ids(&instance.device_ids).await?;
        if devices.is_empty() {
            return Err(EngineError::DevicesNotFound(instance.device_ids.clone()));
        }
        let vault_password = match instance.vault_secret_id {
            Some(secret_id) => match self.db.get_vault_secret(secret_id).await? {
                Some(secret) => Some(
                    self.vault
                        .decrypt(&secret.encrypted_content)
                        .map_err(|_| EngineError::VaultInvalid)?,
                ),
                // Secret deleted mid-flight; proceed without it.
                None => None,
            },
            None => None,
        };
        Ok((devices, vault_password))
    }
}
