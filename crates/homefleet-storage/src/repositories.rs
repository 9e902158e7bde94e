// Repository layer for database operations
//
// The job store is the only shared mutable state in the system; every write
// here is initiated by a known actor (API handler, worker, workflow engine).
// Status changes go through `transition_job`, a CAS-style update guarded by
// the expected prior state.

use anyhow::Result;
use homefleet_contracts::JobStatus;
use serde_json::json;
use sqlx::{PgPool, QueryBuilder};

use crate::models::*;

const JOB_COLUMNS: &str = "id, device_id, device_ids, executor_type, action_name, action_config, \
     extra_vars, vault_secret_id, status, progress, task_count, tasks_completed, log_output, \
     error_category, cancel_requested, worker_task_id, workflow_instance_id, step_order, \
     depends_on_job_ids, is_rollback, created_at, started_at, completed_at, cancelled_at";

const INSTANCE_COLUMNS: &str = "id, template_id, template_snapshot, status, device_ids, \
     rollback_on_failure, extra_vars, vault_secret_id, error_message, created_at, started_at, \
     completed_at";

#[derive(Clone)]
pub struct Database {
    pub(crate) pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create database connection from URL
    pub async fn from_url(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    // ============================================
    // Devices (read-only inventory collaborator)
    // ============================================

    pub async fn get_device(&self, id: i64) -> Result<Option<DeviceRow>> {
        let row = sqlx::query_as::<_, DeviceRow>(
            "SELECT id, name, ip_address, created_at FROM devices WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Fetch a set of devices, preserving the requested id order.
    pub async fn get_devices_by_ids(&self, ids: &[i64]) -> Result<Vec<DeviceRow>> {
        let rows = sqlx::query_as::<_, DeviceRow>(
            "SELECT id, name, ip_address, created_at FROM devices WHERE id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        let mut ordered = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(row) = rows.iter().find(|r| r.id == *id) {
                ordered.push(row.clone());
            }
        }
        Ok(ordered)
    }

    // ============================================
    // Jobs
    // ============================================

    pub async fn create_job(&self, input: CreateJob) -> Result<JobRow> {
        // Last line of defense: callers validate, the store still refuses
        // names that could reach a filesystem path.
        if !homefleet_core::validate::is_safe_action_name(&input.action_name) {
            anyhow::bail!("illegal action name '{}'", input.action_name);
        }
        if input.executor_type.is_empty() {
            anyhow::bail!("executor_type must not be empty");
        }

        let device_ids = input.device_ids.as_ref().map(|v| json!(v));
        let depends_on = input.depends_on_job_ids.as_ref().map(|v| json!(v));

        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            INSERT INTO automation_jobs
                (device_id, device_ids, executor_type, action_name, action_config, extra_vars,
                 vault_secret_id, workflow_instance_id, step_order, depends_on_job_ids, is_rollback,
                 status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 'pending')
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(input.device_id)
        .bind(&device_ids)
        .bind(&input.executor_type)
        .bind(&input.action_name)
        .bind(&input.action_config)
        .bind(&input.extra_vars)
        .bind(input.vault_secret_id)
        .bind(input.workflow_instance_id)
        .bind(input.step_order)
        .bind(&depends_on)
        .bind(input.is_rollback)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_job(&self, id: i64) -> Result<Option<JobRow>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM automation_jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// List jobs newest-first. `per_page` is clamped to 100.
    pub async fn list_jobs(&self, filter: JobFilter) -> Result<Vec<JobRow>> {
        let per_page = filter.per_page.clamp(1, 100);
        let page = filter.page.max(1);
        let offset = (page - 1) * per_page;

        let mut qb: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(format!(
            "SELECT {JOB_COLUMNS} FROM automation_jobs WHERE TRUE"
        ));
        if let Some(device_id) = filter.device_id {
            qb.push(" AND device_id = ").push_bind(device_id);
        }
        if let Some(executor_type) = &filter.executor_type {
            qb.push(" AND executor_type = ").push_bind(executor_type.clone());
        }
        if let Some(instance_id) = filter.workflow_instance_id {
            qb.push(" AND workflow_instance_id = ").push_bind(instance_id);
        }
        qb.push(" ORDER BY id DESC LIMIT ")
            .push_bind(per_page)
            .push(" OFFSET ")
            .push_bind(offset);

        let rows = qb.build_query_as::<JobRow>().fetch_all(&self.pool).await?;
        Ok(rows)
    }

    /// All jobs belonging to a workflow instance, in step order.
    pub async fn list_jobs_for_instance(&self, instance_id: i64) -> Result<Vec<JobRow>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM automation_jobs
            WHERE workflow_instance_id = $1
            ORDER BY step_order ASC, id ASC
            "#
        ))
        .bind(instance_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// CAS-style state transition guarded by the expected prior state.
    ///
    /// Returns `Ok(None)` when the guard does not match (someone else won the
    /// race, or the job is already terminal) - callers treat that as a
    /// refusal, not an error. A same-state "transition" is allowed for
    /// non-terminal states to batch progress/log mutations.
    pub async fn transition_job(
        &self,
        id: i64,
        from: JobStatus,
        to: JobStatus,
        mutation: JobMutation,
    ) -> Result<Option<JobRow>> {
        let legal = if from == to {
            !from.is_terminal()
        } else {
            from.can_transition_to(to)
        };
        if !legal {
            anyhow::bail!("illegal job transition {from} -> {to}");
        }

        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            UPDATE automation_jobs
            SET
                status = $3,
                progress = COALESCE($4, progress),
                task_count = COALESCE($5, task_count),
                tasks_completed = COALESCE($6, tasks_completed),
                log_output = COALESCE($7, log_output),
                error_category = COALESCE($8, error_category),
                worker_task_id = COALESCE($9, worker_task_id),
                started_at = COALESCE($10, started_at),
                completed_at = COALESCE($11, completed_at),
                cancelled_at = COALESCE($12, cancelled_at)
            WHERE id = $1 AND status = $2
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(from.to_string())
        .bind(to.to_string())
        .bind(mutation.progress)
        .bind(mutation.task_count)
        .bind(mutation.tasks_completed)
        .bind(&mutation.log_output)
        .bind(&mutation.error_category)
        .bind(mutation.worker_task_id)
        .bind(mutation.started_at)
        .bind(mutation.completed_at)
        .bind(mutation.cancelled_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Set the cooperative cancellation flag on a RUNNING job.
    /// Returns the updated row, or `None` when the job is not running.
    pub async fn request_job_cancel(&self, id: i64) -> Result<Option<JobRow>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            UPDATE automation_jobs
            SET cancel_requested = TRUE
            WHERE id = $1 AND status = 'running'
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn delete_job(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM automation_jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // ============================================
    // Workflow templates
    // ============================================

    pub async fn create_workflow_template(
        &self,
        input: CreateWorkflowTemplate,
    ) -> Result<WorkflowTemplateRow> {
        let row = sqlx::query_as::<_, WorkflowTemplateRow>(
            r#"
            INSERT INTO workflow_templates (name, description, steps)
            VALUES ($1, $2, $3)
            RETURNING id, name, description, steps, created_at, updated_at
            "#,
        )
        .bind(&input.name)
        .bind(&input.description)
        .bind(&input.steps)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_workflow_template(&self, id: i64) -> Result<Option<WorkflowTemplateRow>> {
        let row = sqlx::query_as::<_, WorkflowTemplateRow>(
            "SELECT id, name, description, steps, created_at, updated_at FROM workflow_templates WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_workflow_template_by_name(
        &self,
        name: &str,
    ) -> Result<Option<WorkflowTemplateRow>> {
        let row = sqlx::query_as::<_, WorkflowTemplateRow>(
            "SELECT id, name, description, steps, created_at, updated_at FROM workflow_templates WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn list_workflow_templates(&self) -> Result<Vec<WorkflowTemplateRow>> {
        let rows = sqlx::query_as::<_, WorkflowTemplateRow>(
            "SELECT id, name, description, steps, created_at, updated_at FROM workflow_templates ORDER BY name ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn update_workflow_template(
        &self,
        id: i64,
        input: UpdateWorkflowTemplate,
    ) -> Result<Option<WorkflowTemplateRow>> {
        let row = sqlx::query_as::<_, WorkflowTemplateRow>(
            r#"
            UPDATE workflow_templates
            SET
                name = COALESCE($2, name),
                description = COALESCE($3, description),
                steps = COALESCE($4, steps),
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, name, description, steps, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(&input.name)
        .bind(&input.description)
        .bind(&input.steps)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn delete_workflow_template(&self, id: i64) -> Result<bool> {
        // Instances survive template deletion; their template_id goes null
        // and the frozen snapshot keeps the execution meaningful.
        let result = sqlx::query("DELETE FROM workflow_templates WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // ============================================
    // Workflow instances
    // ============================================

    pub async fn create_workflow_instance(
        &self,
        input: CreateWorkflowInstance,
    ) -> Result<WorkflowInstanceRow> {
        let row = sqlx::query_as::<_, WorkflowInstanceRow>(&format!(
            r#"
            INSERT INTO workflow_instances
                (template_id, template_snapshot, device_ids, rollback_on_failure, extra_vars,
                 vault_secret_id, status)
            VALUES ($1, $2, $3, $4, $5, $6, 'pending')
            RETURNING {INSTANCE_COLUMNS}
            "#
        ))
        .bind(input.template_id)
        .bind(&input.template_snapshot)
        .bind(json!(input.device_ids))
        .bind(input.rollback_on_failure)
        .bind(&input.extra_vars)
        .bind(input.vault_secret_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_workflow_instance(&self, id: i64) -> Result<Option<WorkflowInstanceRow>> {
        let row = sqlx::query_as::<_, WorkflowInstanceRow>(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM workflow_instances WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn list_workflow_instances(
        &self,
        page: i64,
        per_page: i64,
    ) -> Result<Vec<WorkflowInstanceRow>> {
        let per_page = per_page.clamp(1, 100);
        let offset = (page.max(1) - 1) * per_page;

        let rows = sqlx::query_as::<_, WorkflowInstanceRow>(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM workflow_instances ORDER BY id DESC LIMIT $1 OFFSET $2"
        ))
        .bind(per_page)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn update_workflow_instance(
        &self,
        id: i64,
        input: UpdateWorkflowInstance,
    ) -> Result<Option<WorkflowInstanceRow>> {
        let row = sqlx::query_as::<_, WorkflowInstanceRow>(&format!(
            r#"
            UPDATE workflow_instances
            SET
                status = COALESCE($2, status),
                error_message = COALESCE($3, error_message),
                started_at = COALESCE($4, started_at),
                completed_at = COALESCE($5, completed_at)
            WHERE id = $1
            RETURNING {INSTANCE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&input.status)
        .bind(&input.error_message)
        .bind(input.started_at)
        .bind(input.completed_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Delete an instance; its jobs cascade with it.
    pub async fn delete_workflow_instance(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM workflow_instances WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // ============================================
    // Vault secrets
    // ============================================

    pub async fn create_vault_secret(&self, input: CreateVaultSecret) -> Result<VaultSecretRow> {
        let row = sqlx::query_as::<_, VaultSecretRow>(
            r#"
            INSERT INTO vault_secrets (name, description, encrypted_content)
            VALUES ($1, $2, $3)
            RETURNING id, name, description, encrypted_content, created_at, updated_at
            "#,
        )
        .bind(&input.name)
        .bind(&input.description)
        .bind(&input.encrypted_content)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_vault_secret(&self, id: i64) -> Result<Option<VaultSecretRow>> {
        let row = sqlx::query_as::<_, VaultSecretRow>(
            "SELECT id, name, description, encrypted_content, created_at, updated_at FROM vault_secrets WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_vault_secret_by_name(&self, name: &str) -> Result<Option<VaultSecretRow>> {
        let row = sqlx::query_as::<_, VaultSecretRow>(
            "SELECT id, name, description, encrypted_content, created_at, updated_at FROM vault_secrets WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn list_vault_secrets(&self) -> Result<Vec<VaultSecretRow>> {
        let rows = sqlx::query_as::<_, VaultSecretRow>(
            "SELECT id, name, description, encrypted_content, created_at, updated_at FROM vault_secrets ORDER BY name ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn update_vault_secret(
        &self,
        id: i64,
        input: UpdateVaultSecret,
    ) -> Result<Option<VaultSecretRow>> {
        let row = sqlx::query_as::<_, VaultSecretRow>(
            r#"
            UPDATE vault_secrets
            SET
                description = COALESCE($2, description),
                encrypted_content = COALESCE($3, encrypted_content),
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, name, description, encrypted_content, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(&input.description)
        .bind(&input.encrypted_content)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Delete a secret. Jobs that referenced it keep their history with a
    /// nulled reference (FK is ON DELETE SET NULL).
    pub async fn delete_vault_secret(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM vault_secrets WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
