// Audit log sink
//
// Write-only from the core's perspective. Recording must never fail the
// operation being audited, so errors are logged and swallowed here.

use crate::models::AuditEntry;
use crate::repositories::Database;

impl Database {
    /// Record a state transition or administrative action.
    pub async fn audit(&self, entry: AuditEntry) {
        let result = sqlx::query(
            r#"
            INSERT INTO audit_logs (action, resource_type, resource_id, details, status)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&entry.action)
        .bind(&entry.resource_type)
        .bind(entry.resource_id)
        .bind(&entry.details)
        .bind(&entry.status)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::warn!(
                action = %entry.action,
                resource_type = %entry.resource_type,
                "Failed to write audit log entry: {}",
                e
            );
        }
    }
}
