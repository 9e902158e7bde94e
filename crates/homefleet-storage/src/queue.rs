// Postgres-backed task queue
//
// At-least-once delivery: a message claimed by a crashed worker stays
// `running` until its retry is scheduled by the supervising loop, and
// duplicate delivery is harmless because workers no-op on terminal jobs.
// Deduplication is by message id (uuid v7), never by job id.

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use uuid::Uuid;

use crate::models::{CreateTaskMessage, TaskMessageRow};
use crate::repositories::Database;

/// Retry ceiling per message.
pub const MAX_ATTEMPTS: i32 = 3;

/// Backoff cap in seconds.
pub const BACKOFF_CAP_SECS: u64 = 300;

/// Exponential backoff for the retry after `attempt` completed attempts:
/// 1 s, 2 s, 4 s, ... capped at [`BACKOFF_CAP_SECS`].
pub fn backoff_delay(attempt: i32) -> u64 {
    let attempt = attempt.clamp(0, 62) as u32;
    (1u64 << attempt).min(BACKOFF_CAP_SECS)
}

/// Outcome of a retry request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Rescheduled; delivery happens once `available_at` passes.
    Requeued { attempt: i32, delay_secs: u64 },
    /// Attempts exhausted; the message is dead.
    Exhausted,
}

const MESSAGE_COLUMNS: &str = "id, job_id, executor_type, params, status, attempt, max_attempts, \
     available_at, locked_by, created_at";

impl Database {
    /// Enqueue a dispatch message. Params must be serializable primitives.
    pub async fn enqueue_task(&self, input: CreateTaskMessage) -> Result<TaskMessageRow> {
        let row = sqlx::query_as::<_, TaskMessageRow>(&format!(
            r#"
            INSERT INTO task_messages (id, job_id, executor_type, params, status, max_attempts)
            VALUES ($1, $2, $3, $4, 'queued', $5)
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(Uuid::now_v7())
        .bind(input.job_id)
        .bind(&input.executor_type)
        .bind(&input.params)
        .bind(MAX_ATTEMPTS)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    /// Claim the oldest ready message, if any. `FOR UPDATE SKIP LOCKED`
    /// serializes competing workers without blocking them.
    pub async fn claim_task(&self, worker_id: &str) -> Result<Option<TaskMessageRow>> {
        let row = sqlx::query_as::<_, TaskMessageRow>(&format!(
            r#"
            UPDATE task_messages
            SET status = 'running', locked_by = $1
            WHERE id = (
                SELECT id FROM task_messages
                WHERE status = 'queued' AND available_at <= NOW()
                ORDER BY available_at ASC, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Finish a message (success, or a terminal non-retryable failure).
    /// The row is deleted outright: dispatch params can carry a decrypted
    /// vault password, which must not outlive the dispatch.
    pub async fn complete_task(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM task_messages WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Reschedule a message after a transient failure, or kill it once
    /// attempts are exhausted.
    pub async fn retry_task(&self, id: Uuid) -> Result<RetryOutcome> {
        let row = sqlx::query_as::<_, TaskMessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM task_messages WHERE id = $1"
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        let next_attempt = row.attempt + 1;
        if next_attempt >= row.max_attempts {
            // Dead-lettered for inspection, but stripped of its params (they
            // can carry a decrypted vault password).
            sqlx::query(
                "UPDATE task_messages SET status = 'dead', locked_by = NULL, params = '{}'::jsonb WHERE id = $1",
            )
            .bind(id)
            .execute(&self.pool)
            .await?;
            return Ok(RetryOutcome::Exhausted);
        }

        let delay_secs = backoff_delay(row.attempt);
        let available_at = Utc::now() + ChronoDuration::seconds(delay_secs as i64);

        sqlx::query(
            r#"
            UPDATE task_messages
            SET status = 'queued', locked_by = NULL, attempt = $2, available_at = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(next_attempt)
        .bind(available_at)
        .execute(&self.pool)
        .await?;

        Ok(RetryOutcome::Requeued {
            attempt: next_attempt,
            delay_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        assert_eq!(backoff_delay(0), 1);
        assert_eq!(backoff_delay(1), 2);
        assert_eq!(backoff_delay(2), 4);
        assert_eq!(backoff_delay(8), 256);
        assert_eq!(backoff_delay(9), 300);
        assert_eq!(backoff_delay(40), 300);
    }

    #[test]
    fn backoff_tolerates_garbage_attempts() {
        assert_eq!(backoff_delay(-3), 1);
        assert_eq!(backoff_delay(i32::MAX), 300);
    }
}
