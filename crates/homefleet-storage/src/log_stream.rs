// Per-job log event stream
//
// One channel per job. Events carry a per-job monotone sequence so
// subscribers can replay from any point; the API's SSE endpoint tails the
// table. Lines arrive here already redacted - nothing raw is ever published.

use anyhow::Result;
use homefleet_contracts::{JobStreamEvent, StatusPayload, STREAM_COMPLETE};

use crate::models::JobLogEventRow;
use crate::repositories::Database;

impl Database {
    /// Append one event to a job's channel; returns its sequence number.
    pub async fn publish_job_event(
        &self,
        job_id: i64,
        event_type: JobStreamEvent,
        payload: &str,
    ) -> Result<i32> {
        let row = sqlx::query_as::<_, JobLogEventRow>(
            r#"
            INSERT INTO job_log_events (job_id, sequence, event_type, payload)
            VALUES ($1, COALESCE((SELECT MAX(sequence) + 1 FROM job_log_events WHERE job_id = $1), 1), $2, $3)
            RETURNING id, job_id, sequence, event_type, payload, created_at
            "#,
        )
        .bind(job_id)
        .bind(event_type.as_str())
        .bind(payload)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.sequence)
    }

    /// Publish the stream-start status event.
    pub async fn publish_job_status(&self, job_id: i64, status: &str, progress: i32) -> Result<i32> {
        let payload = serde_json::to_string(&StatusPayload {
            status: status.to_string(),
            progress,
        })?;
        self.publish_job_event(job_id, JobStreamEvent::Status, &payload)
            .await
    }

    /// Publish one redacted output line.
    pub async fn publish_job_line(&self, job_id: i64, line: &str) -> Result<i32> {
        self.publish_job_event(job_id, JobStreamEvent::Log, line)
            .await
    }

    /// Publish the end-of-stream sentinel as the final line, then the
    /// COMPLETE event with the terminal status. No further lines arrive for
    /// this job id after subscribers observe the sentinel.
    pub async fn publish_stream_complete(
        &self,
        job_id: i64,
        status: &str,
        progress: i32,
    ) -> Result<i32> {
        self.publish_job_event(job_id, JobStreamEvent::Log, STREAM_COMPLETE)
            .await?;
        let payload = serde_json::to_string(&StatusPayload {
            status: status.to_string(),
            progress,
        })?;
        self.publish_job_event(job_id, JobStreamEvent::Complete, &payload)
            .await
    }

    /// Events after `since_sequence` (all events when `None`), in order.
    pub async fn list_job_events(
        &self,
        job_id: i64,
        since_sequence: Option<i32>,
    ) -> Result<Vec<JobLogEventRow>> {
        let rows = sqlx::query_as::<_, JobLogEventRow>(
            r#"
            SELECT id, job_id, sequence, event_type, payload, created_at
            FROM job_log_events
            WHERE job_id = $1 AND sequence > $2
            ORDER BY sequence ASC
            "#,
        )
        .bind(job_id)
        .bind(since_sequence.unwrap_or(0))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
