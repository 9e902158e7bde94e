// Queue claim loop and slot supervision
//
// Many slots per process, one job per slot. The worker owns the queue-facing
// decisions (complete vs retry vs dead-letter) and the slot deadlines; the
// runner owns everything between claim and terminal persistence.

use anyhow::Result;
use chrono::Utc;
use homefleet_contracts::{ErrorCategory, JobStatus};
use homefleet_core::config::WorkerConfig;
use homefleet_engine::WorkflowEngine;
use homefleet_executors::DispatchParams;
use homefleet_storage::{AuditEntry, Database, JobMutation, JobRow, RetryOutcome, TaskMessageRow};
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::runner::{JobRunner, RunOutcome};

pub struct Worker {
    db: Database,
    engine: Arc<WorkflowEngine>,
    runner: Arc<JobRunner>,
    config: WorkerConfig,
    worker_id: String,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Worker {
    pub fn new(
        db: Database,
        engine: Arc<WorkflowEngine>,
        runner: Arc<JobRunner>,
        config: WorkerConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            db,
            engine,
            runner,
            config,
            worker_id: format!("worker-{}", Uuid::now_v7()),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Signal the worker to stop claiming; in-flight slots finish.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Claim loop: one permit per slot, poll when the queue is empty.
    pub async fn run(&self) -> Result<()> {
        info!(worker_id = %self.worker_id, slots = self.config.concurrency, "Worker starting");
        let slots = Arc::new(Semaphore::new(self.config.concurrency));
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let permit = tokio::select! {
                permit = slots.clone().acquire_owned() => permit.expect("semaphore not closed"),
                _ = shutdown_rx.changed() => continue,
            };

            let claimed = tokio::select! {
                claimed = self.db.claim_task(&self.worker_id) => claimed,
                _ = shutdown_rx.changed() => { drop(permit); continue }
            };

            match claimed {
                Ok(Some(message)) => {
                    let slot = SlotContext {
                        db: self.db.clone(),
                        engine: self.engine.clone(),
                        runner: self.runner.clone(),
                        config: self.config.clone(),
                    };
                    tokio::spawn(async move {
                        slot.handle(message).await;
                        drop(permit);
                    });
                }
                Ok(None) => {
                    drop(permit);
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                        _ = shutdown_rx.changed() => {}
                    }
                }
                Err(e) => {
                    drop(permit);
                    error!("Failed to claim task: {}", e);
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }

        // Wait for in-flight slots to drain.
        let _ = slots.acquire_many(self.config.concurrency as u32).await;
        info!(worker_id = %self.worker_id, "Worker stopped");
        Ok(())
    }
}

struct SlotContext {
    db: Database,
    engine: Arc<WorkflowEngine>,
    runner: Arc<JobRunner>,
    config: WorkerConfig,
}

impl SlotContext {
    /// Process one message under the hard slot deadline.
    async fn handle(&self, message: TaskMessageRow) {
        let job_id = message.job_id;
        match tokio::time::timeout(self.config.hard_deadline, self.process(&message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(job_id, "Slot error: {:#}", e);
                self.requeue_or_fail(&message, ErrorCategory::Execution)
                    .await;
            }
            Err(_) => {
                error!(job_id, "Slot exceeded hard deadline, aborting");
                self.requeue_or_fail(&message, ErrorCategory::Timeout).await;
            }
        }
    }

    async fn process(&self, message: &TaskMessageRow) -> Result<()> {
        let Some(job) = self.db.get_job(message.job_id).await? else {
            warn!(job_id = message.job_id, "Job not found for dispatch message");
            self.db.complete_task(message.id).await?;
            return Ok(());
        };

        // At-least-once: redelivery of a terminal job is a no-op claim.
        if job.status().is_terminal() {
            info!(job_id = job.id, status = %job.status, "Ignoring dispatch for terminal job");
            self.db.complete_task(message.id).await?;
            return Ok(());
        }

        // Cancel observed before any execution started.
        if job.status() == JobStatus::Pending && job.cancel_requested {
            let now = Utc::now();
            self.db
                .transition_job(
                    job.id,
                    JobStatus::Pending,
                    JobStatus::Cancelled,
                    JobMutation {
                        log_output: Some("cancelled before execution".to_string()),
                        cancelled_at: Some(now),
                        completed_at: Some(now),
                        ..Default::default()
                    },
                )
                .await?;
            if let Err(e) = self.db.publish_stream_complete(job.id, "cancelled", 0).await {
                warn!(job_id = job.id, "Failed to publish stream completion: {}", e);
            }
            self.db
                .audit(AuditEntry::success("job_cancelled", "automation_job", job.id))
                .await;
            self.db.complete_task(message.id).await?;
            self.notify_engine(&job).await;
            return Ok(());
        }

        let params: DispatchParams = match serde_json::from_value(message.params.clone()) {
            Ok(params) => params,
            Err(e) => {
                error!(job_id = job.id, "Malformed dispatch params: {}", e);
                self.fail_job(&job, ErrorCategory::Validation).await?;
                self.db.complete_task(message.id).await?;
                self.notify_engine(&job).await;
                return Ok(());
            }
        };

        let final_attempt = message.attempt + 1 >= message.max_attempts;
        let attempt_result = tokio::time::timeout(
            self.config.soft_deadline,
            self.runner.run_job(job.clone(), params, final_attempt),
        )
        .await;

        match attempt_result {
            // Soft deadline: the runner future was dropped (subprocess dies
            // with it) - retry unless this was the last attempt.
            Err(_) => {
                error!(job_id = job.id, "Slot exceeded soft deadline");
                if final_attempt {
                    self.fail_job_with_trailer(&job, ErrorCategory::Timeout, "Task exceeded time limit")
                        .await?;
                    self.db.complete_task(message.id).await?;
                    self.notify_engine(&job).await;
                } else {
                    self.db.retry_task(message.id).await?;
                }
                Ok(())
            }
            // Infrastructure error inside the runner (database, scratch
            // files). Retry; dead-letter exhaustion fails the job.
            Ok(Err(e)) => {
                error!(job_id = job.id, "Runner error: {:#}", e);
                match self.db.retry_task(message.id).await? {
                    RetryOutcome::Requeued { attempt, delay_secs } => {
                        info!(job_id = job.id, attempt, delay_secs, "Requeued after runner error");
                    }
                    RetryOutcome::Exhausted => {
                        self.fail_job(&job, ErrorCategory::Execution).await?;
                        self.notify_engine(&job).await;
                    }
                }
                Ok(())
            }
            Ok(Ok(outcome)) => {
                match outcome {
                    RunOutcome::Completed
                    | RunOutcome::Cancelled
                    | RunOutcome::Failed(_) => {
                        self.db.complete_task(message.id).await?;
                        self.notify_engine(&job).await;
                    }
                    RunOutcome::Skipped => {
                        self.db.complete_task(message.id).await?;
                    }
                    RunOutcome::Retry(category) => {
                        match self.db.retry_task(message.id).await? {
                            RetryOutcome::Requeued { attempt, delay_secs } => {
                                info!(
                                    job_id = job.id,
                                    attempt,
                                    delay_secs,
                                    category = %category,
                                    "Requeued after transient failure"
                                );
                            }
                            RetryOutcome::Exhausted => {
                                self.fail_job(&job, category).await?;
                                self.notify_engine(&job).await;
                            }
                        }
                    }
                }
                Ok(())
            }
        }
    }

    /// Best-effort recovery when a slot died mid-flight: reschedule the
    /// message, or fail the job once attempts are gone.
    async fn requeue_or_fail(&self, message: &TaskMessageRow, category: ErrorCategory) {
        match self.db.retry_task(message.id).await {
            Ok(RetryOutcome::Requeued { attempt, delay_secs }) => {
                warn!(job_id = message.job_id, attempt, delay_secs, "Requeued after slot failure");
            }
            Ok(RetryOutcome::Exhausted) => {
                if let Ok(Some(job)) = self.db.get_job(message.job_id).await {
                    if !job.status().is_terminal() {
                        if let Err(e) = self.fail_job(&job, category).await {
                            error!(job_id = job.id, "Failed to fail job: {:#}", e);
                        }
                        self.notify_engine(&job).await;
                    }
                }
            }
            Err(e) => error!(job_id = message.job_id, "Failed to retry message: {:#}", e),
        }
    }

    async fn fail_job(&self, job: &JobRow, category: ErrorCategory) -> Result<()> {
        self.fail_job_with_trailer(job, category, "").await
    }

    async fn fail_job_with_trailer(
        &self,
        job: &JobRow,
        category: ErrorCategory,
        trailer: &str,
    ) -> Result<()> {
        // Re-read for the freshest status and output before the terminal write.
        let Some(current) = self.db.get_job(job.id).await? else {
            return Ok(());
        };
        if current.status().is_terminal() {
            return Ok(());
        }
        let log_output = if trailer.is_empty() {
            None
        } else {
            let existing = current.log_output.clone().unwrap_or_default();
            Some(format!("{}\n\nERROR: {}", existing, trailer))
        };
        self.db
            .transition_job(
                job.id,
                current.status(),
                JobStatus::Failed,
                JobMutation {
                    log_output,
                    error_category: Some(category.to_string()),
                    completed_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;
        if let Err(e) = self
            .db
            .publish_stream_complete(job.id, "failed", current.progress)
            .await
        {
            warn!(job_id = job.id, "Failed to publish stream completion: {}", e);
        }
        self.db
            .audit(
                AuditEntry::success("job_failed", "automation_job", job.id)
                    .with_details(serde_json::json!({ "category": category.to_string() })),
            )
            .await;
        Ok(())
    }

    /// Tell the workflow engine a workflow job reached a terminal state.
    async fn notify_engine(&self, job: &JobRow) {
        if job.workflow_instance_id.is_none() {
            return;
        }
        if let Err(e) = self.engine.on_job_complete(job.id).await {
            error!(job_id = job.id, "Workflow callback failed: {:#}", e);
        }
    }
}
