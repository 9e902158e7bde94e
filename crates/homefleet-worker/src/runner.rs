// Job slot lifecycle: claim-checked job in, terminal state out
//
// One runner invocation per dispatch message. The subprocess is the only
// thing that does real work; everything here is validation, scratch-file
// setup, the stream loop, and careful persistence on every exit path.
//
// Retry reconciliation: a transient failure with attempts remaining leaves
// the job RUNNING and returns `Retry` - the queue redelivers and the next
// attempt re-enters through a RUNNING -> RUNNING start. Only the final
// attempt (or a non-retryable failure) writes a terminal state.

use anyhow::{Context, Result};
use chrono::Utc;
use futures::StreamExt;
use homefleet_contracts::{ErrorCategory, JobStatus};
use homefleet_core::config::{SshConfig, WorkerConfig};
use homefleet_core::validate::{filter_safe_vars, is_safe_action_name};
use homefleet_executors::ansible::{count_playbook_tasks, resolve_action_path};
use homefleet_executors::DispatchParams;
use homefleet_storage::{AuditEntry, Database, JobMutation, JobRow};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::LinesStream;

use crate::classify::classify_failure;
use crate::inventory::{build_targets, cleanup_scratch, write_inventory, write_vars_file};
use crate::stream::LineProcessor;

/// Grace period between SIGTERM and SIGKILL.
const TERMINATION_GRACE: Duration = Duration::from_secs(5);

/// Runner argv timeout passed to the configuration tool itself.
const RUNNER_CONNECT_TIMEOUT_SECS: &str = "300";

/// How one attempt ended. Terminal variants are already persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed,
    Cancelled,
    /// Terminal failure, persisted with this category.
    Failed(ErrorCategory),
    /// Transient failure with attempts remaining; job left RUNNING.
    Retry(ErrorCategory),
    /// Stale claim (job advanced elsewhere); nothing was done.
    Skipped,
}

pub struct JobRunner {
    db: Database,
    playbook_dir: PathBuf,
    ssh: SshConfig,
    worker: WorkerConfig,
}

impl JobRunner {
    pub fn new(db: Database, playbook_dir: PathBuf, ssh: SshConfig, worker: WorkerConfig) -> Self {
        Self {
            db,
            playbook_dir,
            ssh,
            worker,
        }
    }

    /// Run one attempt for a claimed job.
    pub async fn run_job(
        &self,
        job: JobRow,
        params: DispatchParams,
        final_attempt: bool,
    ) -> Result<RunOutcome> {
        // Start (or re-start on a retry): counters reset, stream announces.
        let start = match job.status() {
            JobStatus::Pending => {
                self.db
                    .transition_job(
                        job.id,
                        JobStatus::Pending,
                        JobStatus::Running,
                        JobMutation {
                            started_at: Some(Utc::now()),
                            progress: Some(0),
                            tasks_completed: Some(0),
                            ..Default::default()
                        },
                    )
                    .await?
            }
            JobStatus::Running => {
                self.db
                    .transition_job(
                        job.id,
                        JobStatus::Running,
                        JobStatus::Running,
                        JobMutation {
                            progress: Some(0),
                            tasks_completed: Some(0),
                            ..Default::default()
                        },
                    )
                    .await?
            }
            _ => None,
        };
        let Some(job) = start else {
            return Ok(RunOutcome::Skipped);
        };

        self.db
            .audit(AuditEntry::success("job_started", "automation_job", job.id))
            .await;
        if let Err(e) = self.db.publish_job_status(job.id, "running", 0).await {
            tracing::warn!(job_id = job.id, "Failed to publish status event: {}", e);
        }

        // Validate and materialize the action. Validation-class failures are
        // terminal regardless of remaining attempts.
        if !is_safe_action_name(&params.action_name) {
            return self
                .fail_terminal(
                    &job,
                    ErrorCategory::Validation,
                    &format!("Invalid action name: {}", params.action_name),
                )
                .await;
        }
        let Some(playbook_path) = resolve_action_path(&self.playbook_dir, &params.action_name)
        else {
            return self
                .fail_terminal(
                    &job,
                    ErrorCategory::NotFound,
                    &format!("Action not found: {}", params.action_name),
                )
                .await;
        };
        let playbook_content = match tokio::fs::read_to_string(&playbook_path).await {
            Ok(content) => content,
            Err(e) => {
                return self
                    .fail_terminal(
                        &job,
                        ErrorCategory::NotFound,
                        &format!("Failed to read action file: {}", e),
                    )
                    .await;
            }
        };
        let task_count = count_playbook_tasks(&playbook_content);
        self.db
            .transition_job(
                job.id,
                JobStatus::Running,
                JobStatus::Running,
                JobMutation {
                    task_count: Some(task_count),
                    ..Default::default()
                },
            )
            .await?;

        // Inventory targets: parse-validated IPs, sanitized names.
        let targets = match build_targets(&params) {
            Ok(targets) => targets,
            Err(message) => {
                return self
                    .fail_terminal(&job, ErrorCategory::Validation, &message)
                    .await;
            }
        };
        let inventory_path = write_inventory(job.id, &targets, &self.ssh)?;

        // Variables were merged at dispatch; the worker's job is the safety
        // filter and the scratch file.
        let safe_vars: Map<String, Value> = params
            .extra_vars
            .as_ref()
            .and_then(|v| v.as_object())
            .map(filter_safe_vars)
            .unwrap_or_default();
        let vars_path = match write_vars_file(job.id, &safe_vars) {
            Ok(path) => path,
            Err(e) => {
                cleanup_scratch(inventory_path, "inventory");
                return Err(e);
            }
        };

        let outcome = self
            .execute_runner(
                &job,
                &params,
                &playbook_path,
                inventory_path.to_str().unwrap_or_default(),
                vars_path.as_ref().and_then(|p| p.to_str()),
                task_count,
                final_attempt,
            )
            .await;

        // Scratch files go on every exit path; unlink errors only warn.
        cleanup_scratch(inventory_path, "inventory");
        if let Some(path) = vars_path {
            cleanup_scratch(path, "vars");
        }

        outcome
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_runner(
        &self,
        job: &JobRow,
        params: &DispatchParams,
        playbook_path: &std::path::Path,
        inventory_path: &str,
        vars_path: Option<&str>,
        task_count: i32,
        final_attempt: bool,
    ) -> Result<RunOutcome> {
        // Fixed argument vector, no shell interposed.
        let mut cmd = Command::new("ansible-playbook");
        cmd.arg(playbook_path)
            .arg("-i")
            .arg(inventory_path)
            .arg("--timeout")
            .arg(RUNNER_CONNECT_TIMEOUT_SECS);
        if let Some(vars) = vars_path {
            cmd.arg("--extra-vars").arg(format!("@{}", vars));
        }
        if let Some(password) = &params.vault_password {
            // Subprocess parameter only - never argv, never persisted.
            cmd.env("ANSIBLE_VAULT_PASSWORD", password);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::info!(
            job_id = job.id,
            action = %params.action_name,
            "Spawning configuration runner"
        );

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let mut processor = LineProcessor::new(task_count);
                processor.append_error(&format!("Failed to spawn runner: {}", e));
                return self
                    .settle_failure(job, processor, ErrorCategory::Execution, final_attempt)
                    .await;
            }
        };

        let stdout = child
            .stdout
            .take()
            .context("runner stdout not captured")?;
        let stderr = child
            .stderr
            .take()
            .context("runner stderr not captured")?;
        // Stderr is merged into the stdout line stream.
        let mut lines = futures::stream::select(
            LinesStream::new(BufReader::new(stdout).lines()),
            LinesStream::new(BufReader::new(stderr).lines()),
        );

        let mut processor = LineProcessor::new(task_count);
        let mut cancelled = false;
        let mut timed_out = false;

        // Subprocess wall-clock ceiling, measured from spawn.
        let deadline = tokio::time::Instant::now() + self.worker.subprocess_timeout;

        // Idle cancellation poll, roughly once a second when no output flows.
        let mut idle_poll = tokio::time::interval(Duration::from_secs(1));
        idle_poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                maybe_line = lines.next() => {
                    let Some(read) = maybe_line else { break };
                    let line = match read {
                        Ok(line) => line,
                        Err(e) => {
                            tracing::warn!(job_id = job.id, "Output read error: {}", e);
                            continue;
                        }
                    };
                    let update = processor.process_line(&line);
                    if let Err(e) = self.db.publish_job_line(job.id, &update.line).await {
                        tracing::warn!(job_id = job.id, "Failed to publish log line: {}", e);
                    }
                    if let Some((progress, tasks_completed)) = update.persist_progress {
                        self.db
                            .transition_job(
                                job.id,
                                JobStatus::Running,
                                JobStatus::Running,
                                JobMutation {
                                    progress: Some(progress),
                                    tasks_completed: Some(tasks_completed),
                                    ..Default::default()
                                },
                            )
                            .await?;
                    }
                    if update.check_cancel && self.cancel_requested(job.id).await? {
                        cancelled = true;
                        break;
                    }
                }
                _ = idle_poll.tick() => {
                    if tokio::time::Instant::now() >= deadline {
                        timed_out = true;
                        break;
                    }
                    if self.cancel_requested(job.id).await? {
                        cancelled = true;
                        break;
                    }
                }
            }
        }

        if timed_out {
            tracing::error!(job_id = job.id, "Runner exceeded subprocess timeout");
            terminate_subprocess(&mut child).await;
            processor.append_error("Execution timed out");
            return self
                .settle_failure(job, processor, ErrorCategory::Timeout, final_attempt)
                .await;
        }

        if cancelled {
            tracing::info!(job_id = job.id, "Cancellation observed, terminating runner");
            terminate_subprocess(&mut child).await;
            return self.settle_cancelled(job, processor).await;
        }

        // Reap within what remains of the subprocess wall-clock ceiling.
        match tokio::time::timeout_at(deadline, child.wait()).await {
            Err(_) => {
                tracing::error!(job_id = job.id, "Runner exceeded subprocess timeout");
                terminate_subprocess(&mut child).await;
                processor.append_error("Execution timed out");
                self.settle_failure(job, processor, ErrorCategory::Timeout, final_attempt)
                    .await
            }
            Ok(Err(e)) => {
                processor.append_error(&format!("Failed to reap runner: {}", e));
                self.settle_failure(job, processor, ErrorCategory::Execution, final_attempt)
                    .await
            }
            Ok(Ok(exit)) => {
                if exit.success() {
                    self.settle_completed(job, processor).await
                } else {
                    let category = classify_failure(&processor.output_snapshot());
                    tracing::error!(
                        job_id = job.id,
                        code = exit.code().unwrap_or(-1),
                        category = %category,
                        "Runner exited nonzero"
                    );
                    self.settle_failure(job, processor, category, final_attempt)
                        .await
                }
            }
        }
    }

    async fn cancel_requested(&self, job_id: i64) -> Result<bool> {
        Ok(self
            .db
            .get_job(job_id)
            .await?
            .map(|j| j.cancel_requested)
            .unwrap_or(false))
    }

    async fn settle_completed(&self, job: &JobRow, processor: LineProcessor) -> Result<RunOutcome> {
        let tasks_completed = processor.tasks_completed();
        let output = processor.into_output();
        self.db
            .transition_job(
                job.id,
                JobStatus::Running,
                JobStatus::Completed,
                JobMutation {
                    progress: Some(100),
                    tasks_completed: Some(tasks_completed),
                    log_output: Some(output),
                    completed_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;
        self.finish_stream(job.id, "completed", 100).await;
        self.db
            .audit(AuditEntry::success("job_completed", "automation_job", job.id))
            .await;
        tracing::info!(job_id = job.id, "Job completed");
        Ok(RunOutcome::Completed)
    }

    async fn settle_cancelled(&self, job: &JobRow, processor: LineProcessor) -> Result<RunOutcome> {
        let progress = processor.progress();
        let output = processor.into_output();
        let now = Utc::now();
        self.db
            .transition_job(
                job.id,
                JobStatus::Running,
                JobStatus::Cancelled,
                JobMutation {
                    log_output: Some(output),
                    cancelled_at: Some(now),
                    completed_at: Some(now),
                    ..Default::default()
                },
            )
            .await?;
        self.finish_stream(job.id, "cancelled", progress).await;
        self.db
            .audit(AuditEntry::success("job_cancelled", "automation_job", job.id))
            .await;
        tracing::info!(job_id = job.id, "Job cancelled");
        Ok(RunOutcome::Cancelled)
    }

    /// Persist a failure. Retryable categories with attempts remaining keep
    /// the job RUNNING and hand the decision back to the queue.
    async fn settle_failure(
        &self,
        job: &JobRow,
        processor: LineProcessor,
        category: ErrorCategory,
        final_attempt: bool,
    ) -> Result<RunOutcome> {
        let progress = processor.progress();
        let output = processor.into_output();

        if category.is_retryable() && !final_attempt {
            self.db
                .transition_job(
                    job.id,
                    JobStatus::Running,
                    JobStatus::Running,
                    JobMutation {
                        log_output: Some(output),
                        ..Default::default()
                    },
                )
                .await?;
            tracing::warn!(job_id = job.id, category = %category, "Attempt failed, retrying");
            return Ok(RunOutcome::Retry(category));
        }

        self.db
            .transition_job(
                job.id,
                JobStatus::Running,
                JobStatus::Failed,
                JobMutation {
                    log_output: Some(output),
                    error_category: Some(category.to_string()),
                    completed_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;
        self.finish_stream(job.id, "failed", progress).await;
        self.db
            .audit(
                AuditEntry::success("job_failed", "automation_job", job.id)
                    .with_details(serde_json::json!({ "category": category.to_string() })),
            )
            .await;
        Ok(RunOutcome::Failed(category))
    }

    /// Terminal validation-class failure before any subprocess ran.
    async fn fail_terminal(
        &self,
        job: &JobRow,
        category: ErrorCategory,
        message: &str,
    ) -> Result<RunOutcome> {
        let mut processor = LineProcessor::new(1);
        processor.append_error(message);
        let output = processor.into_output();

        if let Err(e) = self.db.publish_job_line(job.id, output.trim_start()).await {
            tracing::warn!(job_id = job.id, "Failed to publish error line: {}", e);
        }
        self.db
            .transition_job(
                job.id,
                JobStatus::Running,
                JobStatus::Failed,
                JobMutation {
                    log_output: Some(output),
                    error_category: Some(category.to_string()),
                    completed_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;
        self.finish_stream(job.id, "failed", 0).await;
        self.db
            .audit(
                AuditEntry::success("job_failed", "automation_job", job.id)
                    .with_details(serde_json::json!({ "category": category.to_string() })),
            )
            .await;
        tracing::error!(job_id = job.id, category = %category, "{}", message);
        Ok(RunOutcome::Failed(category))
    }

    async fn finish_stream(&self, job_id: i64, status: &str, progress: i32) {
        if let Err(e) = self.db.publish_stream_complete(job_id, status, progress).await {
            tracing::warn!(job_id, "Failed to publish stream completion: {}", e);
        }
    }
}

/// SIGTERM, up to five seconds of grace, then SIGKILL.
pub async fn terminate_subprocess(child: &mut Child) {
    if let Some(pid) = child.id() {
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        if tokio::time::timeout(TERMINATION_GRACE, child.wait())
            .await
            .is_ok()
        {
            return;
        }
        tracing::warn!(pid, "Runner ignored SIGTERM, sending SIGKILL");
    }
    let _ = child.kill().await;
    let _ = child.wait().await;
}
