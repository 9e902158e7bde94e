// Application configuration, loaded once at startup
//
// Decision: one explicitly-typed record validated up front; downstream
// components receive only the slice they need (SshConfig, WorkerConfig, ...).

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::validate::sanitize_inventory_value;

/// SSH parameters applied to every generated inventory.
#[derive(Debug, Clone)]
pub struct SshConfig {
    pub user: String,
    /// StrictHostKeyChecking policy; `accept-new` unless overridden.
    pub host_key_checking: String,
    pub identity_file: Option<PathBuf>,
}

/// Vault cipher configuration.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    pub encryption_key: String,
}

/// Worker slot limits and deadlines.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub poll_interval: Duration,
    /// Wall-clock ceiling on the runner subprocess itself.
    pub subprocess_timeout: Duration,
    /// Soft slot deadline; exceeding it surfaces a retryable timeout.
    pub soft_deadline: Duration,
    /// Hard slot deadline; exceeding it aborts the slot.
    pub hard_deadline: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval: Duration::from_millis(500),
            subprocess_timeout: Duration::from_secs(500),
            soft_deadline: Duration::from_secs(540),
            hard_deadline: Duration::from_secs(600),
        }
    }
}

/// Top-level configuration record.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub bind_addr: String,
    pub playbook_dir: PathBuf,
    pub ssh: SshConfig,
    pub vault: VaultConfig,
    pub worker: WorkerConfig,
}

impl AppConfig {
    /// Load and validate configuration from the environment.
    pub fn from_env() -> Result<Self> {
        let database_url =
            std::env::var("DATABASE_URL").context("DATABASE_URL environment variable required")?;

        let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:9000".to_string());

        let playbook_dir = PathBuf::from(
            std::env::var("PLAYBOOK_DIR").unwrap_or_else(|_| "ansible/playbooks".to_string()),
        );

        let ssh = SshConfig {
            user: sanitize_inventory_value(
                &std::env::var("ANSIBLE_USER").unwrap_or_else(|_| "ansible".to_string()),
            ),
            host_key_checking: sanitize_inventory_value(
                &std::env::var("ANSIBLE_HOST_KEY_CHECKING")
                    .unwrap_or_else(|_| "accept-new".to_string()),
            ),
            identity_file: std::env::var("ANSIBLE_SSH_KEY").ok().map(PathBuf::from),
        };

        let vault = VaultConfig {
            encryption_key: std::env::var("VAULT_ENCRYPTION_KEY")
                .context("VAULT_ENCRYPTION_KEY environment variable required")?,
        };

        let concurrency: usize = std::env::var("WORKER_CONCURRENCY")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("WORKER_CONCURRENCY must be an integer")?
            .unwrap_or(4);
        if concurrency == 0 {
            anyhow::bail!("WORKER_CONCURRENCY must be at least 1");
        }

        let poll_interval_ms: u64 = std::env::var("WORKER_POLL_INTERVAL_MS")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("WORKER_POLL_INTERVAL_MS must be an integer")?
            .unwrap_or(500);

        let worker = WorkerConfig {
            concurrency,
            poll_interval: Duration::from_millis(poll_interval_ms),
            ..WorkerConfig::default()
        };

        Ok(Self {
            database_url,
            bind_addr,
            playbook_dir,
            ssh,
            vault,
            worker,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_defaults_match_deadline_ladder() {
        let w = WorkerConfig::default();
        assert!(w.subprocess_timeout < w.soft_deadline);
        assert!(w.soft_deadline < w.hard_deadline);
        assert_eq!(w.subprocess_timeout, Duration::from_secs(500));
        assert_eq!(w.soft_deadline, Duration::from_secs(540));
        assert_eq!(w.hard_deadline, Duration::from_secs(600));
    }
}
