// Executor plugin contract
// Decision: a fixed capability surface behind a trait object - the plugin set
//           is closed and assembled at startup, no runtime discovery.

use anyhow::Result;
use async_trait::async_trait;
use homefleet_contracts::{ActionInfo, ExecutorInfo};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One target host for an execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetDevice {
    pub ip: String,
    pub name: String,
}

/// Everything a plugin needs to dispatch one job.
#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    pub job_id: i64,
    pub primary_ip: String,
    pub primary_name: String,
    pub action_name: String,
    pub config: Option<serde_json::Value>,
    pub extra_vars: Option<serde_json::Value>,
    /// Present only for multi-target jobs; includes the primary.
    pub devices: Option<Vec<TargetDevice>>,
    /// Decrypted in memory at dispatch; travels only through the queue
    /// message and the worker slot, never the job record.
    pub vault_password: Option<String>,
}

/// The queue message payload a worker slot deserializes.
/// Serializable primitives only: ids, strings, maps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchParams {
    pub device_ip: String,
    pub device_name: String,
    pub action_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_vars: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub devices: Option<Vec<TargetDevice>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vault_password: Option<String>,
}

/// An automation backend. Implementations describe their action catalog and
/// enqueue dispatch messages; the worker runtime owns the subprocess.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Stable string identifier, e.g. `ansible`.
    fn executor_type(&self) -> &'static str;

    fn display_name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn info(&self) -> ExecutorInfo {
        ExecutorInfo {
            executor_type: self.executor_type().to_string(),
            display_name: self.display_name().to_string(),
            description: self.description().to_string(),
        }
    }

    /// Finite catalog discovered from the local action directory.
    async fn list_actions(&self) -> Result<Vec<ActionInfo>>;

    /// True iff the action exists, its name is safe, and its resolved path
    /// stays inside the configured action directory.
    async fn validate(&self, action_name: &str, config: Option<&serde_json::Value>) -> bool;

    /// JSON-Schema-shaped description of the action's extra_vars, if any.
    async fn action_schema(&self, action_name: &str) -> Option<serde_json::Value>;

    /// Enqueue a worker task; returns the queue message id as the handle
    /// used to correlate results.
    async fn execute(&self, request: ExecuteRequest) -> Result<Uuid>;
}
