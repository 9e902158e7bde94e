// Job log stream events
//
// Each job has one event channel identified by its id. Subscribers observe
// log lines in emission order; the `complete` event carries the sentinel
// after which no further lines arrive for that job.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// End-of-stream sentinel published as the payload of the `complete` event.
pub const STREAM_COMPLETE: &str = "[[STREAM_COMPLETE]]";

/// Event types carried on a job's log channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobStreamEvent {
    /// JSON `{"status": …, "progress": …}` emitted at stream start.
    Status,
    /// One redacted output line.
    Log,
    /// The `[[STREAM_COMPLETE]]` sentinel.
    Complete,
}

impl JobStreamEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStreamEvent::Status => "status",
            JobStreamEvent::Log => "log",
            JobStreamEvent::Complete => "complete",
        }
    }
}

impl From<&str> for JobStreamEvent {
    fn from(s: &str) -> Self {
        match s {
            "status" => JobStreamEvent::Status,
            "complete" => JobStreamEvent::Complete,
            _ => JobStreamEvent::Log,
        }
    }
}

/// Payload of the `status` event.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StatusPayload {
    pub status: String,
    pub progress: i32,
}
