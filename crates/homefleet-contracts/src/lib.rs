// Public API contracts for Homefleet

pub mod common;
pub mod events;
pub mod executor;
pub mod job;
pub mod vault;
pub mod workflow;

pub use common::ListResponse;
pub use events::{JobStreamEvent, StatusPayload, STREAM_COMPLETE};
pub use executor::{ActionInfo, ExecutorInfo};
pub use job::{ErrorCategory, Job, JobStatus};
pub use vault::VaultSecret;
pub use workflow::{WorkflowInstance, WorkflowStatus, WorkflowStep, WorkflowTemplate};
