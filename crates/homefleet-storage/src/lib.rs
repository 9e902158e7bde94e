// Storage layer for the automation subsystem

pub mod audit;
pub mod log_stream;
pub mod models;
pub mod queue;
pub mod repositories;

pub use models::*;
pub use queue::{backoff_delay, RetryOutcome};
pub use repositories::Database;
