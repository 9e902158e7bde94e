// Workflow engine for multi-step automation

pub mod engine;
pub mod plan;

pub use engine::{EngineError, WorkflowEngine};
