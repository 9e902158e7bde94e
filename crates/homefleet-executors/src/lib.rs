// Executor plugins for the automation subsystem

pub mod ansible;
pub mod registry;
pub mod traits;

pub use ansible::AnsibleExecutor;
pub use registry::ExecutorRegistry;
pub use traits::{DispatchParams, ExecuteRequest, Executor, TargetDevice};
