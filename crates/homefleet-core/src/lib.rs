// Core runtime for the automation subsystem
// Decision: collaborators (vault, config slices) are handed to components by
//           explicit constructor injection - no process-global singletons.

pub mod config;
pub mod redact;
pub mod validate;
pub mod vault;

pub use config::{AppConfig, SshConfig, VaultConfig, WorkerConfig};
pub use redact::{clip_output, redact_sensitive, MAX_LOG_OUTPUT, TRUNCATION_MARKER};
pub use vault::{Vault, VaultError};
