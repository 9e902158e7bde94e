// Executor registry
// Decision: a plain map assembled once at startup from the static plugin
//           list; lookup is pure. No global registry, no runtime reflection.

use homefleet_contracts::ExecutorInfo;
use homefleet_storage::Database;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::ansible::AnsibleExecutor;
use crate::traits::Executor;

#[derive(Clone)]
pub struct ExecutorRegistry {
    executors: HashMap<&'static str, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    /// Build the registry with all built-in plugins.
    pub fn with_builtins(db: Database, playbooks_dir: &Path) -> Self {
        let mut executors: HashMap<&'static str, Arc<dyn Executor>> = HashMap::new();
        let ansible = Arc::new(AnsibleExecutor::new(playbooks_dir, db));
        executors.insert(ansible.executor_type(), ansible);
        Self { executors }
    }

    /// Build an empty registry (tests compose their own plugin set).
    pub fn empty() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    pub fn register(&mut self, executor: Arc<dyn Executor>) {
        self.executors.insert(executor.executor_type(), executor);
    }

    pub fn get(&self, executor_type: &str) -> Option<Arc<dyn Executor>> {
        self.executors.get(executor_type).cloned()
    }

    pub fn contains(&self, executor_type: &str) -> bool {
        self.executors.contains_key(executor_type)
    }

    /// Catalog of registered executors, stable order.
    pub fn list(&self) -> Vec<ExecutorInfo> {
        let mut infos: Vec<ExecutorInfo> = self.executors.values().map(|e| e.info()).collect();
        infos.sort_by(|a, b| a.executor_type.cmp(&b.executor_type));
        infos
    }
}
