// Ansible playbook executor
//
// Catalog discovery and path safety live here; execution is a queue dispatch.
// Playbook names cross into filesystem paths, so every entry point re-checks
// the safe-name rule and the canonicalized prefix before touching a file.

use anyhow::{Context, Result};
use async_trait::async_trait;
use homefleet_contracts::ActionInfo;
use homefleet_core::validate::is_safe_action_name;
use homefleet_storage::{CreateTaskMessage, Database};
use serde_yaml::Value as YamlValue;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::traits::{DispatchParams, ExecuteRequest, Executor};

const PLAYBOOK_EXTENSION: &str = "yml";

/// Resolve an action name to its playbook path, or `None` when the name is
/// unsafe, the resolved path escapes the playbook directory (symlinks
/// included), or the file does not exist.
pub fn resolve_action_path(playbooks_dir: &Path, action_name: &str) -> Option<PathBuf> {
    if !is_safe_action_name(action_name) {
        return None;
    }
    let candidate = playbooks_dir.join(format!("{}.{}", action_name, PLAYBOOK_EXTENSION));
    // canonicalize fails on missing files, which also covers the existence
    // check; it resolves symlinks, which is what the prefix match guards.
    let resolved = candidate.canonicalize().ok()?;
    let resolved_dir = playbooks_dir.canonicalize().ok()?;
    if !resolved.starts_with(&resolved_dir) {
        return None;
    }
    Some(resolved)
}

/// Human-readable name from a playbook stem: `update_web` -> `Update Web`.
pub fn display_name_for(stem: &str) -> String {
    stem.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Extract a description from the head of a playbook: a `# Description:`
/// comment wins, then the first play name.
pub fn extract_description(content: &str, stem: &str) -> String {
    let head: String = content.chars().take(500).collect();
    for line in head.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("# Description:") {
            return rest.trim().to_string();
        }
        if let Some(idx) = trimmed.find("- name:") {
            let rest = &trimmed[idx + "- name:".len()..];
            if !rest.trim().is_empty() {
                return rest.trim().to_string();
            }
        }
    }
    format!("Execute {} playbook", stem)
}

/// Estimate the number of step-like items a playbook will run: entries under
/// `tasks`, `pre_tasks`, `post_tasks`, and `roles` across all plays.
/// Always at least 1 so progress arithmetic never divides by zero.
pub fn count_playbook_tasks(content: &str) -> i32 {
    let parsed: Result<YamlValue, _> = serde_yaml::from_str(content);
    let mut count = 0usize;
    if let Ok(YamlValue::Sequence(plays)) = parsed {
        for play in plays {
            if let YamlValue::Mapping(map) = play {
                for key in ["tasks", "pre_tasks", "post_tasks", "roles"] {
                    if let Some(YamlValue::Sequence(items)) = map.get(key) {
                        count += items.len();
                    }
                }
            }
        }
    }
    count.max(1) as i32
}

/// Scan a playbook directory into an action catalog, sorted by name.
pub fn list_playbooks(playbooks_dir: &Path) -> Result<Vec<ActionInfo>> {
    let mut actions = Vec::new();
    if !playbooks_dir.exists() {
        return Ok(actions);
    }
    for entry in std::fs::read_dir(playbooks_dir)
        .with_context(|| format!("Failed to read playbook directory {:?}", playbooks_dir))?
    {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(PLAYBOOK_EXTENSION) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if !is_safe_action_name(stem) {
            continue;
        }
        let content = std::fs::read_to_string(&path).unwrap_or_default();
        let config_schema = read_schema(playbooks_dir, stem);
        actions.push(ActionInfo {
            name: stem.to_string(),
            display_name: display_name_for(stem),
            description: extract_description(&content, stem),
            config_schema,
        });
    }
    actions.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(actions)
}

fn read_schema(playbooks_dir: &Path, stem: &str) -> Option<serde_json::Value> {
    let schema_path = playbooks_dir.join(format!("{}.schema.json", stem));
    let content = std::fs::read_to_string(schema_path).ok()?;
    serde_json::from_str(&content).ok()
}

/// Execute Ansible playbooks for configuration management.
pub struct AnsibleExecutor {
    playbooks_dir: PathBuf,
    db: Database,
}

impl AnsibleExecutor {
    pub fn new(playbooks_dir: impl Into<PathBuf>, db: Database) -> Self {
        Self {
            playbooks_dir: playbooks_dir.into(),
            db,
        }
    }

    pub fn playbooks_dir(&self) -> &Path {
        &self.playbooks_dir
    }
}

#[async_trait]
impl Executor for AnsibleExecutor {
    fn executor_type(&self) -> &'static str {
        "ansible"
    }

    fn display_name(&self) -> &'static str {
        "Ansible"
    }

    fn description(&self) -> &'static str {
        "Execute Ansible playbooks for configuration management"
    }

    async fn list_actions(&self) -> Result<Vec<ActionInfo>> {
        let dir = self.playbooks_dir.clone();
        tokio::task::spawn_blocking(move || list_playbooks(&dir)).await?
    }

    async fn validate(&self, action_name: &str, _config: Option<&serde_json::Value>) -> bool {
        resolve_action_path(&self.playbooks_dir, action_name).is_some()
    }

    async fn action_schema(&self, action_name: &str) -> Option<serde_json::Value> {
        let resolved = resolve_action_path(&self.playbooks_dir, action_name)?;
        let stem = resolved.file_stem()?.to_str()?;
        read_schema(&self.playbooks_dir, stem)
    }

    async fn execute(&self, request: ExecuteRequest) -> Result<Uuid> {
        let params = DispatchParams {
            device_ip: request.primary_ip,
            device_name: request.primary_name,
            action_name: request.action_name,
            config: request.config,
            extra_vars: request.extra_vars,
            devices: request.devices,
            vault_password: request.vault_password,
        };

        let message = self
            .db
            .enqueue_task(CreateTaskMessage {
                job_id: request.job_id,
                executor_type: self.executor_type().to_string(),
                params: serde_json::to_value(&params)?,
            })
            .await
            .context("Failed to enqueue dispatch message")?;

        tracing::info!(
            job_id = request.job_id,
            task_id = %message.id,
            "Enqueued ansible dispatch"
        );
        Ok(message.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn playbook_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("ping.yml"),
            "# Description: Check connectivity\n- hosts: homelab\n  tasks:\n    - name: ping\n      ansible.builtin.ping:\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("update_web.yml"),
            "- name: Update web tier\n  hosts: homelab\n  tasks:\n    - name: one\n      debug:\n    - name: two\n      debug:\n",
        )
        .unwrap();
        dir
    }

    #[test]
    fn resolves_existing_playbook() {
        let dir = playbook_dir();
        let path = resolve_action_path(dir.path(), "ping").unwrap();
        assert!(path.ends_with("ping.yml"));
    }

    #[test]
    fn rejects_traversal_names() {
        let dir = playbook_dir();
        assert!(resolve_action_path(dir.path(), "../etc/passwd").is_none());
        assert!(resolve_action_path(dir.path(), "ping; rm -rf /").is_none());
        assert!(resolve_action_path(dir.path(), "").is_none());
    }

    #[test]
    fn rejects_missing_playbook() {
        let dir = playbook_dir();
        assert!(resolve_action_path(dir.path(), "nonexistent").is_none());
    }

    #[test]
    fn rejects_symlink_escape() {
        let dir = playbook_dir();
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("evil.yml"), "- hosts: all\n").unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("evil.yml"),
            dir.path().join("linked.yml"),
        )
        .unwrap();
        // The name is safe and the file exists, but it resolves outside.
        assert!(resolve_action_path(dir.path(), "linked").is_none());
    }

    #[test]
    fn catalog_lists_sorted_with_descriptions() {
        let dir = playbook_dir();
        let actions = list_playbooks(dir.path()).unwrap();
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].name, "ping");
        assert_eq!(actions[0].description, "Check connectivity");
        assert_eq!(actions[1].name, "update_web");
        assert_eq!(actions[1].display_name, "Update Web");
        assert_eq!(actions[1].description, "Update web tier");
    }

    #[test]
    fn catalog_skips_non_playbooks() {
        let dir = playbook_dir();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();
        fs::write(dir.path().join("bad name.yml"), "x").unwrap();
        let actions = list_playbooks(dir.path()).unwrap();
        assert_eq!(actions.len(), 2);
    }

    #[test]
    fn missing_dir_is_empty_catalog() {
        let actions = list_playbooks(Path::new("/nonexistent/playbooks")).unwrap();
        assert!(actions.is_empty());
    }

    #[test]
    fn schema_sidecar_is_attached() {
        let dir = playbook_dir();
        fs::write(
            dir.path().join("ping.schema.json"),
            r#"{"type": "object", "properties": {"count": {"type": "integer"}}}"#,
        )
        .unwrap();
        let actions = list_playbooks(dir.path()).unwrap();
        let ping = actions.iter().find(|a| a.name == "ping").unwrap();
        assert!(ping.config_schema.is_some());
        assert!(actions.iter().any(|a| a.config_schema.is_none()));
    }

    #[test]
    fn task_count_sums_across_plays() {
        let content = r#"
- hosts: web
  pre_tasks:
    - name: a
      debug:
  tasks:
    - name: b
      debug:
    - name: c
      debug:
- hosts: db
  tasks:
    - name: d
      debug:
  post_tasks:
    - name: e
      debug:
"#;
        assert_eq!(count_playbook_tasks(content), 5);
    }

    #[test]
    fn task_count_has_floor_of_one() {
        assert_eq!(count_playbook_tasks(""), 1);
        assert_eq!(count_playbook_tasks("not: a playbook"), 1);
        assert_eq!(count_playbook_tasks("- hosts: all\n"), 1);
    }

    #[test]
    fn task_count_includes_roles() {
        let content = "- hosts: all\n  roles:\n    - common\n    - web\n";
        assert_eq!(count_playbook_tasks(content), 2);
    }

    #[test]
    fn description_falls_back_to_stem() {
        assert_eq!(
            extract_description("---\n- hosts: all\n", "reboot"),
            "Execute reboot playbook"
        );
    }

    #[test]
    fn display_names() {
        assert_eq!(display_name_for("ping"), "Ping");
        assert_eq!(display_name_for("update_web_servers"), "Update Web Servers");
    }
}
