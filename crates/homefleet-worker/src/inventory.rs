// Per-job inventory and vars scratch files
//
// Inventory values cross into a file the runner parses, so names are
// sanitized and IPs parse-validated before rendering. Files are created with
// unpredictable names and 0600 permissions (tempfile's default on unix) and
// unlinked on drop; unlink failures are logged, never fatal.

use anyhow::{Context, Result};
use homefleet_core::config::SshConfig;
use homefleet_core::validate::{
    fallback_device_name, is_safe_action_name, sanitize_inventory_value, validate_ip,
};
use homefleet_executors::DispatchParams;
use serde_json::{Map, Value};
use std::io::Write;
use tempfile::TempPath;

/// One validated inventory target.
#[derive(Debug, Clone, PartialEq)]
pub struct InventoryTarget {
    pub name: String,
    pub ip: String,
}

/// Validate and sanitize the dispatch targets. The primary device comes
/// first; `devices` (when present for multi-target jobs) replaces it.
pub fn build_targets(params: &DispatchParams) -> Result<Vec<InventoryTarget>, String> {
    let raw: Vec<(String, String)> = match &params.devices {
        Some(devices) if !devices.is_empty() => devices
            .iter()
            .map(|d| (d.ip.clone(), d.name.clone()))
            .collect(),
        _ => vec![(params.device_ip.clone(), params.device_name.clone())],
    };

    let mut targets = Vec::with_capacity(raw.len());
    for (ip, name) in raw {
        let safe_ip = validate_ip(&ip)?;
        let mut safe_name = sanitize_inventory_value(&name);
        if !is_safe_action_name(&safe_name) {
            safe_name = fallback_device_name(&safe_name);
        }
        targets.push(InventoryTarget {
            name: safe_name,
            ip: safe_ip,
        });
    }
    Ok(targets)
}

/// Render the INI inventory with a single `[homelab]` group.
pub fn render_inventory(targets: &[InventoryTarget], ssh: &SshConfig) -> String {
    let mut ssh_args = format!("-o StrictHostKeyChecking={}", ssh.host_key_checking);
    if let Some(identity) = &ssh.identity_file {
        ssh_args.push_str(&format!(" -o IdentityFile={}", identity.display()));
    }

    let mut out = String::from("[homelab]\n");
    for target in targets {
        out.push_str(&format!(
            "{} ansible_host={} ansible_user={} ansible_ssh_common_args='{}'\n",
            target.name, target.ip, ssh.user, ssh_args
        ));
    }
    out.push_str("\n[all:vars]\nansible_python_interpreter=/usr/bin/python3\n");
    out
}

/// Write content to a secure scratch file and return its self-unlinking path.
pub fn write_scratch_file(prefix: &str, suffix: &str, content: &str) -> Result<TempPath> {
    let mut file = tempfile::Builder::new()
        .prefix(prefix)
        .suffix(suffix)
        .tempfile()
        .context("Failed to create scratch file")?;
    file.write_all(content.as_bytes())
        .context("Failed to write scratch file")?;
    file.flush()?;
    Ok(file.into_temp_path())
}

/// Write the per-job inventory file.
pub fn write_inventory(
    job_id: i64,
    targets: &[InventoryTarget],
    ssh: &SshConfig,
) -> Result<TempPath> {
    let content = render_inventory(targets, ssh);
    write_scratch_file(&format!("ansible_inv_{}_", job_id), ".ini", &content)
}

/// Write the filtered extra-vars JSON file, or `None` when there is nothing
/// to pass.
pub fn write_vars_file(job_id: i64, vars: &Map<String, Value>) -> Result<Option<TempPath>> {
    if vars.is_empty() {
        return Ok(None);
    }
    let content = serde_json::to_string(&Value::Object(vars.clone()))?;
    let path = write_scratch_file(&format!("ansible_vars_{}_", job_id), ".json", &content)?;
    Ok(Some(path))
}

/// Best-effort unlink with logging; `TempPath::close` surfaces the error
/// that `Drop` would swallow.
pub fn cleanup_scratch(path: TempPath, label: &str) {
    if let Err(e) = path.close() {
        tracing::warn!("Failed to delete {} file: {}", label, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use homefleet_executors::TargetDevice;
    use std::path::PathBuf;

    fn ssh() -> SshConfig {
        SshConfig {
            user: "ansible".to_string(),
            host_key_checking: "accept-new".to_string(),
            identity_file: None,
        }
    }

    fn params(ip: &str, name: &str) -> DispatchParams {
        DispatchParams {
            device_ip: ip.to_string(),
            device_name: name.to_string(),
            action_name: "ping".to_string(),
            config: None,
            extra_vars: None,
            devices: None,
            vault_password: None,
        }
    }

    #[test]
    fn single_target_inventory() {
        let targets = build_targets(&params("10.0.0.5", "web01")).unwrap();
        let content = render_inventory(&targets, &ssh());
        assert!(content.starts_with("[homelab]\n"));
        assert!(content.contains(
            "web01 ansible_host=10.0.0.5 ansible_user=ansible \
             ansible_ssh_common_args='-o StrictHostKeyChecking=accept-new'"
        ));
        assert!(content.ends_with("[all:vars]\nansible_python_interpreter=/usr/bin/python3\n"));
    }

    #[test]
    fn identity_file_appended_to_ssh_args() {
        let mut config = ssh();
        config.identity_file = Some(PathBuf::from("/keys/id_ed25519"));
        let targets = build_targets(&params("10.0.0.5", "web01")).unwrap();
        let content = render_inventory(&targets, &config);
        assert!(content.contains("-o IdentityFile=/keys/id_ed25519'"));
    }

    #[test]
    fn invalid_ip_rejected() {
        assert!(build_targets(&params("10.0.0.5; whoami", "web01")).is_err());
        assert!(build_targets(&params("nope", "web01")).is_err());
    }

    #[test]
    fn ipv6_accepted() {
        let targets = build_targets(&params("fe80::1", "web01")).unwrap();
        assert_eq!(targets[0].ip, "fe80::1");
    }

    #[test]
    fn hostile_name_replaced_with_stable_fallback() {
        let targets = build_targets(&params("10.0.0.5", "web[0]'\n{evil}")).unwrap();
        assert!(targets[0].name.starts_with("device_"));
        // Sanitization alone may already produce a safe name.
        let ok = build_targets(&params("10.0.0.5", "  web01  ")).unwrap();
        assert_eq!(ok[0].name, "web01");
    }

    #[test]
    fn multi_target_uses_devices_list() {
        let mut p = params("10.0.0.5", "web01");
        p.devices = Some(vec![
            TargetDevice {
                ip: "10.0.0.5".to_string(),
                name: "web01".to_string(),
            },
            TargetDevice {
                ip: "10.0.0.6".to_string(),
                name: "web02".to_string(),
            },
        ]);
        let targets = build_targets(&p).unwrap();
        assert_eq!(targets.len(), 2);
        let content = render_inventory(&targets, &ssh());
        assert!(content.contains("web01 ansible_host=10.0.0.5"));
        assert!(content.contains("web02 ansible_host=10.0.0.6"));
    }

    #[test]
    fn scratch_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let path = write_scratch_file("test_inv_", ".ini", "[homelab]\n").unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        cleanup_scratch(path, "inventory");
    }

    #[test]
    fn vars_file_skipped_when_empty() {
        let empty = Map::new();
        assert!(write_vars_file(1, &empty).unwrap().is_none());

        let mut vars = Map::new();
        vars.insert("target_state".to_string(), Value::String("up".to_string()));
        let path = write_vars_file(1, &vars).unwrap().unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, r#"{"target_state":"up"}"#);
        cleanup_scratch(path, "vars");
    }
}
