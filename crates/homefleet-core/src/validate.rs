// Input validation shared by the API, executors, and worker
//
// Action names and inventory values cross a privilege boundary: they end up
// in filesystem paths and runner input files. Everything here rejects rather
// than escapes wherever possible.

use regex::Regex;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::net::IpAddr;
use std::sync::LazyLock;

/// Maximum accepted action name length.
pub const MAX_ACTION_NAME_LEN: usize = 100;

static SAFE_ACTION_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());

static SECRET_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_-]{0,99}$").unwrap());

static VAR_KEY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

static INVENTORY_UNSAFE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[\n\r'"\\\[\]{}]"#).unwrap());

/// True iff `name` is a legal action name (also used for host aliases).
pub fn is_safe_action_name(name: &str) -> bool {
    name.len() <= MAX_ACTION_NAME_LEN && SAFE_ACTION_NAME.is_match(name)
}

/// True iff `name` is a legal vault secret name.
pub fn is_valid_secret_name(name: &str) -> bool {
    SECRET_NAME.is_match(name)
}

/// True iff `key` is a legal extra-vars key.
pub fn is_safe_var_key(key: &str) -> bool {
    VAR_KEY.is_match(key)
}

/// Strip characters that could break out of an inventory host line.
pub fn sanitize_inventory_value(value: &str) -> String {
    INVENTORY_UNSAFE.replace_all(value, "").trim().to_string()
}

/// Parse-validate an IP address (v4 or v6) and return its canonical form.
pub fn validate_ip(ip: &str) -> Result<String, String> {
    ip.parse::<IpAddr>()
        .map(|addr| addr.to_string())
        .map_err(|_| format!("Invalid IP address: {}", ip))
}

/// Deterministic fallback host alias for names that do not survive
/// sanitization. Stable across processes (unlike a hasher seed).
pub fn fallback_device_name(original: &str) -> String {
    let digest = Sha256::digest(original.as_bytes());
    let n = u16::from_be_bytes([digest[0], digest[1]]) as u32 % 10_000;
    format!("device_{}", n)
}

fn is_safe_primitive(value: &Value) -> bool {
    matches!(
        value,
        Value::String(_) | Value::Number(_) | Value::Bool(_) | Value::Null
    )
}

fn safe_value(value: &Value) -> Option<Value> {
    match value {
        v if is_safe_primitive(v) => Some(v.clone()),
        Value::Array(items) => {
            let kept: Vec<Value> = items.iter().filter(|v| is_safe_primitive(v)).cloned().collect();
            Some(Value::Array(kept))
        }
        Value::Object(map) => Some(Value::Object(filter_safe_vars(map))),
        _ => None,
    }
}

/// Keep only entries with a safe key and a safe value: primitives, lists of
/// primitives, or recursively safe maps. Everything else is dropped.
pub fn filter_safe_vars(vars: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in vars {
        if !is_safe_var_key(key) {
            continue;
        }
        if let Some(v) = safe_value(value) {
            out.insert(key.clone(), v);
        }
    }
    out
}

/// Merge variable layers in order of increasing precedence (later layers win
/// on key collisions), then filter to safe entries.
pub fn merge_extra_vars(layers: &[Option<&Value>]) -> Map<String, Value> {
    let mut merged = Map::new();
    for layer in layers.iter().flatten() {
        if let Value::Object(map) = layer {
            for (k, v) in map {
                merged.insert(k.clone(), v.clone());
            }
        }
    }
    filter_safe_vars(&merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn action_names() {
        assert!(is_safe_action_name("ping"));
        assert!(is_safe_action_name("deploy_web-01"));
        assert!(!is_safe_action_name("../etc/passwd"));
        assert!(!is_safe_action_name("name with spaces"));
        assert!(!is_safe_action_name(""));
        assert!(!is_safe_action_name(&"a".repeat(101)));
        assert!(is_safe_action_name(&"a".repeat(100)));
    }

    #[test]
    fn secret_names_must_start_alpha() {
        assert!(is_valid_secret_name("prod-ssh"));
        assert!(!is_valid_secret_name("1prod"));
        assert!(!is_valid_secret_name("_prod"));
        assert!(!is_valid_secret_name(&format!("a{}", "b".repeat(100))));
    }

    #[test]
    fn inventory_sanitization_strips_injection_chars() {
        assert_eq!(sanitize_inventory_value("node[1]'\"{}\\"), "node1");
        assert_eq!(sanitize_inventory_value("  web01  "), "web01");
        assert_eq!(sanitize_inventory_value("a\nb\rc"), "abc");
    }

    #[test]
    fn ip_validation() {
        assert_eq!(validate_ip("10.0.0.5").unwrap(), "10.0.0.5");
        assert_eq!(validate_ip("::1").unwrap(), "::1");
        assert!(validate_ip("10.0.0.256").is_err());
        assert!(validate_ip("example.com").is_err());
        assert!(validate_ip("10.0.0.5; rm -rf /").is_err());
    }

    #[test]
    fn fallback_name_is_stable_and_bounded() {
        let a = fallback_device_name("weird name!");
        let b = fallback_device_name("weird name!");
        assert_eq!(a, b);
        let n: u32 = a.strip_prefix("device_").unwrap().parse().unwrap();
        assert!(n < 10_000);
    }

    #[test]
    fn filter_drops_unsafe_keys_and_values() {
        let vars = json!({
            "ok_string": "v",
            "ok_int": 3,
            "ok_float": 1.5,
            "ok_bool": true,
            "ok_list": [1, "two", {"nested": "dropped"}],
            "ok_map": {"inner": "v", "bad key!": "dropped"},
            "bad key": "dropped",
            "1starts_with_digit": "dropped",
        });
        let filtered = filter_safe_vars(vars.as_object().unwrap());
        assert_eq!(filtered.len(), 6);
        assert_eq!(filtered["ok_list"], json!([1, "two"]));
        assert_eq!(filtered["ok_map"], json!({"inner": "v"}));
        assert!(!filtered.contains_key("bad key"));
    }

    #[test]
    fn merge_precedence_caller_wins() {
        let workflow = json!({"a": 1, "b": 1});
        let step = json!({"b": 2, "c": 2});
        let caller = json!({"c": 3});
        let merged = merge_extra_vars(&[Some(&workflow), Some(&step), Some(&caller)]);
        assert_eq!(merged["a"], json!(1));
        assert_eq!(merged["b"], json!(2));
        assert_eq!(merged["c"], json!(3));
    }
}
