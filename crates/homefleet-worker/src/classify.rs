// Failure classification from runner output
//
// Substring-driven: the runner's diagnostics are stable enough that a small
// ordered table beats parsing. Applied to redacted output only.

use homefleet_contracts::ErrorCategory;

/// Derive an error category from the (redacted) output of a failed run.
/// Falls back to `execution` when nothing matches.
pub fn classify_failure(output: &str) -> ErrorCategory {
    let lower = output.to_lowercase();

    if lower.contains("authentication") {
        ErrorCategory::Authentication
    } else if lower.contains("permission denied") {
        ErrorCategory::Permission
    } else if lower.contains("connection refused") || lower.contains("unreachable") {
        ErrorCategory::Connectivity
    } else if lower.contains("not found") {
        ErrorCategory::NotFound
    } else if lower.contains("timeout") || lower.contains("timed out") {
        ErrorCategory::Timeout
    } else {
        ErrorCategory::Execution
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_substrings() {
        assert_eq!(
            classify_failure("fatal: Authentication failure"),
            ErrorCategory::Authentication
        );
        assert_eq!(
            classify_failure("bash: /usr/bin/thing: Permission denied"),
            ErrorCategory::Permission
        );
        assert_eq!(
            classify_failure("ssh: connect to host 10.0.0.9: Connection refused"),
            ErrorCategory::Connectivity
        );
        assert_eq!(
            classify_failure("UNREACHABLE! => changed=false"),
            ErrorCategory::Connectivity
        );
        assert_eq!(
            classify_failure("module 'foo' not found"),
            ErrorCategory::NotFound
        );
        assert_eq!(
            classify_failure("operation timed out after 300s"),
            ErrorCategory::Timeout
        );
    }

    #[test]
    fn falls_back_to_execution() {
        assert_eq!(
            classify_failure("task failed with rc=2"),
            ErrorCategory::Execution
        );
        assert_eq!(classify_failure(""), ErrorCategory::Execution);
    }

    #[test]
    fn authentication_wins_over_later_matches() {
        let output = "authentication failed: connection refused while retrying";
        assert_eq!(classify_failure(output), ErrorCategory::Authentication);
    }
}
