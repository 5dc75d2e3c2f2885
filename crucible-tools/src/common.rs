//! Shared guardrails for tool handlers: truncation, failure hints, and
//! shell escaping.

use crucible_core::ResourceLimits;

/// Truncate a result to the configured cap, annotating when content was
/// dropped. The returned string carries exactly `max_result_size` content
/// characters plus the annotation.
pub fn truncate_result(text: &str, limits: &ResourceLimits) -> String {
    let char_count = text.chars().count();
    if char_count <= limits.max_result_size {
        return text.to_string();
    }

    let kept: String = text.chars().take(limits.max_result_size).collect();
    let mut out = format!(
        "{kept}\n[Truncated: result exceeded {} characters]",
        limits.max_result_size
    );
    if limits.include_error_hints {
        out.push_str("\nHint: paginate or narrow the query to fetch the rest.");
    }
    out
}

/// Attach a remediation hint to a failure message when hints are enabled.
pub fn with_hint(message: String, hint: &str, limits: &ResourceLimits) -> String {
    if limits.include_error_hints {
        format!("{message}\nHint: {hint}")
    } else {
        message
    }
}

pub const HINT_TIMEOUT: &str = "break the work into smaller chunks and run them separately";
pub const HINT_SIZE: &str = "paginate or narrow the query";
pub const HINT_WRITE_SCOPE: &str = "writes are only allowed under /scratch";

/// Single-quote an argument for the container shell.
pub fn shell_escape(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// JSON schema for a tool input type.
pub(crate) fn schema_of<T: schemars::JsonSchema>() -> serde_json::Value {
    serde_json::to_value(schemars::schema_for!(T)).expect("Failed to serialize schema")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(max: usize, hints: bool) -> ResourceLimits {
        ResourceLimits {
            max_result_size: max,
            max_tool_timeout_ms: 60_000,
            include_error_hints: hints,
        }
    }

    #[test]
    fn test_truncate_keeps_exactly_cap_chars() {
        let text = "x".repeat(120);
        let out = truncate_result(&text, &limits(100, false));
        assert!(out.starts_with(&"x".repeat(100)));
        assert!(!out.contains(&"x".repeat(101)));
        assert!(out.contains("[Truncated: result exceeded 100 characters]"));
    }

    #[test]
    fn test_truncate_noop_under_cap() {
        let out = truncate_result("short", &limits(100, true));
        assert_eq!(out, "short");
    }

    #[test]
    fn test_truncate_hint_gated() {
        let text = "y".repeat(50);
        assert!(truncate_result(&text, &limits(10, true)).contains("Hint:"));
        assert!(!truncate_result(&text, &limits(10, false)).contains("Hint:"));
    }

    #[test]
    fn test_with_hint_gated() {
        let l = limits(10, true);
        assert!(with_hint("failed".into(), HINT_TIMEOUT, &l).contains("smaller chunks"));
        let l = limits(10, false);
        assert_eq!(with_hint("failed".into(), HINT_TIMEOUT, &l), "failed");
    }

    #[test]
    fn test_shell_escape() {
        assert_eq!(shell_escape("plain"), "'plain'");
        assert_eq!(shell_escape("a'b"), r"'a'\''b'");
    }
}
