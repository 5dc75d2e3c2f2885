//! Safe evaluation of user-supplied code snippets.
//!
//! Agent configurations carry small snippets for hooks, custom tool
//! handlers, dynamic context loaders, and permission callbacks. This module
//! is the only legitimate way to turn those snippets into executable
//! callbacks: a pattern prevalidation pass rejects code that reaches for
//! process, filesystem, network, or code-generation primitives, then the
//! snippet runs in a restricted rhai interpreter with operation limits and
//! a hard deadline.
//!
//! The snippet sees a single `input` variable (the event or tool input as
//! a map) and its final expression becomes the result.

use std::time::{Duration, Instant};

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::debug;

/// Errors from snippet evaluation.
#[derive(Debug, Error)]
pub enum EvalError {
    /// The snippet failed prevalidation and never ran.
    #[error("code rejected: {0}")]
    Rejected(String),

    /// The snippet exceeded its deadline.
    #[error("code timed out after {0} ms")]
    Timeout(u64),

    /// The snippet ran and failed.
    #[error("code failed: {0}")]
    Runtime(String),
}

/// Which kind of snippet is being evaluated. Each site has its own
/// deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalSite {
    Hook,
    ToolHandler,
    ContextLoader,
    PermissionCallback,
}

impl EvalSite {
    pub fn timeout(&self) -> Duration {
        match self {
            EvalSite::Hook => Duration::from_secs(5),
            EvalSite::ToolHandler => Duration::from_secs(10),
            EvalSite::ContextLoader => Duration::from_secs(5),
            EvalSite::PermissionCallback => Duration::from_secs(5),
        }
    }
}

/// Substrings that disqualify a snippet outright: process and
/// child-process access, filesystem/network modules, code-generation
/// primitives, prototype pollution, unsafe binary allocation. Checked
/// after literals are blanked so that quoted text never trips them.
const DANGEROUS_PATTERNS: &[&str] = &[
    "child_process",
    "require(",
    "import(",
    "fs.",
    "net.",
    "http.",
    "https.",
    "eval(",
    "Function(",
    "new Function",
    "__proto__",
    "constructor[",
    "prototype[",
    "Buffer.allocUnsafe",
    "WebAssembly",
    "XMLHttpRequest",
    "fetch(",
    "Deno.",
];

/// Global identifiers a snippet may never reference outside a literal.
const BLOCKED_GLOBALS: &[&str] = &[
    "process",
    "require",
    "module",
    "global",
    "globalThis",
    "child_process",
    "Function",
    "Buffer",
    "Deno",
    "window",
    "document",
    "fetch",
    "XMLHttpRequest",
    "WebSocket",
];

/// Evaluates prevalidated snippets in a restricted interpreter.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodeEvaluator;

impl CodeEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Reject snippets that reference blocked capabilities, without
    /// running them. String and regex literals are blanked out first, so
    /// `'process'` in quotes is data while a bare `process` is not.
    pub fn prevalidate(code: &str) -> Result<(), EvalError> {
        let blanked = blank_literals(code);

        for pattern in DANGEROUS_PATTERNS {
            if blanked.contains(pattern) {
                return Err(EvalError::Rejected(format!(
                    "dangerous pattern '{pattern}'"
                )));
            }
        }

        static GLOBALS_RE: OnceLock<Regex> = OnceLock::new();
        let re = GLOBALS_RE.get_or_init(|| {
            let alternation = BLOCKED_GLOBALS.join("|");
            Regex::new(&format!(r"\b({alternation})\b")).expect("blocked globals regex")
        });

        if let Some(found) = re.find(&blanked) {
            return Err(EvalError::Rejected(format!(
                "blocked global '{}'",
                found.as_str()
            )));
        }

        Ok(())
    }

    /// Prevalidate and run a snippet with `input` in scope, bounded by the
    /// site's deadline. Async-shaped: the interpreter runs on a blocking
    /// thread and the caller suspends until it settles or times out.
    pub async fn eval(&self, code: &str, input: Value, site: EvalSite) -> Result<Value, EvalError> {
        Self::prevalidate(code)?;

        let timeout = site.timeout();
        let deadline = Instant::now() + timeout;
        let code = code.to_string();

        let task = tokio::task::spawn_blocking(move || run_script(&code, input, deadline, timeout));

        // The interpreter aborts itself at the deadline via its progress
        // callback; the outer timeout only covers scheduling slack.
        match tokio::time::timeout(timeout + Duration::from_millis(500), task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(EvalError::Runtime(format!("evaluator panicked: {join_err}"))),
            Err(_) => Err(EvalError::Timeout(timeout.as_millis() as u64)),
        }
    }
}

fn run_script(
    code: &str,
    input: Value,
    deadline: Instant,
    timeout: Duration,
) -> Result<Value, EvalError> {
    let mut engine = rhai::Engine::new();
    engine.set_max_operations(1_000_000);
    engine.set_max_call_levels(64);
    engine.set_max_string_size(1_000_000);
    engine.set_max_array_size(10_000);
    engine.set_max_map_size(10_000);
    engine.on_progress(move |_| {
        if Instant::now() >= deadline {
            Some(rhai::Dynamic::UNIT)
        } else {
            None
        }
    });

    let mut scope = rhai::Scope::new();
    let dynamic_input =
        rhai::serde::to_dynamic(&input).map_err(|e| EvalError::Runtime(e.to_string()))?;
    scope.push_dynamic("input", dynamic_input);

    match engine.eval_with_scope::<rhai::Dynamic>(&mut scope, code) {
        Ok(value) => {
            debug!("snippet evaluated");
            rhai::serde::from_dynamic(&value).map_err(|e| EvalError::Runtime(e.to_string()))
        }
        Err(err) => {
            if matches!(*err, rhai::EvalAltResult::ErrorTerminated(..)) {
                Err(EvalError::Timeout(timeout.as_millis() as u64))
            } else {
                Err(EvalError::Runtime(err.to_string()))
            }
        }
    }
}

/// Replace the contents of string and regex literals (and comments) with
/// spaces so pattern checks only see live code.
fn blank_literals(code: &str) -> String {
    let chars: Vec<char> = code.chars().collect();
    let mut out = String::with_capacity(code.len());
    let mut i = 0;
    // Tracks the last significant char, to tell division from a regex
    // literal opener.
    let mut prev_code_char: Option<char> = None;

    while i < chars.len() {
        let ch = chars[i];
        match ch {
            '\'' | '"' | '`' => {
                let quote = ch;
                out.push(quote);
                i += 1;
                while i < chars.len() && chars[i] != quote {
                    if chars[i] == '\\' {
                        out.push(' ');
                        i += 1;
                        if i < chars.len() {
                            out.push(' ');
                            i += 1;
                        }
                    } else {
                        out.push(if chars[i] == '\n' { '\n' } else { ' ' });
                        i += 1;
                    }
                }
                if i < chars.len() {
                    out.push(quote);
                    i += 1;
                }
                prev_code_char = Some(quote);
            }
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    out.push(' ');
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    out.push(if chars[i] == '\n' { '\n' } else { ' ' });
                    i += 1;
                }
                if i < chars.len() {
                    out.push_str("  ");
                    i += 2;
                }
            }
            '/' if regex_can_start(prev_code_char) => {
                out.push('/');
                i += 1;
                while i < chars.len() && chars[i] != '/' && chars[i] != '\n' {
                    if chars[i] == '\\' {
                        out.push(' ');
                        i += 1;
                    }
                    if i < chars.len() {
                        out.push(' ');
                        i += 1;
                    }
                }
                if i < chars.len() && chars[i] == '/' {
                    out.push('/');
                    i += 1;
                }
                prev_code_char = Some('/');
            }
            c => {
                out.push(c);
                if !c.is_whitespace() {
                    prev_code_char = Some(c);
                }
                i += 1;
            }
        }
    }
    out
}

/// A `/` opens a regex literal when it cannot be a division operator.
fn regex_can_start(prev: Option<char>) -> bool {
    match prev {
        None => true,
        Some(c) => matches!(c, '=' | '(' | ',' | ':' | '[' | '!' | '&' | '|' | '?' | '{' | ';'),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ===== prevalidation =====

    #[test]
    fn test_blocked_global_rejected() {
        let err = CodeEvaluator::prevalidate("let x = process;").unwrap_err();
        assert!(err.to_string().contains("process"));
    }

    #[test]
    fn test_blocked_global_in_single_quotes_accepted() {
        assert!(CodeEvaluator::prevalidate("let name = 'process';").is_ok());
    }

    #[test]
    fn test_blocked_global_in_double_quotes_accepted() {
        assert!(CodeEvaluator::prevalidate(r#"let name = "require this";"#).is_ok());
    }

    #[test]
    fn test_blocked_global_in_comment_accepted() {
        assert!(CodeEvaluator::prevalidate("// touches process\nlet x = 1;").is_ok());
    }

    #[test]
    fn test_dangerous_patterns_rejected() {
        for code in [
            "child_process.spawn()",
            "let f = eval(code);",
            "obj.__proto__ = bad;",
            "Buffer.allocUnsafe(1024)",
        ] {
            assert!(CodeEvaluator::prevalidate(code).is_err(), "{code}");
        }
    }

    #[test]
    fn test_partial_identifier_not_rejected() {
        // `processed` is not `process`.
        assert!(CodeEvaluator::prevalidate("let processed = input.count + 1; processed").is_ok());
    }

    #[test]
    fn test_regex_literal_blanked() {
        assert!(CodeEvaluator::prevalidate("let re = /process/;").is_ok());
    }

    // ===== execution =====

    #[tokio::test]
    async fn test_eval_returns_expression_value() {
        let evaluator = CodeEvaluator::new();
        let result = evaluator
            .eval("input.a + input.b", json!({"a": 2, "b": 3}), EvalSite::Hook)
            .await
            .unwrap();
        assert_eq!(result, json!(5));
    }

    #[tokio::test]
    async fn test_eval_returns_map() {
        let evaluator = CodeEvaluator::new();
        let result = evaluator
            .eval(
                r#"#{ decision: "allow", count: input.count }"#,
                json!({"count": 7}),
                EvalSite::PermissionCallback,
            )
            .await
            .unwrap();
        assert_eq!(result["decision"], "allow");
        assert_eq!(result["count"], 7);
    }

    #[tokio::test]
    async fn test_eval_rejected_code_never_runs() {
        let evaluator = CodeEvaluator::new();
        let err = evaluator
            .eval("process", json!({}), EvalSite::Hook)
            .await
            .unwrap_err();
        assert!(matches!(err, EvalError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_eval_infinite_loop_times_out() {
        let evaluator = CodeEvaluator::new();
        let err = evaluator
            .eval("let i = 0; loop { i += 1; }", json!({}), EvalSite::Hook)
            .await
            .unwrap_err();
        assert!(
            matches!(err, EvalError::Timeout(_) | EvalError::Runtime(_)),
            "expected timeout-ish failure, got {err:?}"
        );
    }

    #[tokio::test]
    async fn test_eval_runtime_error_reported() {
        let evaluator = CodeEvaluator::new();
        let err = evaluator
            .eval("input.missing.deeper", json!({}), EvalSite::Hook)
            .await
            .unwrap_err();
        assert!(matches!(err, EvalError::Runtime(_)));
    }

    #[test]
    fn test_site_timeouts() {
        assert_eq!(EvalSite::Hook.timeout(), Duration::from_secs(5));
        assert_eq!(EvalSite::ToolHandler.timeout(), Duration::from_secs(10));
        assert_eq!(EvalSite::ContextLoader.timeout(), Duration::from_secs(5));
        assert_eq!(EvalSite::PermissionCallback.timeout(), Duration::from_secs(5));
    }
}
