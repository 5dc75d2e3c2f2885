//! Compiled callbacks: evaluated hooks, custom tool handlers, the
//! orchestrator Task guard, and the parent permission chain.

use std::collections::BTreeSet;
use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crucible_core::{
    CodeEvaluator, CompiledHook, EvalSite, ExecutionEvent, HookInput, HookOutcome,
    PermissionCallback, PermissionContext, PermissionDecision, ToolHandler, ToolOutput,
};

use crate::bridge::QuestionBridge;

/// Substrings that mark a prompt as smuggling host paths into a subagent.
const HOST_PATH_MARKERS: &[&str] = &["/Users/", "/home/", "C:\\"];

// ============================================================================
// Hooks
// ============================================================================

/// A user hook snippet, evaluated per firing.
pub struct EvaluatedHook {
    code: String,
    evaluator: CodeEvaluator,
}

impl EvaluatedHook {
    pub fn new(code: &str) -> Self {
        Self {
            code: code.to_string(),
            evaluator: CodeEvaluator::new(),
        }
    }
}

#[async_trait]
impl CompiledHook for EvaluatedHook {
    async fn fire(&self, input: &HookInput) -> HookOutcome {
        let eval_input = json!({
            "event": format!("{:?}", input.event),
            "tool_name": input.tool_name,
            "tool_input": input.tool_input,
            "session_id": input.session_id,
        });

        match self
            .evaluator
            .eval(&self.code, eval_input, EvalSite::Hook)
            .await
        {
            Ok(result) => interpret_hook_result(result),
            // A broken hook turns the call into a tool error the model
            // can read, rather than crashing the engine.
            Err(e) => HookOutcome::Deny {
                reason: format!("hook failed: {e}"),
            },
        }
    }
}

fn interpret_hook_result(result: Value) -> HookOutcome {
    match &result {
        Value::Bool(false) => HookOutcome::Deny {
            reason: "denied by hook".to_string(),
        },
        Value::Object(map) => {
            let decision = map.get("decision").and_then(Value::as_str);
            if matches!(decision, Some("deny") | Some("block")) {
                let reason = map
                    .get("reason")
                    .and_then(Value::as_str)
                    .unwrap_or("denied by hook")
                    .to_string();
                return HookOutcome::Deny { reason };
            }
            if let Some(updated) = map.get("updatedInput").or_else(|| map.get("updated_input")) {
                return HookOutcome::UpdateInput(updated.clone());
            }
            HookOutcome::Continue
        }
        _ => HookOutcome::Continue,
    }
}

/// The synthesized orchestrator hook guarding the shape of `Task` calls:
/// the subagent must be named, must exist, and the prompt must not carry
/// host paths.
pub struct TaskGuardHook {
    valid_subagents: BTreeSet<String>,
}

impl TaskGuardHook {
    pub fn new(valid_subagents: impl IntoIterator<Item = String>) -> Self {
        Self {
            valid_subagents: valid_subagents.into_iter().collect(),
        }
    }
}

#[async_trait]
impl CompiledHook for TaskGuardHook {
    async fn fire(&self, input: &HookInput) -> HookOutcome {
        let subagent_type = input
            .tool_input
            .get("subagent_type")
            .and_then(Value::as_str);

        let Some(subagent_type) = subagent_type else {
            return HookOutcome::Deny {
                reason: format!(
                    "Task calls must name a subagent_type. Available: {}",
                    self.names()
                ),
            };
        };

        if !self.valid_subagents.contains(subagent_type) {
            return HookOutcome::Deny {
                reason: format!(
                    "unknown subagent '{subagent_type}'. Available: {}",
                    self.names()
                ),
            };
        }

        if let Some(prompt) = input.tool_input.get("prompt").and_then(Value::as_str) {
            if let Some(marker) = HOST_PATH_MARKERS.iter().find(|m| prompt.contains(*m)) {
                return HookOutcome::Deny {
                    reason: format!(
                        "prompt contains host path '{marker}...'; subagents only see \
                         /scratch, /skills, and /claude-cache"
                    ),
                };
            }
        }

        HookOutcome::Continue
    }
}

impl TaskGuardHook {
    fn names(&self) -> String {
        self.valid_subagents
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    }
}

// ============================================================================
// Custom tool handlers
// ============================================================================

/// A custom tool whose handler snippet passed prevalidation.
pub struct EvaluatedToolHandler {
    code: String,
    evaluator: CodeEvaluator,
}

impl EvaluatedToolHandler {
    pub fn new(code: &str) -> Self {
        Self {
            code: code.to_string(),
            evaluator: CodeEvaluator::new(),
        }
    }
}

#[async_trait]
impl ToolHandler for EvaluatedToolHandler {
    async fn call(&self, input: Value) -> ToolOutput {
        match self
            .evaluator
            .eval(&self.code, input, EvalSite::ToolHandler)
            .await
        {
            Ok(Value::String(s)) => ToolOutput::text(s),
            Ok(value) => ToolOutput::text(
                serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string()),
            ),
            Err(e) => ToolOutput::error(format!("Custom tool handler failed: {e}")),
        }
    }
}

/// Stands in for a custom tool whose handler failed prevalidation: it is
/// still registered (the model can see it) but every call errors.
pub struct StubToolHandler {
    reason: String,
}

impl StubToolHandler {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ToolHandler for StubToolHandler {
    async fn call(&self, _input: Value) -> ToolOutput {
        ToolOutput::error(format!("This tool is unavailable: {}", self.reason))
    }
}

// ============================================================================
// Permission callbacks
// ============================================================================

/// A user-supplied `canUseTool` snippet.
pub struct EvaluatedPermissionCallback {
    code: String,
    evaluator: CodeEvaluator,
}

impl EvaluatedPermissionCallback {
    pub fn new(code: &str) -> Self {
        Self {
            code: code.to_string(),
            evaluator: CodeEvaluator::new(),
        }
    }
}

#[async_trait]
impl PermissionCallback for EvaluatedPermissionCallback {
    async fn decide(
        &self,
        tool_name: &str,
        input: Value,
        context: &PermissionContext,
    ) -> PermissionDecision {
        let eval_input = json!({
            "tool_name": tool_name,
            "input": input,
            "subagent_id": context.subagent_id,
        });

        match self
            .evaluator
            .eval(&self.code, eval_input, EvalSite::PermissionCallback)
            .await
        {
            Ok(Value::Object(map)) => {
                match map.get("decision").and_then(Value::as_str) {
                    Some("deny") | Some("block") => PermissionDecision::Deny {
                        reason: map
                            .get("reason")
                            .and_then(Value::as_str)
                            .unwrap_or("denied by permission callback")
                            .to_string(),
                        interrupt: false,
                    },
                    _ => match map.get("updatedInput").or_else(|| map.get("updated_input")) {
                        Some(updated) => PermissionDecision::allow_with(updated.clone()),
                        None => PermissionDecision::allow(),
                    },
                }
            }
            Ok(Value::Bool(false)) => PermissionDecision::deny("denied by permission callback"),
            Ok(_) => PermissionDecision::allow(),
            // Fail closed: a broken callback must not grant anything.
            Err(e) => PermissionDecision::deny(format!("permission callback failed: {e}")),
        }
    }
}

/// The decision chain installed on every plan (§ orchestration rules):
/// question bridging first, then orchestrator gating, then the user
/// callback.
pub struct ParentPermissionCallback {
    session_id: String,
    is_orchestrator: bool,
    blocked_for_parent: HashSet<String>,
    subagent_names: Vec<String>,
    user_callback: Option<Arc<dyn PermissionCallback>>,
    bridge: QuestionBridge,
    events: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ParentPermissionCallback {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: &str,
        is_orchestrator: bool,
        blocked_for_parent: impl IntoIterator<Item = String>,
        subagent_names: Vec<String>,
        user_callback: Option<Arc<dyn PermissionCallback>>,
        bridge: QuestionBridge,
        events: mpsc::UnboundedSender<ExecutionEvent>,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            is_orchestrator,
            blocked_for_parent: blocked_for_parent.into_iter().collect(),
            subagent_names,
            user_callback,
            bridge,
            events,
        }
    }

    fn emit(&self, event: ExecutionEvent) {
        // The engine may already be shutting down; losing an advisory
        // event then is fine.
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl PermissionCallback for ParentPermissionCallback {
    async fn decide(
        &self,
        tool_name: &str,
        input: Value,
        context: &PermissionContext,
    ) -> PermissionDecision {
        // 1. Question bridging: suspend until the out-of-band answer.
        if tool_name == "AskUserQuestion" {
            let (request_id, rx) = match self.bridge.begin().await {
                Ok(pair) => pair,
                Err(e) => return PermissionDecision::deny(e.to_string()),
            };
            self.emit(ExecutionEvent::QuestionPending {
                request_id: request_id.clone(),
                questions: input.clone(),
            });
            debug!(session_id = %self.session_id, %request_id, "question pending");

            return match rx.await {
                Ok(answers) => {
                    let mut updated = input;
                    if let Value::Object(ref mut map) = updated {
                        map.insert("answers".to_string(), answers);
                    }
                    PermissionDecision::allow_with(updated)
                }
                Err(_) => PermissionDecision::Deny {
                    reason: "session interrupted while awaiting an answer".to_string(),
                    interrupt: true,
                },
            };
        }

        // 2. Orchestrator gating: the parent may only coordinate;
        //    subagents keep full access to the registered servers.
        if self.is_orchestrator && self.blocked_for_parent.contains(tool_name) {
            if context.subagent_id.is_none() {
                let reason = format!(
                    "'{tool_name}' is not available to the orchestrator. Delegate via the \
                     Task tool to one of: {}",
                    self.subagent_names.join(", ")
                );
                self.emit(ExecutionEvent::PermissionDenied {
                    tool_name: tool_name.to_string(),
                    reason: reason.clone(),
                });
                warn!(session_id = %self.session_id, tool_name, "denied orchestrator tool use");
                return PermissionDecision::deny(reason);
            }
            return PermissionDecision::allow();
        }

        // 3. The user's own callback, if any.
        match &self.user_callback {
            Some(callback) => callback.decide(tool_name, input, context).await,
            None => PermissionDecision::allow(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crucible_core::HookEvent;

    fn hook_input(tool_input: Value) -> HookInput {
        HookInput {
            event: HookEvent::PreToolUse,
            session_id: "sess".to_string(),
            tool_name: Some("Task".to_string()),
            tool_input,
        }
    }

    fn parent(
        is_orchestrator: bool,
        user: Option<Arc<dyn PermissionCallback>>,
    ) -> (ParentPermissionCallback, mpsc::UnboundedReceiver<ExecutionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let callback = ParentPermissionCallback::new(
            "sess",
            is_orchestrator,
            ["Read", "sandbox:Read", "Bash", "sandbox:Bash"]
                .into_iter()
                .map(String::from),
            vec!["FileManager".to_string(), "Analyzer".to_string()],
            user,
            QuestionBridge::new(),
            tx,
        );
        (callback, rx)
    }

    // ===== TaskGuardHook =====

    #[tokio::test]
    async fn test_task_guard_requires_subagent_type() {
        let guard = TaskGuardHook::new(["Analyzer".to_string()]);
        let outcome = guard.fire(&hook_input(json!({"prompt": "go"}))).await;
        assert!(matches!(outcome, HookOutcome::Deny { .. }));
    }

    #[tokio::test]
    async fn test_task_guard_rejects_unknown_subagent() {
        let guard = TaskGuardHook::new(["Analyzer".to_string()]);
        let outcome = guard
            .fire(&hook_input(json!({"subagent_type": "Ghost", "prompt": "go"})))
            .await;
        match outcome {
            HookOutcome::Deny { reason } => assert!(reason.contains("Analyzer")),
            other => panic!("expected deny, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_task_guard_rejects_host_paths() {
        let guard = TaskGuardHook::new(["Analyzer".to_string()]);
        for prompt in [
            "read /Users/alice/code/main.go",
            "look at /home/bob/x",
            r"open C:\repo\f.cs",
        ] {
            let outcome = guard
                .fire(&hook_input(
                    json!({"subagent_type": "Analyzer", "prompt": prompt}),
                ))
                .await;
            assert!(matches!(outcome, HookOutcome::Deny { .. }), "{prompt}");
        }
    }

    #[tokio::test]
    async fn test_task_guard_allows_well_formed_calls() {
        let guard = TaskGuardHook::new(["Analyzer".to_string()]);
        let outcome = guard
            .fire(&hook_input(
                json!({"subagent_type": "Analyzer", "prompt": "summarize /scratch/notes.md"}),
            ))
            .await;
        assert_eq!(outcome, HookOutcome::Continue);
    }

    // ===== EvaluatedHook =====

    #[tokio::test]
    async fn test_evaluated_hook_deny() {
        let hook = EvaluatedHook::new(r#"#{ decision: "deny", reason: "not today" }"#);
        let outcome = hook.fire(&hook_input(json!({}))).await;
        assert_eq!(
            outcome,
            HookOutcome::Deny {
                reason: "not today".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_evaluated_hook_continue() {
        let hook = EvaluatedHook::new("#{ }");
        let outcome = hook.fire(&hook_input(json!({}))).await;
        assert_eq!(outcome, HookOutcome::Continue);
    }

    #[tokio::test]
    async fn test_evaluated_hook_update_input() {
        let hook = EvaluatedHook::new(
            r#"#{ updatedInput: #{ command: input.tool_input.command + " --dry-run" } }"#,
        );
        let outcome = hook
            .fire(&hook_input(json!({"command": "ls /scratch"})))
            .await;
        match outcome {
            HookOutcome::UpdateInput(updated) => {
                assert_eq!(updated["command"], "ls /scratch --dry-run")
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_broken_hook_denies_with_reason() {
        let hook = EvaluatedHook::new("this is not rhai ((");
        let outcome = hook.fire(&hook_input(json!({}))).await;
        assert!(matches!(outcome, HookOutcome::Deny { .. }));
    }

    // ===== custom tool handlers =====

    #[tokio::test]
    async fn test_evaluated_tool_handler_returns_text() {
        let handler = EvaluatedToolHandler::new(r#""sum: " + (input.a + input.b)"#);
        let out = handler.call(json!({"a": 1, "b": 2})).await;
        assert!(!out.is_error);
        assert_eq!(out.as_text(), "sum: 3");
    }

    #[tokio::test]
    async fn test_stub_handler_always_errors() {
        let handler = StubToolHandler::new("handler code failed validation");
        let out = handler.call(json!({})).await;
        assert!(out.is_error);
        assert!(out.as_text().contains("unavailable"));
    }

    // ===== parent permission chain =====

    #[tokio::test]
    async fn test_orchestrator_denies_parent_blocked_tool() {
        let (callback, mut rx) = parent(true, None);
        let context = PermissionContext {
            session_id: "sess".to_string(),
            subagent_id: None,
        };

        let decision = callback
            .decide("Read", json!({"file_path": "/scratch/x"}), &context)
            .await;

        match decision {
            PermissionDecision::Deny { reason, .. } => {
                assert!(reason.contains("Task"));
                assert!(reason.contains("FileManager"));
            }
            other => panic!("expected deny, got {other:?}"),
        }
        assert!(matches!(
            rx.try_recv().unwrap(),
            ExecutionEvent::PermissionDenied { .. }
        ));
    }

    #[tokio::test]
    async fn test_orchestrator_allows_subagent_blocked_tool() {
        let (callback, _rx) = parent(true, None);
        let context = PermissionContext {
            session_id: "sess".to_string(),
            subagent_id: Some("Analyzer".to_string()),
        };

        let decision = callback
            .decide("Read", json!({"file_path": "/scratch/x"}), &context)
            .await;
        assert_eq!(decision, PermissionDecision::allow());
    }

    #[tokio::test]
    async fn test_non_orchestrator_passes_through() {
        let (callback, _rx) = parent(false, None);
        let context = PermissionContext::default();
        let decision = callback.decide("Read", json!({}), &context).await;
        assert_eq!(decision, PermissionDecision::allow());
    }

    #[tokio::test]
    async fn test_user_callback_consulted_for_unblocked_tools() {
        let user = Arc::new(EvaluatedPermissionCallback::new(
            r#"if input.tool_name == "TodoWrite" { #{ decision: "deny", reason: "no" } } else { #{ } }"#,
        ));
        let (callback, _rx) = parent(true, Some(user));
        let context = PermissionContext::default();

        let decision = callback.decide("TodoWrite", json!({}), &context).await;
        assert!(matches!(decision, PermissionDecision::Deny { .. }));

        let decision = callback.decide("Task", json!({}), &context).await;
        assert_eq!(decision, PermissionDecision::allow());
    }

    #[tokio::test]
    async fn test_question_roundtrip_augments_input() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let bridge = QuestionBridge::new();
        let callback = ParentPermissionCallback::new(
            "sess",
            false,
            Vec::<String>::new(),
            Vec::new(),
            None,
            bridge.clone(),
            tx,
        );

        let input = json!({"questions": [{"q": "which env?"}]});
        let context = PermissionContext::default();

        let decide = tokio::spawn(async move {
            callback.decide("AskUserQuestion", input, &context).await
        });

        // The QuestionPending event carries the request id to answer with.
        let event = rx.recv().await.unwrap();
        let request_id = match event {
            ExecutionEvent::QuestionPending { request_id, .. } => request_id,
            other => panic!("expected question event, got {other:?}"),
        };
        bridge
            .resolve(&request_id, json!({"q1": "prod"}))
            .await
            .unwrap();

        match decide.await.unwrap() {
            PermissionDecision::Allow {
                updated_input: Some(updated),
            } => {
                assert_eq!(updated["answers"]["q1"], "prod");
                assert!(updated["questions"].is_array());
            }
            other => panic!("expected allow-with-input, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_interrupt_while_question_pending_denies_with_interrupt() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let bridge = QuestionBridge::new();
        let callback = ParentPermissionCallback::new(
            "sess",
            false,
            Vec::<String>::new(),
            Vec::new(),
            None,
            bridge.clone(),
            tx,
        );

        let context = PermissionContext::default();
        let decide =
            tokio::spawn(async move { callback.decide("AskUserQuestion", json!({}), &context).await });

        let _ = rx.recv().await.unwrap();
        bridge.cancel().await;

        match decide.await.unwrap() {
            PermissionDecision::Deny { interrupt, .. } => assert!(interrupt),
            other => panic!("expected interrupting deny, got {other:?}"),
        }
    }
}
