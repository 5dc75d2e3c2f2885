//! Core data model: agent configurations, settings, resource limits, and
//! the session-level records shared across the runtime.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Declarative definition of an agent.
///
/// Constructed by an external surface (UI, API caller) and consumed
/// immutably by the config compiler. An agent with at least one subagent
/// is an *orchestrator* and receives a restricted, coordination-only tool
/// surface; its full tool registry remains available to the subagents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub system_prompt: String,
    #[serde(default)]
    pub model: ModelChoice,
    #[serde(default)]
    pub tools: ToolSelection,
    /// Named subagent definitions, invocable via the `Task` tool.
    #[serde(default)]
    pub subagents: BTreeMap<String, SubagentConfig>,
    #[serde(default)]
    pub settings: AgentSettings,
    /// Hook event name (possibly legacy) to its entries. Legacy names are
    /// migrated at compile time.
    #[serde(default)]
    pub hooks: HashMap<String, Vec<HookEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    #[serde(default)]
    pub mcp_connections: Vec<McpConnectionRef>,
    #[serde(default)]
    pub connectors: Vec<ConnectorRef>,
    #[serde(default)]
    pub custom_tools: Vec<CustomToolConfig>,
    /// Skill names enabled for this agent (mounted read-only at /skills).
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_policy: Option<ErrorPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advanced: Option<AdvancedOptions>,
}

impl AgentConfig {
    /// An agent is an orchestrator iff it declares at least one subagent.
    pub fn is_orchestrator(&self) -> bool {
        !self.subagents.is_empty()
    }
}

/// Model selection for an agent or subagent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelChoice {
    #[default]
    Sonnet,
    Opus,
    Haiku,
    /// Use the parent's model.
    Inherit,
}

impl ModelChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelChoice::Sonnet => "sonnet",
            ModelChoice::Opus => "opus",
            ModelChoice::Haiku => "haiku",
            ModelChoice::Inherit => "inherit",
        }
    }

    /// Resolve `inherit` against a parent model.
    pub fn resolve(&self, parent: ModelChoice) -> ModelChoice {
        match self {
            ModelChoice::Inherit => parent,
            other => *other,
        }
    }
}

/// Enabled/disabled tool name lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSelection {
    #[serde(default)]
    pub enabled: Vec<String>,
    #[serde(default)]
    pub disabled: Vec<String>,
}

/// A named subagent definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubagentConfig {
    pub description: String,
    pub prompt: String,
    /// Declared tool names. `None` means the subagent inherits the full
    /// parent registry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,
    #[serde(default)]
    pub model: ModelChoice,
}

/// Per-agent execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_budget_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_thinking_tokens: Option<u32>,
    #[serde(default)]
    pub permission_mode: PermissionMode,
    #[serde(default)]
    pub file_checkpointing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    #[serde(default)]
    pub resource_limits: ResourceLimits,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_turns: None,
            max_budget_usd: None,
            max_thinking_tokens: None,
            permission_mode: PermissionMode::default(),
            file_checkpointing: false,
            working_directory: None,
            resource_limits: ResourceLimits::default(),
        }
    }
}

/// How tool-permission prompts behave for this agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    #[default]
    Default,
    AcceptEdits,
    BypassPermissions,
    Plan,
}

/// Caps applied to every tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLimits {
    /// Maximum characters returned from a single tool call.
    #[serde(default = "default_max_result_size")]
    pub max_result_size: usize,
    /// Upper bound on any tool timeout, requested or not.
    #[serde(default = "default_max_tool_timeout_ms")]
    pub max_tool_timeout_ms: u64,
    /// Attach remediation hints to tool failures.
    #[serde(default = "default_include_error_hints")]
    pub include_error_hints: bool,
}

fn default_max_result_size() -> usize {
    50_000
}
fn default_max_tool_timeout_ms() -> u64 {
    60_000
}
fn default_include_error_hints() -> bool {
    true
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_result_size: default_max_result_size(),
            max_tool_timeout_ms: default_max_tool_timeout_ms(),
            include_error_hints: default_include_error_hints(),
        }
    }
}

/// One hook entry: an optional matcher pattern plus the snippet to run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matcher: Option<String>,
    pub code: String,
}

/// A user-defined tool backed by an evaluated handler snippet.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomToolConfig {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub handler_code: String,
}

/// Opaque reference to an MCP connection; declared on the plan and
/// resolved entirely by the protocol client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpConnectionRef {
    pub name: String,
    pub url: String,
}

/// OAuth connector providers with built-in tool surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorProvider {
    Gmail,
    Drive,
    Slack,
    Notion,
    Github,
}

/// Lifecycle state of a connector connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorStatus {
    #[default]
    Disconnected,
    Connected,
    Error,
}

/// A reference to a connector connection owned by an external OAuth flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorRef {
    pub connection_id: String,
    pub provider: ConnectorProvider,
    #[serde(default)]
    pub status: ConnectorStatus,
}

/// What to do when a tool call fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPolicy {
    /// Surface tool failures to the model and keep going (the default)
    /// rather than failing the session.
    #[serde(default = "default_true")]
    pub continue_on_tool_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_consecutive_failures: Option<u32>,
}

fn default_true() -> bool {
    true
}

/// Static and dynamic context injected into the system prompt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_context: Option<String>,
    /// Snippet evaluated in the restricted interpreter; its result is
    /// appended to the context section.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic_loader: Option<String>,
}

/// Escape hatches that rarely need touching.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvancedOptions {
    #[serde(default)]
    pub betas: Vec<String>,
    /// Permission-callback snippet, evaluated per tool call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_use_tool: Option<String>,
    #[serde(default)]
    pub setting_sources: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub disable_platform_guidelines: bool,
}

// ============================================================================
// Session-level records
// ============================================================================

/// Lifecycle status of one agent run (root or subagent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Initializing,
    Running,
    WaitingForUser,
    WaitingForPermission,
    Completed,
    Failed,
    Interrupted,
}

impl ExecutionStatus {
    /// Terminal statuses are never overwritten.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Interrupted
        )
    }
}

/// A single message observed during execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub uuid: String,
    pub session_id: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Links subagent output back to the `Task` tool use that spawned it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_tool_use_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    User,
    Assistant,
    System,
    ToolResult,
    Partial,
}

/// Status of a single tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// One tool invocation and its outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    pub status: ToolCallStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One completed step in the progress journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedStep {
    pub step: String,
    pub result: String,
}

/// Resumable journal of phase and completed steps, persisted inside the
/// sandbox at `/scratch/claude-progress.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressState {
    pub session_id: String,
    pub task_description: String,
    pub started_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub current_phase: String,
    #[serde(default)]
    pub completed_steps: Vec<CompletedStep>,
    #[serde(default)]
    pub pending_steps: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl ProgressState {
    /// Fresh state for a session that has no journal yet.
    pub fn new(session_id: &str, task_description: &str) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.to_string(),
            task_description: task_description.to_string(),
            started_at: now,
            last_updated_at: now,
            current_phase: "gathering_context".to_string(),
            completed_steps: Vec::new(),
            pending_steps: Vec::new(),
            notes: None,
        }
    }

    /// Record a completed step. `completed_steps` is append-only.
    pub fn complete_step(&mut self, step: impl Into<String>, result: impl Into<String>) {
        self.completed_steps.push(CompletedStep {
            step: step.into(),
            result: result.into(),
        });
        self.touch();
    }

    pub fn set_phase(&mut self, phase: impl Into<String>) {
        self.current_phase = phase.into();
        self.touch();
    }

    pub fn touch(&mut self) {
        self.last_updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_limit_defaults() {
        let limits = ResourceLimits::default();
        assert_eq!(limits.max_result_size, 50_000);
        assert_eq!(limits.max_tool_timeout_ms, 60_000);
        assert!(limits.include_error_hints);
    }

    #[test]
    fn test_orchestrator_detection() {
        let mut config = minimal_config();
        assert!(!config.is_orchestrator());

        config.subagents.insert(
            "Analyzer".to_string(),
            SubagentConfig {
                description: "analyzes things".to_string(),
                prompt: "You analyze.".to_string(),
                tools: None,
                model: ModelChoice::Inherit,
            },
        );
        assert!(config.is_orchestrator());
    }

    #[test]
    fn test_model_choice_resolve() {
        assert_eq!(ModelChoice::Inherit.resolve(ModelChoice::Opus), ModelChoice::Opus);
        assert_eq!(ModelChoice::Haiku.resolve(ModelChoice::Opus), ModelChoice::Haiku);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Interrupted.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(!ExecutionStatus::WaitingForUser.is_terminal());
    }

    #[test]
    fn test_progress_state_roundtrip_preserves_fields() {
        let mut state = ProgressState::new("sess-1", "port the parser");
        state.set_phase("analysis");
        state.complete_step("cloned repo", "success");

        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"sessionId\""));
        assert!(json.contains("\"currentPhase\":\"analysis\""));

        let back: ProgressState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.session_id, state.session_id);
        assert_eq!(back.completed_steps, state.completed_steps);
        assert_eq!(back.current_phase, "analysis");
    }

    #[test]
    fn test_progress_last_updated_never_precedes_start() {
        let mut state = ProgressState::new("sess-1", "task");
        state.touch();
        assert!(state.last_updated_at >= state.started_at);
    }

    #[test]
    fn test_agent_config_deserializes_with_defaults() {
        let json = r#"{
            "id": "a1",
            "name": "researcher",
            "systemPrompt": "You research."
        }"#;
        let config: AgentConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.model, ModelChoice::Sonnet);
        assert!(config.subagents.is_empty());
        assert_eq!(config.settings.resource_limits.max_result_size, 50_000);
    }

    pub(crate) fn minimal_config() -> AgentConfig {
        AgentConfig {
            id: "agent-1".to_string(),
            name: "test-agent".to_string(),
            description: String::new(),
            system_prompt: "You are a test agent.".to_string(),
            model: ModelChoice::Sonnet,
            tools: ToolSelection::default(),
            subagents: BTreeMap::new(),
            settings: AgentSettings::default(),
            hooks: HashMap::new(),
            output_schema: None,
            mcp_connections: Vec::new(),
            connectors: Vec::new(),
            custom_tools: Vec::new(),
            skills: Vec::new(),
            error_policy: None,
            context: None,
            advanced: None,
        }
    }
}
