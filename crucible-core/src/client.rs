//! The seam between the runtime and the LLM protocol client.
//!
//! The client itself is an external collaborator; this module defines what
//! the runtime hands it (an [`ExecutionPlan`]), what it hands back (a
//! stream of [`ClientEvent`]s), and the two interception points every
//! client must honor: the per-call permission decision and the hook
//! dispatch table.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{McpConnectionRef, PermissionMode};

/// Errors surfaced by a protocol client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The client does not implement an optional capability.
    #[error("client does not support {0}")]
    Unsupported(&'static str),

    /// The wire protocol broke down mid-stream.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The client reported a fatal failure.
    #[error("client failed: {0}")]
    Failed(String),
}

/// Event stream produced by [`ProtocolClient::start`].
pub type EventStream = Pin<Box<dyn Stream<Item = Result<ClientEvent, ClientError>> + Send>>;

/// A tool use requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolUseRequest {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// One assistant turn: optional text plus zero or more tool uses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssistantMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub tool_uses: Vec<ToolUseRequest>,
}

/// Terminal outcome reported by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    Failure,
}

/// Token accounting attached to the terminal result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub turns: u32,
}

/// Raw events emitted by a protocol client, before the engine normalizes
/// them for consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// A full assistant message (text and/or tool uses).
    Assistant {
        message: AssistantMessage,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_tool_use_id: Option<String>,
    },
    /// The outcome of a tool call the client executed through a tool
    /// server.
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_tool_use_id: Option<String>,
    },
    /// Incremental assistant text.
    Partial { delta: String },
    /// Client-side bookkeeping (subagent lifecycle, compaction, etc.).
    System {
        subtype: String,
        #[serde(default)]
        data: Value,
    },
    /// Terminal event; the stream ends after this.
    Result {
        status: ResultStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<UsageStats>,
    },
}

// ============================================================================
// Tool servers
// ============================================================================

/// A single content block in a tool result. Only text blocks exist on
/// this protocol surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: text.into(),
        }
    }
}

/// The uniform result shape every tool handler produces:
/// `{ content: [{type:'text', text}], isError? }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutput {
    pub content: Vec<ContentBlock>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::text(text)],
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::text(text)],
            is_error: true,
        }
    }

    /// Concatenated text of all content blocks.
    pub fn as_text(&self) -> String {
        self.content
            .iter()
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Object-safe handler behind each tool. Handlers never fail at the Rust
/// level; failures are carried in the output's `is_error`.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, input: Value) -> ToolOutput;
}

/// One tool exposed by a tool server.
#[derive(Clone)]
pub struct ToolEntry {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub handler: Arc<dyn ToolHandler>,
}

impl std::fmt::Debug for ToolEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolEntry")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// A named, versioned set of tools. Servers are constructed per session
/// because their handlers close over the session's container handle and
/// resource limits.
#[derive(Debug, Clone)]
pub struct ToolServer {
    pub name: String,
    pub version: String,
    pub tools: Vec<ToolEntry>,
}

impl ToolServer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: "1.0.0".to_string(),
            tools: Vec::new(),
        }
    }

    pub fn with_tool(mut self, entry: ToolEntry) -> Self {
        self.tools.push(entry);
        self
    }

    pub fn find(&self, tool_name: &str) -> Option<&ToolEntry> {
        self.tools.iter().find(|t| t.name == tool_name)
    }

    /// Tool names qualified with this server's namespace
    /// (`<server>:<tool>`).
    pub fn qualified_names(&self) -> Vec<String> {
        self.tools
            .iter()
            .map(|t| format!("{}:{}", self.name, t.name))
            .collect()
    }
}

// ============================================================================
// Permission decisions
// ============================================================================

/// Where a tool call originated. `subagent_id` is `None` for calls made
/// by the parent agent itself.
#[derive(Debug, Clone, Default)]
pub struct PermissionContext {
    pub session_id: String,
    pub subagent_id: Option<String>,
}

/// Outcome of the interception callback invoked for every tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum PermissionDecision {
    /// Proceed, optionally with modified input.
    Allow { updated_input: Option<Value> },
    /// Refuse, with a reason the model can read.
    Deny { reason: String, interrupt: bool },
}

impl PermissionDecision {
    pub fn allow() -> Self {
        Self::Allow { updated_input: None }
    }

    pub fn allow_with(input: Value) -> Self {
        Self::Allow {
            updated_input: Some(input),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self::Deny {
            reason: reason.into(),
            interrupt: false,
        }
    }
}

/// The `canUseTool` interception point installed on the plan.
#[async_trait]
pub trait PermissionCallback: Send + Sync {
    async fn decide(
        &self,
        tool_name: &str,
        input: Value,
        context: &PermissionContext,
    ) -> PermissionDecision;
}

// ============================================================================
// Hooks
// ============================================================================

/// Lifecycle events a hook can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HookEvent {
    PreToolUse,
    PostToolUse,
    PostToolUseFailure,
    SubagentStart,
    SubagentStop,
    SessionStart,
    SessionEnd,
}

impl HookEvent {
    /// Parse a *current* event name. Legacy names are migrated before
    /// parsing, in the config compiler.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "PreToolUse" => Some(Self::PreToolUse),
            "PostToolUse" => Some(Self::PostToolUse),
            "PostToolUseFailure" => Some(Self::PostToolUseFailure),
            "SubagentStart" => Some(Self::SubagentStart),
            "SubagentStop" => Some(Self::SubagentStop),
            "SessionStart" => Some(Self::SessionStart),
            "SessionEnd" => Some(Self::SessionEnd),
            _ => None,
        }
    }
}

/// Input handed to a hook callback.
#[derive(Debug, Clone)]
pub struct HookInput {
    pub event: HookEvent,
    pub session_id: String,
    pub tool_name: Option<String>,
    pub tool_input: Value,
}

/// What a hook decided.
#[derive(Debug, Clone, PartialEq)]
pub enum HookOutcome {
    /// Carry on unchanged.
    Continue,
    /// Carry on with modified tool input.
    UpdateInput(Value),
    /// Stop the call.
    Deny { reason: String },
}

/// A compiled hook callback.
#[async_trait]
pub trait CompiledHook: Send + Sync {
    async fn fire(&self, input: &HookInput) -> HookOutcome;
}

/// Hook entries for one event: a matcher pattern (matched against the
/// tool name; `None` matches everything) and the callbacks to fire.
#[derive(Clone)]
pub struct HookRegistration {
    pub matcher: Option<String>,
    pub callbacks: Vec<Arc<dyn CompiledHook>>,
}

impl HookRegistration {
    /// Whether this registration applies to a tool name.
    pub fn matches(&self, tool_name: &str) -> bool {
        match &self.matcher {
            None => true,
            Some(pattern) => pattern == tool_name || pattern == "*",
        }
    }
}

impl std::fmt::Debug for HookRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistration")
            .field("matcher", &self.matcher)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

// ============================================================================
// The execution plan
// ============================================================================

/// A subagent definition as the client sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubagentProfile {
    pub name: String,
    pub description: String,
    pub prompt: String,
    /// `None` inherits the full parent tool registry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,
    pub model: String,
}

/// Executor-facing facts attached to (but not forwarded with) the plan.
#[derive(Debug, Clone, Default)]
pub struct PlanMetadata {
    pub is_orchestrator: bool,
    pub orchestrator_blocked_tools: Vec<String>,
}

/// Everything the protocol client needs to drive one session.
///
/// Produced by the config compiler; consumed by [`ProtocolClient::start`].
#[derive(Clone, Default)]
pub struct ExecutionPlan {
    pub system_prompt: String,
    pub model: String,
    pub allowed_tools: Vec<String>,
    pub disallowed_tools: Vec<String>,
    pub tool_servers: Vec<ToolServer>,
    pub subagents: Vec<SubagentProfile>,
    pub hooks: HashMap<HookEvent, Vec<HookRegistration>>,
    pub can_use_tool: Option<Arc<dyn PermissionCallback>>,
    pub permission_mode: PermissionMode,
    pub max_turns: Option<u32>,
    pub max_budget_usd: Option<f64>,
    pub max_thinking_tokens: Option<u32>,
    pub output_schema: Option<Value>,
    pub setting_sources: Vec<String>,
    pub env: HashMap<String, String>,
    pub betas: Vec<String>,
    pub mcp_connections: Vec<McpConnectionRef>,
    pub metadata: PlanMetadata,
}

impl std::fmt::Debug for ExecutionPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionPlan")
            .field("model", &self.model)
            .field("allowed_tools", &self.allowed_tools)
            .field("disallowed_tools", &self.disallowed_tools)
            .field("tool_servers", &self.tool_servers.len())
            .field("subagents", &self.subagents.len())
            .field("is_orchestrator", &self.metadata.is_orchestrator)
            .finish_non_exhaustive()
    }
}

impl ExecutionPlan {
    /// Look up a tool handler across every registered server, by
    /// qualified (`server:tool`) or bare name.
    pub fn find_tool(&self, name: &str) -> Option<&ToolEntry> {
        if let Some((server_name, tool_name)) = name.split_once(':') {
            return self
                .tool_servers
                .iter()
                .find(|s| s.name == server_name)
                .and_then(|s| s.find(tool_name));
        }
        self.tool_servers.iter().find_map(|s| s.find(name))
    }
}

// ============================================================================
// The protocol client
// ============================================================================

/// Report from a file-rewind request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewindReport {
    pub files_restored: Vec<String>,
    pub dry_run: bool,
}

/// The external LLM protocol client.
///
/// Only [`ProtocolClient::start`] is mandatory; the optional capabilities
/// default to [`ClientError::Unsupported`] so the engine can probe them.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Begin a session; the returned stream ends after a
    /// [`ClientEvent::Result`].
    async fn start(&self, prompt: &str, plan: ExecutionPlan) -> Result<EventStream, ClientError>;

    /// Stop the in-flight stream as soon as possible.
    async fn interrupt(&self) -> Result<(), ClientError> {
        Err(ClientError::Unsupported("interrupt"))
    }

    async fn set_permission_mode(&self, _mode: PermissionMode) -> Result<(), ClientError> {
        Err(ClientError::Unsupported("set_permission_mode"))
    }

    async fn set_model(&self, _model: &str) -> Result<(), ClientError> {
        Err(ClientError::Unsupported("set_model"))
    }

    /// Restore checkpointed files to the state at a message boundary.
    async fn rewind_files(
        &self,
        _message_uuid: &str,
        _dry_run: bool,
    ) -> Result<RewindReport, ClientError> {
        Err(ClientError::Unsupported("rewind_files"))
    }
}
