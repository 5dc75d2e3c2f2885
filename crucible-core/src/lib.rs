//! Core types and seams for the crucible agent runtime.
//!
//! This crate holds everything the rest of the workspace agrees on:
//!
//! - the declarative agent model ([`AgentConfig`] and friends)
//! - the protocol-client seam ([`ProtocolClient`], [`ExecutionPlan`],
//!   tool servers, hooks, permission decisions)
//! - the normalized event stream shape ([`ExecutionEvent`])
//! - the safe code evaluator for user-supplied snippets ([`CodeEvaluator`])
//! - the execution tracker ([`ExecutionTracker`]) and session config store
//!
//! The pieces that touch Docker live in `crucible-sandbox`; the config
//! compiler and execution engine live in `crucible-runtime`.

pub mod client;
pub mod error;
pub mod eval;
pub mod events;
pub mod session_store;
pub mod tracker;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use client::{
    AssistantMessage, ClientError, ClientEvent, CompiledHook, ContentBlock, EventStream,
    ExecutionPlan, HookEvent, HookInput, HookOutcome, HookRegistration, PermissionCallback,
    PermissionContext, PermissionDecision, PlanMetadata, ProtocolClient, ResultStatus,
    RewindReport, SubagentProfile, ToolEntry, ToolHandler, ToolOutput, ToolServer, ToolUseRequest,
    UsageStats,
};
pub use error::{Error, Result};
pub use eval::{CodeEvaluator, EvalError, EvalSite};
pub use events::ExecutionEvent;
pub use session_store::{sanitize_session_id, SessionConfigStore, StoreError, StoredSession};
pub use tracker::{
    ExecutionMetrics, ExecutionNode, ExecutionTracker, TimelineEvent,
};
pub use types::{
    AdvancedOptions, AgentConfig, AgentSettings, CompletedStep, ConnectorProvider, ConnectorRef,
    ConnectorStatus, ContextConfig, CustomToolConfig, ErrorPolicy, ExecutionStatus, HookEntry,
    McpConnectionRef, Message, MessageKind, ModelChoice, PermissionMode, ProgressState,
    ResourceLimits, SubagentConfig, ToolCallRecord, ToolCallStatus, ToolSelection,
};
