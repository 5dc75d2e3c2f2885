//! Normalized events yielded by the execution engine.
//!
//! The engine classifies raw protocol-client events and re-emits them in
//! this shape. Consumers (HTTP handlers, trackers, tests) only ever see
//! these; the raw client surface stays private to the engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::UsageStats;
use crate::types::{ExecutionStatus, ProgressState};

/// One event in a session's execution stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// Emitted once, before anything else.
    Started {
        session_id: String,
        is_orchestrator: bool,
        /// Present when the session resumed from a progress journal.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resumed_phase: Option<String>,
    },

    /// Assistant prose.
    AssistantText {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_tool_use_id: Option<String>,
    },

    /// The model requested a tool.
    ToolUse {
        tool_use_id: String,
        name: String,
        input: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_tool_use_id: Option<String>,
    },

    /// A tool call finished.
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },

    /// Incremental assistant text.
    Partial { delta: String },

    /// A subagent began running under a `Task` tool use.
    SubagentStarted {
        node_id: String,
        agent_name: String,
    },

    /// A subagent finished.
    SubagentStopped { node_id: String },

    /// The session is suspended on a question only the caller can answer.
    QuestionPending {
        request_id: String,
        questions: Value,
    },

    /// A tool call was refused by policy.
    PermissionDenied {
        tool_name: String,
        reason: String,
    },

    /// The progress journal changed.
    ProgressUpdated { state: ProgressState },

    /// Client-side bookkeeping passthrough.
    System { subtype: String, data: Value },

    /// Terminal event; the stream ends after this.
    Completed {
        status: ExecutionStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<UsageStats>,
    },
}

impl ExecutionEvent {
    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionEvent::Completed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialized_tag_shape() {
        let event = ExecutionEvent::ToolUse {
            tool_use_id: "tu_1".into(),
            name: "Read".into(),
            input: serde_json::json!({"file_path": "/scratch/a"}),
            parent_tool_use_id: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "tool_use");
        assert_eq!(json["name"], "Read");
    }

    #[test]
    fn test_terminal_detection() {
        let done = ExecutionEvent::Completed {
            status: ExecutionStatus::Completed,
            reason: None,
            usage: None,
        };
        assert!(done.is_terminal());
        assert!(!ExecutionEvent::Partial { delta: "x".into() }.is_terminal());
    }
}
