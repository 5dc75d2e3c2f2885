//! Hierarchical execution tracking.
//!
//! The tracker builds a tree of [`ExecutionNode`]s (root + subagents) from
//! the event stream. Children are referenced by id, never by back-pointer;
//! a subagent node's id is the `Task` tool-use id that spawned it, which is
//! also how messages carrying `parent_tool_use_id` find their node.
//!
//! Every ephemeral store is FIFO-capped to bound memory for long sessions.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::UsageStats;
use crate::events::ExecutionEvent;
use crate::types::{ExecutionStatus, Message, ToolCallRecord, ToolCallStatus};

pub const MAX_EVENTS: usize = 500;
pub const MAX_TOOL_CALLS: usize = 200;
pub const MAX_CHECKPOINTS: usize = 100;
pub const MAX_PERMISSIONS: usize = 50;
pub const MAX_QUESTIONS: usize = 50;
pub const MAX_MESSAGES: usize = 1000;

/// One agent run in the execution tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionNode {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub session_id: String,
    /// `root` or `subagent`.
    pub agent_type: String,
    pub agent_name: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub messages: VecDeque<Message>,
    pub tool_calls: VecDeque<ToolCallRecord>,
    /// Child node ids, in start order.
    pub children: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ExecutionMetrics>,
}

impl ExecutionNode {
    fn new(
        id: String,
        parent_id: Option<String>,
        session_id: &str,
        agent_type: &str,
        agent_name: &str,
    ) -> Self {
        Self {
            id,
            parent_id,
            session_id: session_id.to_string(),
            agent_type: agent_type.to_string(),
            agent_name: agent_name.to_string(),
            status: ExecutionStatus::Initializing,
            started_at: Utc::now(),
            ended_at: None,
            messages: VecDeque::new(),
            tool_calls: VecDeque::new(),
            children: Vec::new(),
            metrics: None,
        }
    }
}

/// Rolled-up metrics, computed at completion by recursive traversal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetrics {
    pub total_turns: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub tool_call_count: usize,
    pub subagent_count: usize,
    pub estimated_cost_usd: f64,
}

/// A permission decision recorded for inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRecord {
    pub tool_name: String,
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A question raised through `AskUserQuestion`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionRecord {
    pub request_id: String,
    pub questions: Value,
    pub answered: bool,
    pub timestamp: DateTime<Utc>,
}

/// A file-checkpoint marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointRecord {
    pub message_uuid: String,
    pub timestamp: DateTime<Utc>,
}

/// One entry in the flattened timeline view.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEvent {
    pub timestamp: DateTime<Utc>,
    /// `start`, `message`, `tool_call`, `subagent`, or `end`.
    pub kind: String,
    pub label: String,
    pub node_id: String,
}

/// Fixed pricing table (USD per million tokens) keyed by model.
fn model_pricing(model: &str) -> (f64, f64) {
    match model {
        "opus" => (15.0, 75.0),
        "haiku" => (0.80, 4.0),
        // sonnet, and anything unrecognized, prices as sonnet.
        _ => (3.0, 15.0),
    }
}

/// Builds and walks the execution tree for one session.
#[derive(Debug)]
pub struct ExecutionTracker {
    session_id: String,
    model: String,
    root_id: String,
    nodes: HashMap<String, ExecutionNode>,
    events: VecDeque<ExecutionEvent>,
    permissions: VecDeque<PermissionRecord>,
    questions: VecDeque<QuestionRecord>,
    checkpoints: VecDeque<CheckpointRecord>,
}

impl ExecutionTracker {
    pub fn new(session_id: &str, agent_name: &str, model: &str) -> Self {
        let root_id = uuid::Uuid::new_v4().to_string();
        let root = ExecutionNode::new(root_id.clone(), None, session_id, "root", agent_name);
        let mut nodes = HashMap::new();
        nodes.insert(root_id.clone(), root);

        Self {
            session_id: session_id.to_string(),
            model: model.to_string(),
            root_id,
            nodes,
            events: VecDeque::new(),
            permissions: VecDeque::new(),
            questions: VecDeque::new(),
            checkpoints: VecDeque::new(),
        }
    }

    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    pub fn node(&self, id: &str) -> Option<&ExecutionNode> {
        self.nodes.get(id)
    }

    pub fn root(&self) -> &ExecutionNode {
        self.nodes.get(&self.root_id).expect("root node exists")
    }

    /// Start a subagent under the root. The node id is the spawning `Task`
    /// tool-use id, so later messages with that `parent_tool_use_id` land
    /// here.
    pub fn start_subagent(&mut self, tool_use_id: &str, agent_name: &str) -> &ExecutionNode {
        let node = ExecutionNode::new(
            tool_use_id.to_string(),
            Some(self.root_id.clone()),
            &self.session_id,
            "subagent",
            agent_name,
        );
        self.nodes.insert(tool_use_id.to_string(), node);
        if let Some(root) = self.nodes.get_mut(&self.root_id) {
            root.children.push(tool_use_id.to_string());
        }
        self.set_status(tool_use_id, ExecutionStatus::Running);
        self.nodes.get(tool_use_id).expect("node just inserted")
    }

    /// Route a message to the node whose id equals its
    /// `parent_tool_use_id`, or to the root.
    pub fn add_message(&mut self, message: Message) {
        let target = message
            .parent_tool_use_id
            .as_deref()
            .filter(|id| self.nodes.contains_key(*id))
            .unwrap_or(&self.root_id)
            .to_string();

        if let Some(node) = self.nodes.get_mut(&target) {
            node.messages.push_back(message);
            while node.messages.len() > MAX_MESSAGES {
                node.messages.pop_front();
            }
        }
    }

    /// Append a tool call to the given node (or the root).
    pub fn add_tool_call(&mut self, node_id: Option<&str>, record: ToolCallRecord) {
        let target = node_id
            .filter(|id| self.nodes.contains_key(*id))
            .unwrap_or(&self.root_id)
            .to_string();

        if let Some(node) = self.nodes.get_mut(&target) {
            node.tool_calls.push_back(record);
            while node.tool_calls.len() > MAX_TOOL_CALLS {
                node.tool_calls.pop_front();
            }
        }
    }

    /// Mark a tool call finished wherever it lives in the tree.
    pub fn complete_tool_call(
        &mut self,
        tool_use_id: &str,
        output: Option<String>,
        error: Option<String>,
        duration_ms: Option<u64>,
    ) {
        for node in self.nodes.values_mut() {
            if let Some(call) = node.tool_calls.iter_mut().find(|c| c.id == tool_use_id) {
                call.status = if error.is_some() {
                    ToolCallStatus::Failed
                } else {
                    ToolCallStatus::Completed
                };
                call.output = output;
                call.error = error;
                call.duration_ms = duration_ms;
                return;
            }
        }
    }

    /// Transition a node's status. Terminal statuses are sticky.
    pub fn set_status(&mut self, node_id: &str, status: ExecutionStatus) {
        if let Some(node) = self.nodes.get_mut(node_id) {
            if node.status.is_terminal() {
                return;
            }
            node.status = status;
            if status.is_terminal() {
                node.ended_at = Some(Utc::now());
            }
        }
    }

    pub fn set_root_status(&mut self, status: ExecutionStatus) {
        let root_id = self.root_id.clone();
        self.set_status(&root_id, status);
    }

    /// Record an event in the bounded event log.
    pub fn record_event(&mut self, event: &ExecutionEvent) {
        push_bounded(&mut self.events, event.clone(), MAX_EVENTS);
    }

    pub fn record_permission(&mut self, tool_name: &str, allowed: bool, reason: Option<String>) {
        push_bounded(
            &mut self.permissions,
            PermissionRecord {
                tool_name: tool_name.to_string(),
                allowed,
                reason,
                timestamp: Utc::now(),
            },
            MAX_PERMISSIONS,
        );
    }

    pub fn record_question(&mut self, request_id: &str, questions: Value) {
        push_bounded(
            &mut self.questions,
            QuestionRecord {
                request_id: request_id.to_string(),
                questions,
                answered: false,
                timestamp: Utc::now(),
            },
            MAX_QUESTIONS,
        );
    }

    pub fn mark_question_answered(&mut self, request_id: &str) {
        if let Some(q) = self.questions.iter_mut().find(|q| q.request_id == request_id) {
            q.answered = true;
        }
    }

    pub fn record_checkpoint(&mut self, message_uuid: &str) {
        push_bounded(
            &mut self.checkpoints,
            CheckpointRecord {
                message_uuid: message_uuid.to_string(),
                timestamp: Utc::now(),
            },
            MAX_CHECKPOINTS,
        );
    }

    pub fn events(&self) -> impl Iterator<Item = &ExecutionEvent> {
        self.events.iter()
    }

    pub fn permissions(&self) -> impl Iterator<Item = &PermissionRecord> {
        self.permissions.iter()
    }

    pub fn questions(&self) -> impl Iterator<Item = &QuestionRecord> {
        self.questions.iter()
    }

    /// Finish the session: close any still-running subagents (their
    /// intervals stay contained in the root's), set the root status, and
    /// compute metrics over the whole tree.
    pub fn finish(&mut self, status: ExecutionStatus, usage: Option<UsageStats>) {
        let child_ids: Vec<String> = self
            .nodes
            .values()
            .filter(|n| n.id != self.root_id && !n.status.is_terminal())
            .map(|n| n.id.clone())
            .collect();
        for id in child_ids {
            self.set_status(&id, ExecutionStatus::Interrupted);
        }

        self.set_root_status(status);
        let metrics = self.compute_metrics(usage);
        if let Some(root) = self.nodes.get_mut(&self.root_id) {
            root.metrics = Some(metrics);
        }
    }

    fn compute_metrics(&self, usage: Option<UsageStats>) -> ExecutionMetrics {
        let tool_call_count = self.count_tool_calls(&self.root_id);
        let subagent_count = self.nodes.len() - 1;
        let usage = usage.unwrap_or_default();

        let (in_price, out_price) = model_pricing(&self.model);
        let estimated_cost_usd = (usage.input_tokens as f64 / 1_000_000.0) * in_price
            + (usage.output_tokens as f64 / 1_000_000.0) * out_price;

        ExecutionMetrics {
            total_turns: usage.turns,
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            tool_call_count,
            subagent_count,
            estimated_cost_usd,
        }
    }

    fn count_tool_calls(&self, node_id: &str) -> usize {
        let Some(node) = self.nodes.get(node_id) else {
            return 0;
        };
        node.tool_calls.len()
            + node
                .children
                .iter()
                .map(|child| self.count_tool_calls(child))
                .sum::<usize>()
    }

    /// Flattened, timestamp-sorted view of everything that happened.
    pub fn timeline(&self) -> Vec<TimelineEvent> {
        let mut events = Vec::new();

        for node in self.nodes.values() {
            let kind = if node.id == self.root_id { "start" } else { "subagent" };
            events.push(TimelineEvent {
                timestamp: node.started_at,
                kind: kind.to_string(),
                label: node.agent_name.clone(),
                node_id: node.id.clone(),
            });
            for message in &node.messages {
                events.push(TimelineEvent {
                    timestamp: message.timestamp,
                    kind: "message".to_string(),
                    label: format!("{:?}", message.kind).to_lowercase(),
                    node_id: node.id.clone(),
                });
            }
            for call in &node.tool_calls {
                events.push(TimelineEvent {
                    timestamp: call.timestamp,
                    kind: "tool_call".to_string(),
                    label: call.name.clone(),
                    node_id: node.id.clone(),
                });
            }
            if let Some(ended) = node.ended_at {
                events.push(TimelineEvent {
                    timestamp: ended,
                    kind: "end".to_string(),
                    label: node.agent_name.clone(),
                    node_id: node.id.clone(),
                });
            }
        }

        events.sort_by_key(|e| e.timestamp);
        events
    }
}

fn push_bounded<T>(queue: &mut VecDeque<T>, item: T, cap: usize) {
    queue.push_back(item);
    while queue.len() > cap {
        queue.pop_front();
    }
}
