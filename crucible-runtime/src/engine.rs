//! The single-session execution engine.
//!
//! One engine drives one session: it provisions the sandbox (when the
//! agent needs one), initializes or resumes the progress journal, compiles
//! the plan, starts the protocol client, and re-emits its events —
//! normalized — through a cooperative stream. Out-of-band control
//! (questions, interrupts, mode changes) reaches the engine through the
//! [`EngineRegistry`](crate::EngineRegistry); those paths only touch
//! engine-level synchronization, never the tracker mid-iteration.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crucible_core::{
    AgentConfig, ClientEvent, Error, ExecutionEvent, ExecutionStatus, ExecutionTracker, Message,
    MessageKind, PermissionMode, ProgressState, ProtocolClient, RewindReport, ToolCallRecord,
    ToolCallStatus,
};
use crucible_sandbox::{MountSet, SandboxController};
use crucible_tools::AccessTokenProvider;

use crate::bridge::QuestionBridge;
use crate::compiler::{needs_sandbox, CompileContext, ConfigCompiler};
use crate::error::EngineError;
use crate::progress::ProgressJournal;
use crate::registry::EngineRegistry;

/// Everything needed to construct an engine for one session.
pub struct EngineOptions {
    pub session_id: String,
    pub config: AgentConfig,
    pub client: Arc<dyn ProtocolClient>,
    pub controller: SandboxController,
    /// Host working directory; `.scratch/<sessionId>` lives under it.
    pub cwd: PathBuf,
    /// Host home directory, for the read-only project cache mount.
    pub home: Option<PathBuf>,
    pub token_providers: HashMap<String, Arc<dyn AccessTokenProvider>>,
    /// When present, the engine registers itself at execute start and
    /// unregisters at destroy.
    pub registry: Option<EngineRegistry>,
}

/// Drives a single session against the protocol client and the sandbox.
pub struct ExecutionEngine {
    session_id: String,
    config: AgentConfig,
    client: Arc<dyn ProtocolClient>,
    controller: SandboxController,
    cwd: PathBuf,
    home: Option<PathBuf>,
    token_providers: HashMap<String, Arc<dyn AccessTokenProvider>>,
    registry: Option<EngineRegistry>,

    container_id: parking_lot::Mutex<Option<String>>,
    tracker: parking_lot::Mutex<ExecutionTracker>,
    progress: parking_lot::Mutex<Option<ProgressState>>,
    bridge: QuestionBridge,
    interrupted: AtomicBool,
}

impl ExecutionEngine {
    pub fn new(options: EngineOptions) -> Arc<Self> {
        let tracker = ExecutionTracker::new(
            &options.session_id,
            &options.config.name,
            options.config.model.as_str(),
        );
        Arc::new(Self {
            session_id: options.session_id,
            config: options.config,
            client: options.client,
            controller: options.controller,
            cwd: options.cwd,
            home: options.home,
            token_providers: options.token_providers,
            registry: options.registry,
            container_id: parking_lot::Mutex::new(None),
            tracker: parking_lot::Mutex::new(tracker),
            progress: parking_lot::Mutex::new(None),
            bridge: QuestionBridge::new(),
            interrupted: AtomicBool::new(false),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn container_id(&self) -> Option<String> {
        self.container_id.lock().clone()
    }

    /// Snapshot of the current progress state.
    pub fn progress(&self) -> Option<ProgressState> {
        self.progress.lock().clone()
    }

    /// Snapshot of the root execution node.
    pub fn root_node(&self) -> crucible_core::ExecutionNode {
        self.tracker.lock().root().clone()
    }

    /// Flattened timeline of the session so far.
    pub fn timeline(&self) -> Vec<crucible_core::TimelineEvent> {
        self.tracker.lock().timeline()
    }

    /// Execute the session. The returned stream ends after a `Completed`
    /// event (or an error, after cleanup).
    pub fn execute(
        self: Arc<Self>,
        prompt: String,
    ) -> impl Stream<Item = crucible_core::Result<ExecutionEvent>> {
        let engine = self;

        async_stream::try_stream! {
            if let Some(registry) = &engine.registry {
                registry.register(&engine);
            }
            engine.tracker.lock().set_root_status(ExecutionStatus::Running);
            let is_orchestrator = engine.config.is_orchestrator();

            // 1. Sandbox, if the agent or any subagent needs one.
            let journal = if needs_sandbox(&engine.config) {
                let container_id = match engine.ensure_container().await {
                    Ok(id) => id,
                    Err(e) => { engine.cleanup_after_error().await; Err(Error::from(e))? }
                };
                Some(ProgressJournal::new(engine.controller.clone(), &container_id))
            } else {
                None
            };

            // 2. Progress: adopt the journal if present, else start fresh.
            let mut resumed_phase = None;
            let state = match &journal {
                Some(journal) => match journal.read().await {
                    Some(mut state) => {
                        resumed_phase = Some(state.current_phase.clone());
                        state.touch();
                        state
                    }
                    None => ProgressState::new(&engine.session_id, &task_description(&prompt)),
                },
                None => ProgressState::new(&engine.session_id, &task_description(&prompt)),
            };
            if let Some(journal) = &journal {
                journal.write(&state).await;
            }
            *engine.progress.lock() = Some(state.clone());

            // 3. Compile the plan; the side channel carries events raised
            //    from inside permission decisions.
            let (events_tx, mut side_rx) = mpsc::unbounded_channel();
            let container_id = engine.container_id();
            let compile_result = ConfigCompiler::new()
                .compile(&engine.config, CompileContext {
                    session_id: &engine.session_id,
                    controller: container_id.is_some().then_some(&engine.controller),
                    container_id: container_id.as_deref(),
                    token_providers: &engine.token_providers,
                    bridge: engine.bridge.clone(),
                    events: events_tx,
                })
                .await;
            let mut plan = match compile_result {
                Ok(plan) => plan,
                Err(e) => { engine.cleanup_after_error().await; Err(Error::from(EngineError::from(e)))? }
            };

            // 4. Resuming with completed steps feeds the model a summary.
            if !state.completed_steps.is_empty() {
                plan.system_prompt.push_str(&crate::prompts::progress_resume_block(&state));
            }

            let started = ExecutionEvent::Started {
                session_id: engine.session_id.clone(),
                is_orchestrator,
                resumed_phase,
            };
            engine.tracker.lock().record_event(&started);
            yield started;

            let progress_event = ExecutionEvent::ProgressUpdated { state };
            engine.tracker.lock().record_event(&progress_event);
            yield progress_event;

            // 5. Drive the client stream, merging in side-channel events.
            let stream_result = engine.client.start(&prompt, plan).await;
            let mut stream = match stream_result {
                Ok(stream) => stream,
                Err(e) => {
                    error!(session_id = %engine.session_id, error = %e, "client failed to start");
                    engine.cleanup_after_error().await;
                    Err(Error::from(EngineError::Client(e.to_string())))?
                }
            };

            info!(session_id = %engine.session_id, is_orchestrator, "session started");

            enum Step {
                Side(Option<ExecutionEvent>),
                Client(Option<Result<ClientEvent, crucible_core::ClientError>>),
            }

            let mut side_open = true;
            loop {
                let step = tokio::select! {
                    side = side_rx.recv(), if side_open => Step::Side(side),
                    next = stream.next() => Step::Client(next),
                };
                match step {
                    Step::Side(Some(event)) => {
                        engine.note_side_event(&event);
                        yield event;
                    }
                    // Every sender is gone; stop polling the side channel.
                    Step::Side(None) => side_open = false,
                    Step::Client(Some(Ok(client_event))) => {
                        let terminal = matches!(client_event, ClientEvent::Result { .. });
                        for event in engine.classify(client_event, &journal).await {
                            engine.tracker.lock().record_event(&event);
                            yield event;
                        }
                        if terminal {
                            break;
                        }
                    }
                    Step::Client(Some(Err(e))) => {
                        error!(session_id = %engine.session_id, error = %e, "client stream failed");
                        engine.tracker.lock().finish(ExecutionStatus::Failed, None);
                        engine.cleanup_after_error().await;
                        Err(Error::from(EngineError::Client(e.to_string())))?
                    }
                    Step::Client(None) => {
                        // Stream ended without a terminal result.
                        let status = if engine.interrupted.load(Ordering::SeqCst) {
                            ExecutionStatus::Interrupted
                        } else {
                            ExecutionStatus::Completed
                        };
                        engine.tracker.lock().finish(status, None);
                        let event = ExecutionEvent::Completed { status, reason: None, usage: None };
                        engine.tracker.lock().record_event(&event);
                        yield event;
                        break;
                    }
                }
            }
        }
    }

    /// Classify one raw client event into normalized events, updating the
    /// tracker along the way.
    async fn classify(
        &self,
        event: ClientEvent,
        journal: &Option<ProgressJournal>,
    ) -> Vec<ExecutionEvent> {
        let mut out = Vec::new();
        match event {
            ClientEvent::Assistant {
                message,
                parent_tool_use_id,
            } => {
                if let Some(text) = message.text.filter(|t| !t.is_empty()) {
                    self.tracker.lock().add_message(Message {
                        uuid: uuid::Uuid::new_v4().to_string(),
                        session_id: self.session_id.clone(),
                        kind: MessageKind::Assistant,
                        content: text.clone(),
                        timestamp: Utc::now(),
                        parent_tool_use_id: parent_tool_use_id.clone(),
                    });
                    out.push(ExecutionEvent::AssistantText {
                        text,
                        parent_tool_use_id: parent_tool_use_id.clone(),
                    });
                }
                for tool_use in message.tool_uses {
                    let mut tracker = self.tracker.lock();
                    tracker.add_tool_call(
                        parent_tool_use_id.as_deref(),
                        ToolCallRecord {
                            id: tool_use.id.clone(),
                            name: tool_use.name.clone(),
                            input: tool_use.input.clone(),
                            output: None,
                            status: ToolCallStatus::Running,
                            timestamp: Utc::now(),
                            duration_ms: None,
                            error: None,
                        },
                    );
                    if tool_use.name == "Task" {
                        let agent_name = tool_use
                            .input
                            .get("subagent_type")
                            .and_then(Value::as_str)
                            .unwrap_or("subagent")
                            .to_string();
                        tracker.start_subagent(&tool_use.id, &agent_name);
                        out.push(ExecutionEvent::SubagentStarted {
                            node_id: tool_use.id.clone(),
                            agent_name,
                        });
                    }
                    drop(tracker);
                    out.push(ExecutionEvent::ToolUse {
                        tool_use_id: tool_use.id,
                        name: tool_use.name,
                        input: tool_use.input,
                        parent_tool_use_id: parent_tool_use_id.clone(),
                    });
                }
            }
            ClientEvent::ToolResult {
                tool_use_id,
                content,
                is_error,
                parent_tool_use_id,
            } => {
                let mut tracker = self.tracker.lock();
                tracker.complete_tool_call(
                    &tool_use_id,
                    (!is_error).then(|| content.clone()),
                    is_error.then(|| content.clone()),
                    None,
                );
                tracker.add_message(Message {
                    uuid: uuid::Uuid::new_v4().to_string(),
                    session_id: self.session_id.clone(),
                    kind: MessageKind::ToolResult,
                    content: content.clone(),
                    timestamp: Utc::now(),
                    parent_tool_use_id: parent_tool_use_id.clone(),
                });
                // A result for a Task tool use closes that subagent node.
                if tracker.node(&tool_use_id).is_some() {
                    let status = if is_error {
                        ExecutionStatus::Failed
                    } else {
                        ExecutionStatus::Completed
                    };
                    tracker.set_status(&tool_use_id, status);
                    out.push(ExecutionEvent::SubagentStopped {
                        node_id: tool_use_id.clone(),
                    });
                }
                drop(tracker);
                out.push(ExecutionEvent::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                });
            }
            ClientEvent::Partial { delta } => {
                out.push(ExecutionEvent::Partial { delta });
            }
            ClientEvent::System { subtype, data } => {
                if subtype == "subagent_stop" {
                    if let Some(node_id) = data.get("tool_use_id").and_then(Value::as_str) {
                        self.tracker
                            .lock()
                            .set_status(node_id, ExecutionStatus::Completed);
                        out.push(ExecutionEvent::SubagentStopped {
                            node_id: node_id.to_string(),
                        });
                        return out;
                    }
                }
                out.push(ExecutionEvent::System { subtype, data });
            }
            ClientEvent::Result {
                status,
                reason,
                usage,
            } => {
                let status = match status {
                    crucible_core::ResultStatus::Success => ExecutionStatus::Completed,
                    crucible_core::ResultStatus::Failure => {
                        // The client's failure result is logged, not thrown.
                        error!(
                            session_id = %self.session_id,
                            reason = reason.as_deref().unwrap_or("unspecified"),
                            "client reported failure"
                        );
                        ExecutionStatus::Failed
                    }
                };
                self.tracker.lock().finish(status, usage);

                if let Some(journal) = journal {
                    let snapshot = {
                        let mut guard = self.progress.lock();
                        if let Some(state) = guard.as_mut() {
                            state.touch();
                        }
                        guard.clone()
                    };
                    if let Some(state) = snapshot {
                        journal.write(&state).await;
                    }
                }

                out.push(ExecutionEvent::Completed {
                    status,
                    reason,
                    usage,
                });
            }
        }
        out
    }

    /// Record tracker-relevant side-channel events.
    fn note_side_event(&self, event: &ExecutionEvent) {
        let mut tracker = self.tracker.lock();
        match event {
            ExecutionEvent::QuestionPending {
                request_id,
                questions,
            } => {
                tracker.record_question(request_id, questions.clone());
                tracker.set_root_status(ExecutionStatus::WaitingForUser);
            }
            ExecutionEvent::PermissionDenied { tool_name, reason } => {
                tracker.record_permission(tool_name, false, Some(reason.clone()));
            }
            _ => {}
        }
        tracker.record_event(event);
    }

    async fn ensure_container(&self) -> Result<String, EngineError> {
        if !self.controller.is_available().await {
            return Err(EngineError::Sandbox(
                crucible_sandbox::SandboxError::EngineUnavailable(
                    "engine did not answer ping".to_string(),
                ),
            ));
        }
        self.controller.ensure_image().await?;

        let mounts = MountSet::for_session(&self.cwd, self.home.as_deref(), &self.session_id)
            .map_err(|e| {
                EngineError::Sandbox(crucible_sandbox::SandboxError::Lifecycle(format!(
                    "scratch directory: {e}"
                )))
            })?;
        let container_id = self.controller.create(&self.session_id, &mounts).await?;
        *self.container_id.lock() = Some(container_id.clone());
        Ok(container_id)
    }

    async fn cleanup_after_error(&self) {
        warn!(session_id = %self.session_id, "cleaning up after error");
        self.bridge.cancel().await;
        let _ = self.destroy().await;
    }

    /// Interrupt the session: forward to the client if it supports it,
    /// then drop any pending question.
    pub async fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        if let Err(e) = self.client.interrupt().await {
            debug!(session_id = %self.session_id, error = %e, "client interrupt unsupported");
        }
        self.bridge.cancel().await;
        self.tracker
            .lock()
            .set_root_status(ExecutionStatus::Interrupted);
    }

    /// Deliver answers to the pending `AskUserQuestion`.
    pub async fn resolve_question(
        &self,
        request_id: &str,
        answers: Value,
    ) -> Result<(), EngineError> {
        self.bridge.resolve(request_id, answers).await?;
        let mut tracker = self.tracker.lock();
        tracker.mark_question_answered(request_id);
        tracker.set_root_status(ExecutionStatus::Running);
        Ok(())
    }

    pub async fn set_permission_mode(&self, mode: PermissionMode) -> Result<(), EngineError> {
        self.client
            .set_permission_mode(mode)
            .await
            .map_err(|e| EngineError::Client(e.to_string()))
    }

    pub async fn set_model(&self, model: &str) -> Result<(), EngineError> {
        self.client
            .set_model(model)
            .await
            .map_err(|e| EngineError::Client(e.to_string()))
    }

    /// Restore checkpointed files to a message boundary (requires
    /// file-checkpointing in the agent settings).
    pub async fn rewind_files(
        &self,
        message_uuid: &str,
        dry_run: bool,
    ) -> Result<RewindReport, EngineError> {
        if !self.config.settings.file_checkpointing {
            return Err(EngineError::Client(
                "file checkpointing is not enabled for this agent".to_string(),
            ));
        }
        self.tracker.lock().record_checkpoint(message_uuid);
        self.client
            .rewind_files(message_uuid, dry_run)
            .await
            .map_err(|e| EngineError::Client(e.to_string()))
    }

    /// Destroy the session's container and unregister the engine.
    pub async fn destroy(&self) -> Result<(), EngineError> {
        let container = self.container_id.lock().take();
        if container.is_some() {
            match self.controller.destroy_by_session(&self.session_id).await {
                Ok(()) | Err(crucible_sandbox::SandboxError::UnknownSession(_)) => {}
                Err(e) => {
                    warn!(session_id = %self.session_id, error = %e, "container destroy failed");
                }
            }
        }
        if let Some(registry) = &self.registry {
            registry.unregister(&self.session_id);
        }
        Ok(())
    }
}

/// Short task description derived from the prompt for fresh progress
/// states.
fn task_description(prompt: &str) -> String {
    const MAX: usize = 200;
    if prompt.chars().count() <= MAX {
        prompt.to_string()
    } else {
        let truncated: String = prompt.chars().take(MAX).collect();
        format!("{truncated}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_description_truncates() {
        assert_eq!(task_description("short"), "short");
        let long = "x".repeat(300);
        let desc = task_description(&long);
        assert_eq!(desc.chars().count(), 201);
        assert!(desc.ends_with('…'));
    }
}
