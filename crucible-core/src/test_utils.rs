//! Scripted protocol client for tests.
//!
//! `MockClient` plays back a fixed sequence of [`ClientEvent`]s and
//! records the plan it was started with, so engine and compiler tests can
//! assert on both sides of the seam without a live model.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::client::{
    ClientError, ClientEvent, EventStream, ExecutionPlan, ProtocolClient, ResultStatus,
};
use crate::types::PermissionMode;

/// A protocol client that replays a scripted event sequence.
#[derive(Clone, Default)]
pub struct MockClient {
    events: Arc<Mutex<Vec<ClientEvent>>>,
    started_with: Arc<Mutex<Option<(String, ExecutionPlan)>>>,
    interrupted: Arc<Mutex<bool>>,
    model_changes: Arc<Mutex<Vec<String>>>,
    mode_changes: Arc<Mutex<Vec<PermissionMode>>>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an event for playback.
    pub fn push(self, event: ClientEvent) -> Self {
        self.events.lock().push(event);
        self
    }

    /// Queue a successful terminal result.
    pub fn push_success(self) -> Self {
        self.push(ClientEvent::Result {
            status: ResultStatus::Success,
            reason: None,
            usage: None,
        })
    }

    /// The prompt and plan from the last `start` call.
    pub fn started_with(&self) -> Option<(String, ExecutionPlan)> {
        self.started_with.lock().clone()
    }

    pub fn was_interrupted(&self) -> bool {
        *self.interrupted.lock()
    }

    pub fn model_changes(&self) -> Vec<String> {
        self.model_changes.lock().clone()
    }

    pub fn mode_changes(&self) -> Vec<PermissionMode> {
        self.mode_changes.lock().clone()
    }
}

#[async_trait]
impl ProtocolClient for MockClient {
    async fn start(&self, prompt: &str, plan: ExecutionPlan) -> Result<EventStream, ClientError> {
        *self.started_with.lock() = Some((prompt.to_string(), plan));
        let events: Vec<ClientEvent> = self.events.lock().drain(..).collect();
        Ok(Box::pin(futures::stream::iter(events.into_iter().map(Ok))))
    }

    async fn interrupt(&self) -> Result<(), ClientError> {
        *self.interrupted.lock() = true;
        Ok(())
    }

    async fn set_permission_mode(&self, mode: PermissionMode) -> Result<(), ClientError> {
        self.mode_changes.lock().push(mode);
        Ok(())
    }

    async fn set_model(&self, model: &str) -> Result<(), ClientError> {
        self.model_changes.lock().push(model.to_string());
        Ok(())
    }
}
