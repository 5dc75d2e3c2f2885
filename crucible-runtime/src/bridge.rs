//! Out-of-band question bridging.
//!
//! When the model calls `AskUserQuestion`, the permission callback parks
//! the tool call on this bridge and the session suspends until an external
//! caller (usually an HTTP handler reaching the engine through the
//! registry) delivers the answers. Exactly one question may be pending per
//! session; interrupting the session drops it.

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};

use crate::error::EngineError;

struct Pending {
    request_id: String,
    tx: oneshot::Sender<Value>,
}

/// One-slot channel between a suspended permission decision and the
/// out-of-band answer path.
#[derive(Clone, Default)]
pub struct QuestionBridge {
    inner: Arc<Mutex<Option<Pending>>>,
}

impl QuestionBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a new question. Fails if one is already pending.
    ///
    /// Returns the request id to surface to the caller and the receiver
    /// the permission callback awaits. Dropping the bridge's pending slot
    /// (via [`QuestionBridge::cancel`]) makes the receiver fail, which the
    /// callback maps to an interrupting denial.
    pub async fn begin(&self) -> Result<(String, oneshot::Receiver<Value>), EngineError> {
        let mut slot = self.inner.lock().await;
        if slot.is_some() {
            return Err(EngineError::Client(
                "a question is already pending for this session".to_string(),
            ));
        }
        let request_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        *slot = Some(Pending {
            request_id: request_id.clone(),
            tx,
        });
        Ok((request_id, rx))
    }

    /// Deliver answers for the pending question.
    pub async fn resolve(&self, request_id: &str, answers: Value) -> Result<(), EngineError> {
        let mut slot = self.inner.lock().await;
        match slot.take() {
            Some(pending) if pending.request_id == request_id => {
                // A dropped receiver just means the session moved on.
                let _ = pending.tx.send(answers);
                Ok(())
            }
            Some(pending) => {
                let id = pending.request_id.clone();
                *slot = Some(pending);
                Err(EngineError::AnswerMissing(format!(
                    "{request_id} (pending is {id})"
                )))
            }
            None => Err(EngineError::AnswerMissing(request_id.to_string())),
        }
    }

    /// Drop the pending question, if any. The suspended callback observes
    /// the dropped sender and denies with `interrupt`.
    pub async fn cancel(&self) {
        self.inner.lock().await.take();
    }

    pub async fn has_pending(&self) -> bool {
        self.inner.lock().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_begin_resolve_roundtrip() {
        let bridge = QuestionBridge::new();
        let (request_id, rx) = bridge.begin().await.unwrap();

        bridge
            .resolve(&request_id, json!({"q1": "prod"}))
            .await
            .unwrap();

        let answers = rx.await.unwrap();
        assert_eq!(answers["q1"], "prod");
        assert!(!bridge.has_pending().await);
    }

    #[tokio::test]
    async fn test_only_one_pending() {
        let bridge = QuestionBridge::new();
        let (_id, _rx) = bridge.begin().await.unwrap();
        assert!(bridge.begin().await.is_err());
    }

    #[tokio::test]
    async fn test_resolve_wrong_id() {
        let bridge = QuestionBridge::new();
        let (_id, _rx) = bridge.begin().await.unwrap();

        let err = bridge.resolve("nope", json!({})).await.unwrap_err();
        assert!(matches!(err, EngineError::AnswerMissing(_)));
        // The real question is still pending.
        assert!(bridge.has_pending().await);
    }

    #[tokio::test]
    async fn test_cancel_drops_pending() {
        let bridge = QuestionBridge::new();
        let (_id, rx) = bridge.begin().await.unwrap();

        bridge.cancel().await;
        assert!(rx.await.is_err());
        assert!(!bridge.has_pending().await);
    }
}
