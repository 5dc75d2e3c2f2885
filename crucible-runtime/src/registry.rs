//! The process-wide engine registry.
//!
//! HTTP handlers are short-lived; the registry lets them reach the live
//! [`ExecutionEngine`](crate::ExecutionEngine) that owns a streaming
//! session, to interrupt it or deliver an answer. The registry stores
//! weak references: lookup plus a lifecycle signal, never ownership.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::engine::ExecutionEngine;

/// Session id → live engine, weakly held.
#[derive(Clone, Default)]
pub struct EngineRegistry {
    inner: Arc<RwLock<HashMap<String, Weak<ExecutionEngine>>>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an engine under its session id. Called at execute start.
    pub fn register(&self, engine: &Arc<ExecutionEngine>) {
        self.inner
            .write()
            .insert(engine.session_id().to_string(), Arc::downgrade(engine));
    }

    /// Fetch the live engine for a session, pruning a dead entry.
    pub fn get(&self, session_id: &str) -> Option<Arc<ExecutionEngine>> {
        {
            let table = self.inner.read();
            if let Some(weak) = table.get(session_id) {
                if let Some(engine) = weak.upgrade() {
                    return Some(engine);
                }
            } else {
                return None;
            }
        }
        // The entry exists but its engine is gone.
        self.inner.write().remove(session_id);
        None
    }

    /// Remove a session's entry. Called at engine destroy.
    pub fn unregister(&self, session_id: &str) {
        self.inner.write().remove(session_id);
    }

    /// Session ids with live engines.
    pub fn sessions(&self) -> Vec<String> {
        self.inner
            .read()
            .iter()
            .filter(|(_, weak)| weak.strong_count() > 0)
            .map(|(id, _)| id.clone())
            .collect()
    }
}
