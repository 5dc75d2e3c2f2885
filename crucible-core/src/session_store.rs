//! File-backed session configuration store.
//!
//! Short-lived HTTP handlers need to reconstitute an execution without
//! stuffing the whole agent configuration into URLs, so each session's
//! `(AgentConfig, prompt)` pair is kept as a JSON file under
//! `<cwd>/.scratch/_session_configs/<sanitizedSessionId>.json`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::AgentConfig;

/// Errors from the session config store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt session config: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// The persisted record for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSession {
    pub agent_config: AgentConfig,
    pub prompt: String,
    pub created_at: DateTime<Utc>,
}

/// Key→(AgentConfig, prompt) map keyed by session id, one file per key.
#[derive(Debug, Clone)]
pub struct SessionConfigStore {
    root: PathBuf,
}

impl SessionConfigStore {
    /// Store rooted at `<cwd>/.scratch/_session_configs`.
    pub fn new(cwd: &Path) -> Self {
        Self {
            root: cwd.join(".scratch").join("_session_configs"),
        }
    }

    pub fn save(
        &self,
        session_id: &str,
        config: &AgentConfig,
        prompt: &str,
    ) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.root)?;
        let record = StoredSession {
            agent_config: config.clone(),
            prompt: prompt.to_string(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&record)?;
        std::fs::write(self.path_for(session_id), json)?;
        Ok(())
    }

    pub fn load(&self, session_id: &str) -> Result<Option<StoredSession>, StoreError> {
        let path = self.path_for(session_id);
        if !path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&json)?))
    }

    pub fn delete(&self, session_id: &str) -> Result<bool, StoreError> {
        let path = self.path_for(session_id);
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(path)?;
        Ok(true)
    }

    /// Sanitized ids of every stored session.
    pub fn list(&self) -> Result<Vec<String>, StoreError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if let Some(id) = name.strip_suffix(".json") {
                    ids.push(id.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.root
            .join(format!("{}.json", sanitize_session_id(session_id)))
    }
}

/// Replace anything outside `[A-Za-z0-9_-]` with `_` so a hostile session
/// id cannot traverse out of the store directory.
pub fn sanitize_session_id(session_id: &str) -> String {
    session_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
