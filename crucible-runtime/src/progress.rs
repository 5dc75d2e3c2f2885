//! The progress journal kept inside the sandbox.
//!
//! A small JSON document at a fixed path that survives the process: the
//! engine reads it at session start to resume, and writes it after
//! significant transitions. Writes are best-effort and never block the
//! event stream.

use tracing::{debug, warn};

use crucible_core::ProgressState;
use crucible_sandbox::SandboxController;

/// Fixed path of the journal inside the container.
pub const PROGRESS_FILE: &str = "/scratch/claude-progress.json";

/// Reads and writes one session's progress file.
#[derive(Clone)]
pub struct ProgressJournal {
    controller: SandboxController,
    container_id: String,
}

impl ProgressJournal {
    pub fn new(controller: SandboxController, container_id: &str) -> Self {
        Self {
            controller,
            container_id: container_id.to_string(),
        }
    }

    /// Read the journal. A missing or unparseable file is a fresh start,
    /// not an error.
    pub async fn read(&self) -> Option<ProgressState> {
        let raw = match self
            .controller
            .read_file(&self.container_id, PROGRESS_FILE)
            .await
        {
            Ok(raw) => raw,
            Err(_) => return None,
        };

        match serde_json::from_str(&raw) {
            Ok(state) => {
                debug!(container_id = %self.container_id, "resumed progress journal");
                Some(state)
            }
            Err(e) => {
                warn!(error = %e, "progress journal unparseable; starting fresh");
                None
            }
        }
    }

    /// Write the journal. Failures are logged, never propagated.
    pub async fn write(&self, state: &ProgressState) {
        let json = match serde_json::to_string_pretty(state) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "progress state not serializable");
                return;
            }
        };
        if let Err(e) = self
            .controller
            .write_file(&self.container_id, PROGRESS_FILE, &json)
            .await
        {
            warn!(error = %e, "progress journal write failed");
        }
    }
}
