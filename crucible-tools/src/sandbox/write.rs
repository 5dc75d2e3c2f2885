use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crucible_core::{ToolHandler, ToolOutput};
use crucible_sandbox::{looks_like_host_path, PathValidator};

use super::{host_path_diagnostic, SandboxContext};
use crate::common::{with_hint, HINT_WRITE_SCOPE};

/// Input for writing a file into the sandbox
#[derive(Debug, Deserialize, JsonSchema)]
pub struct WriteInput {
    /// Absolute path under /scratch
    pub file_path: String,
    /// Full file content
    pub content: String,
}

/// Writes files under /scratch through the container boundary.
pub struct WriteTool {
    context: Arc<SandboxContext>,
}

impl WriteTool {
    pub(crate) fn new(context: Arc<SandboxContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl ToolHandler for WriteTool {
    async fn call(&self, input: Value) -> ToolOutput {
        let input: WriteInput = match serde_json::from_value(input) {
            Ok(i) => i,
            Err(e) => return ToolOutput::error(format!("Invalid input: {e}")),
        };

        if looks_like_host_path(&input.file_path) {
            return ToolOutput::error(host_path_diagnostic(&input.file_path));
        }

        let validated = match PathValidator::new().validate_write(&input.file_path) {
            Ok(v) => v,
            Err(e) => {
                return ToolOutput::error(with_hint(
                    e.to_string(),
                    HINT_WRITE_SCOPE,
                    &self.context.limits,
                ))
            }
        };

        let byte_count = input.content.len();
        match self
            .context
            .controller
            .write_file(&self.context.container_id, &validated.path, &input.content)
            .await
        {
            Ok(()) => ToolOutput::text(format!("Wrote {byte_count} bytes to {}", validated.path)),
            Err(e) => ToolOutput::error(format!("Write failed: {e}")),
        }
    }
}
