use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crucible_core::{ToolHandler, ToolOutput};
use crucible_sandbox::{looks_like_host_path, PathValidator};

use super::{host_path_diagnostic, map_host_cache_path, SandboxContext};
use crate::common::{shell_escape, truncate_result};

/// Input for finding files by name
#[derive(Debug, Deserialize, JsonSchema)]
pub struct FindInput {
    /// Filename glob pattern, e.g. `*.rs`
    pub pattern: String,
    /// Directory to search; defaults to /scratch
    #[serde(default)]
    pub path: Option<String>,
}

/// Finds files by name via `find <path> -name <pattern>`.
pub struct FindTool {
    context: Arc<SandboxContext>,
}

impl FindTool {
    pub(crate) fn new(context: Arc<SandboxContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl ToolHandler for FindTool {
    async fn call(&self, input: Value) -> ToolOutput {
        let input: FindInput = match serde_json::from_value(input) {
            Ok(i) => i,
            Err(e) => return ToolOutput::error(format!("Invalid input: {e}")),
        };

        let raw_path = input.path.unwrap_or_else(|| "/scratch".to_string());
        let path = match map_host_cache_path(&raw_path) {
            Some(mapped) => mapped,
            None if looks_like_host_path(&raw_path) => {
                return ToolOutput::error(host_path_diagnostic(&raw_path));
            }
            None => raw_path,
        };

        let validated = match PathValidator::new().validate_read(&path) {
            Ok(v) => v,
            Err(e) => return ToolOutput::error(e.to_string()),
        };

        let command = format!(
            "find {} -name {}",
            shell_escape(&validated.path),
            shell_escape(&input.pattern)
        );

        let output = match self
            .context
            .controller
            .exec(
                &self.context.container_id,
                &command,
                "/scratch",
                Duration::from_millis(self.context.limits.max_tool_timeout_ms),
            )
            .await
        {
            Ok(o) => o,
            Err(e) => return ToolOutput::error(format!("Find failed: {e}")),
        };

        if output.exit_code != 0 {
            return ToolOutput::error(format!(
                "find exited with code {}: {}",
                output.exit_code,
                output.stderr.trim()
            ));
        }

        let result = if output.stdout.trim().is_empty() {
            "No files matched.".to_string()
        } else {
            truncate_result(&output.stdout, &self.context.limits)
        };
        ToolOutput::text(result)
    }
}
