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

/// Input for searching file contents
#[derive(Debug, Deserialize, JsonSchema)]
pub struct GrepInput {
    /// Pattern passed to `grep -r`
    pub pattern: String,
    /// Directory or file to search
    pub path: String,
    /// Optional filename filter, e.g. `*.rs`
    #[serde(default)]
    pub include: Option<String>,
}

/// Searches file contents via `grep -r`, every argument shell-escaped.
pub struct GrepTool {
    context: Arc<SandboxContext>,
}

impl GrepTool {
    pub(crate) fn new(context: Arc<SandboxContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl ToolHandler for GrepTool {
    async fn call(&self, input: Value) -> ToolOutput {
        let input: GrepInput = match serde_json::from_value(input) {
            Ok(i) => i,
            Err(e) => return ToolOutput::error(format!("Invalid input: {e}")),
        };

        let path = match map_host_cache_path(&input.path) {
            Some(mapped) => mapped,
            None if looks_like_host_path(&input.path) => {
                return ToolOutput::error(host_path_diagnostic(&input.path));
            }
            None => input.path.clone(),
        };

        let validated = match PathValidator::new().validate_read(&path) {
            Ok(v) => v,
            Err(e) => return ToolOutput::error(e.to_string()),
        };

        let mut command = String::from("grep -rn");
        if let Some(include) = &input.include {
            command.push_str(&format!(" --include={}", shell_escape(include)));
        }
        command.push_str(&format!(
            " -e {} {}",
            shell_escape(&input.pattern),
            shell_escape(&validated.path)
        ));

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
            Err(e) => return ToolOutput::error(format!("Grep failed: {e}")),
        };

        // grep exits 1 when nothing matched; only >1 is a real failure.
        match output.exit_code {
            0 => ToolOutput::text(truncate_result(&output.stdout, &self.context.limits)),
            1 => ToolOutput::text("No matches found.".to_string()),
            code => ToolOutput::error(format!(
                "grep exited with code {code}: {}",
                output.stderr.trim()
            )),
        }
    }
}
