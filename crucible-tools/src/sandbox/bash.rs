use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crucible_core::{ToolHandler, ToolOutput};
use crucible_sandbox::CommandValidator;

use super::SandboxContext;
use crate::common::{truncate_result, with_hint, HINT_TIMEOUT};

/// Input for running a shell command in the sandbox
#[derive(Debug, Deserialize, JsonSchema)]
pub struct BashInput {
    /// The command to run via `bash -c`
    pub command: String,
    /// Optional timeout in milliseconds (capped by the session limit)
    #[serde(default)]
    pub timeout: Option<u64>,
}

/// Runs validated commands inside the container.
pub struct BashTool {
    context: Arc<SandboxContext>,
}

impl BashTool {
    pub(crate) fn new(context: Arc<SandboxContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl ToolHandler for BashTool {
    async fn call(&self, input: Value) -> ToolOutput {
        let input: BashInput = match serde_json::from_value(input) {
            Ok(i) => i,
            Err(e) => return ToolOutput::error(format!("Invalid input: {e}")),
        };

        let validated = match CommandValidator::new().validate(&input.command) {
            Ok(v) => v,
            Err(e) => return ToolOutput::error(e.to_string()),
        };

        let limits = &self.context.limits;
        let effective_ms = input
            .timeout
            .unwrap_or(limits.max_tool_timeout_ms)
            .min(limits.max_tool_timeout_ms);

        let output = match self
            .context
            .controller
            .exec(
                &self.context.container_id,
                &validated.sanitized,
                "/scratch",
                Duration::from_millis(effective_ms),
            )
            .await
        {
            Ok(o) => o,
            Err(e) => return ToolOutput::error(format!("Exec failed: {e}")),
        };

        let mut combined = output.stdout.clone();
        if !output.stderr.trim().is_empty() {
            if !combined.is_empty() {
                combined.push('\n');
            }
            combined.push_str(&format!("stderr: {}", output.stderr));
        }
        let combined = truncate_result(&combined, limits);

        if output.exit_code == 124 {
            return ToolOutput::error(with_hint(
                format!("Command timed out after {effective_ms} ms"),
                HINT_TIMEOUT,
                limits,
            ));
        }
        if output.exit_code != 0 {
            return ToolOutput::error(format!(
                "Command exited with code {}\n{combined}",
                output.exit_code
            ));
        }
        ToolOutput::text(combined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::tests::test_context;
    use serde_json::json;

    #[tokio::test]
    async fn test_rejected_command_never_reaches_container() {
        let tool = BashTool::new(test_context());
        let out = tool.call(json!({"command": "rm -rf /scratch"})).await;
        assert!(out.is_error);
        assert!(out.as_text().contains("rm"));
    }

    #[tokio::test]
    async fn test_substitution_rejected() {
        let tool = BashTool::new(test_context());
        let out = tool.call(json!({"command": "echo $(whoami)"})).await;
        assert!(out.is_error);
        assert!(out.as_text().contains("substitution"));
    }

    #[tokio::test]
    async fn test_redirection_outside_scratch_rejected() {
        let tool = BashTool::new(test_context());
        let out = tool.call(json!({"command": "echo x > /etc/hosts"})).await;
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn test_invalid_input_shape() {
        let tool = BashTool::new(test_context());
        let out = tool.call(json!({"cmd": "ls"})).await;
        assert!(out.is_error);
    }
}
