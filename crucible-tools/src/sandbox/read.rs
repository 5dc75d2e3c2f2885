use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crucible_core::{ToolHandler, ToolOutput};
use crucible_sandbox::{looks_like_host_path, PathValidator};

use super::{host_path_diagnostic, map_host_cache_path, SandboxContext};
use crate::common::truncate_result;

/// Input for reading a file from the sandbox
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReadInput {
    /// Absolute path inside the sandbox (/scratch, /skills, /claude-cache)
    pub file_path: String,
}

/// Reads files through the path validator and the container boundary.
pub struct ReadTool {
    context: Arc<SandboxContext>,
}

impl ReadTool {
    pub(crate) fn new(context: Arc<SandboxContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl ToolHandler for ReadTool {
    async fn call(&self, input: Value) -> ToolOutput {
        let input: ReadInput = match serde_json::from_value(input) {
            Ok(i) => i,
            Err(e) => return ToolOutput::error(format!("Invalid input: {e}")),
        };

        // Host cache paths are silently translated to their container
        // mount; any other host-looking path gets a diagnostic before a
        // container call is even attempted.
        let path = match map_host_cache_path(&input.file_path) {
            Some(mapped) => mapped,
            None if looks_like_host_path(&input.file_path) => {
                return ToolOutput::error(host_path_diagnostic(&input.file_path));
            }
            None => input.file_path.clone(),
        };

        let validated = match PathValidator::new().validate_read(&path) {
            Ok(v) => v,
            Err(e) => return ToolOutput::error(e.to_string()),
        };

        match self
            .context
            .controller
            .read_file(&self.context.container_id, &validated.path)
            .await
        {
            Ok(content) => ToolOutput::text(truncate_result(&content, &self.context.limits)),
            Err(e) => ToolOutput::error(format!("Read failed: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::tests::test_context;
    use serde_json::json;

    #[tokio::test]
    async fn test_host_path_rejected_with_diagnostic() {
        let tool = ReadTool::new(test_context());
        let out = tool
            .call(json!({"file_path": "/Users/alice/project/src/a.go"}))
            .await;
        assert!(out.is_error);
        let text = out.as_text();
        assert!(text.contains("/scratch"));
        assert!(text.contains("host path"));
    }

    #[tokio::test]
    async fn test_blocked_path_rejected_before_container_call() {
        let tool = ReadTool::new(test_context());
        let out = tool.call(json!({"file_path": "/etc/passwd"})).await;
        assert!(out.is_error);
        assert!(out.as_text().contains("blocked"));
    }

    #[tokio::test]
    async fn test_sensitive_file_rejected() {
        let tool = ReadTool::new(test_context());
        let out = tool.call(json!({"file_path": "/scratch/.env"})).await;
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn test_invalid_input_shape() {
        let tool = ReadTool::new(test_context());
        let out = tool.call(json!({"path": "/scratch/a"})).await;
        assert!(out.is_error);
        assert!(out.as_text().contains("Invalid input"));
    }
}
