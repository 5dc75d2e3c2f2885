//! The per-session sandbox tool server.
//!
//! Five tools — Read, Write, Bash, Find, Grep — each routed through path
//! or command validation and executed inside the session's container.
//! The server is built per session because every handler closes over the
//! session's container handle and resource limits.

mod bash;
mod find;
mod grep;
mod read;
mod write;

use std::sync::Arc;
use std::sync::OnceLock;

use regex::Regex;

use crucible_core::{ResourceLimits, ToolEntry, ToolServer};
use crucible_sandbox::SandboxController;

use crate::common::schema_of;

pub use bash::BashTool;
pub use find::FindTool;
pub use grep::GrepTool;
pub use read::ReadTool;
pub use write::WriteTool;

/// Namespace under which sandbox tools are exposed
/// (`sandbox:Read`, `sandbox:Bash`, ...).
pub const SANDBOX_SERVER_NAME: &str = "sandbox";

/// The host-side tool names the sandbox server shadows.
pub const SANDBOX_TOOL_NAMES: &[&str] = &["Read", "Write", "Bash", "Find", "Grep"];

/// Everything a sandbox tool handler needs.
#[derive(Clone)]
pub(crate) struct SandboxContext {
    pub controller: SandboxController,
    pub container_id: String,
    pub limits: ResourceLimits,
}

/// Build the sandbox tool server for a live container.
pub fn build_sandbox_server(
    controller: SandboxController,
    container_id: &str,
    limits: ResourceLimits,
) -> ToolServer {
    let context = Arc::new(SandboxContext {
        controller,
        container_id: container_id.to_string(),
        limits,
    });

    ToolServer::new(SANDBOX_SERVER_NAME)
        .with_tool(ToolEntry {
            name: "Read".to_string(),
            description: "Read a file from the sandbox filesystem (/scratch, /skills, /claude-cache)."
                .to_string(),
            input_schema: schema_of::<read::ReadInput>(),
            handler: Arc::new(ReadTool::new(context.clone())),
        })
        .with_tool(ToolEntry {
            name: "Write".to_string(),
            description: "Write a file under /scratch in the sandbox.".to_string(),
            input_schema: schema_of::<write::WriteInput>(),
            handler: Arc::new(WriteTool::new(context.clone())),
        })
        .with_tool(ToolEntry {
            name: "Bash".to_string(),
            description: "Run a validated shell command inside the sandbox.".to_string(),
            input_schema: schema_of::<bash::BashInput>(),
            handler: Arc::new(BashTool::new(context.clone())),
        })
        .with_tool(ToolEntry {
            name: "Find".to_string(),
            description: "Find files by name pattern inside the sandbox.".to_string(),
            input_schema: schema_of::<find::FindInput>(),
            handler: Arc::new(FindTool::new(context.clone())),
        })
        .with_tool(ToolEntry {
            name: "Grep".to_string(),
            description: "Search file contents recursively inside the sandbox.".to_string(),
            input_schema: schema_of::<grep::GrepInput>(),
            handler: Arc::new(GrepTool::new(context)),
        })
}

/// Map a host Claude-cache path onto its container mount, if it is one.
///
/// `/Users/<u>/.claude/projects/<rest>` and `/home/<u>/.claude/projects/<rest>`
/// become `/claude-cache/projects/<rest>`.
pub(crate) fn map_host_cache_path(path: &str) -> Option<String> {
    static CACHE_RE: OnceLock<Regex> = OnceLock::new();
    let re = CACHE_RE.get_or_init(|| {
        Regex::new(r"^/(?:Users|home)/[^/]+/\.claude/projects/(.+)$").expect("cache path regex")
    });
    re.captures(path)
        .map(|caps| format!("/claude-cache/projects/{}", &caps[1]))
}

/// Diagnostic returned when a host-looking path reaches a sandbox tool.
pub(crate) fn host_path_diagnostic(path: &str) -> String {
    format!(
        "'{path}' looks like a host path, which is not accessible from the sandbox. \
         The workspace is /scratch (read-write); /skills and /claude-cache are read-only."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crucible_sandbox::ContainerRegistry;

    pub(crate) fn test_context() -> Arc<SandboxContext> {
        // The controller is lazy: no daemon is contacted until a request
        // is made, so validation-path tests run without Docker.
        let controller = SandboxController::new(ContainerRegistry::new()).unwrap();
        Arc::new(SandboxContext {
            controller,
            container_id: "test-container".to_string(),
            limits: ResourceLimits::default(),
        })
    }

    #[test]
    fn test_server_shape() {
        let context = test_context();
        let server = build_sandbox_server(
            context.controller.clone(),
            &context.container_id,
            context.limits,
        );

        assert_eq!(server.name, SANDBOX_SERVER_NAME);
        let names: Vec<&str> = server.tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, SANDBOX_TOOL_NAMES);
        assert_eq!(
            server.qualified_names(),
            vec!["sandbox:Read", "sandbox:Write", "sandbox:Bash", "sandbox:Find", "sandbox:Grep"]
        );
    }

    #[test]
    fn test_every_tool_has_object_schema() {
        let context = test_context();
        let server = build_sandbox_server(
            context.controller.clone(),
            &context.container_id,
            context.limits,
        );
        for tool in &server.tools {
            assert_eq!(tool.input_schema["type"], "object", "{}", tool.name);
        }
    }

    #[test]
    fn test_map_host_cache_path() {
        assert_eq!(
            map_host_cache_path("/Users/alice/.claude/projects/-work-demo/chat.json").as_deref(),
            Some("/claude-cache/projects/-work-demo/chat.json")
        );
        assert_eq!(
            map_host_cache_path("/home/bob/.claude/projects/x").as_deref(),
            Some("/claude-cache/projects/x")
        );
        assert!(map_host_cache_path("/Users/alice/project/src/a.go").is_none());
        assert!(map_host_cache_path("/scratch/a").is_none());
    }
}
