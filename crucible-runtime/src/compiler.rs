//! Compiles an [`AgentConfig`] into an [`ExecutionPlan`].
//!
//! The compiler is where the orchestrator/worker architecture is enforced:
//! an agent with subagents keeps only the coordination tools for itself,
//! while every other registered tool server remains reachable by its
//! subagents. It also migrates legacy hook names, wraps user snippets in
//! the safe evaluator, wires the sandbox tool server to the session's
//! container, and assembles the effective system prompt.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

use crucible_core::{
    AgentConfig, CodeEvaluator, ConnectorStatus, EvalSite, ExecutionEvent, ExecutionPlan,
    HookEvent, HookRegistration, PermissionCallback, PlanMetadata, SubagentProfile, ToolEntry,
    ToolServer,
};
use crucible_sandbox::SandboxController;
use crucible_tools::{
    build_connector_server, build_sandbox_server, provider_tool_names, AccessTokenProvider,
    ConnectorConnection, SANDBOX_TOOL_NAMES,
};

use crate::bridge::QuestionBridge;
use crate::callbacks::{
    EvaluatedHook, EvaluatedPermissionCallback, EvaluatedToolHandler, ParentPermissionCallback,
    StubToolHandler, TaskGuardHook,
};
use crate::error::CompileError;
use crate::prompts;

/// Coordination tools an orchestrator keeps for itself.
pub const ORCHESTRATION_TOOLS: &[&str] = &["Task", "TodoWrite", "AskUserQuestion"];

/// Built-in tools resolvable without a tool server.
const BUILTIN_TOOLS: &[&str] = &["Task", "TodoWrite", "AskUserQuestion", "WebSearch", "WebFetch"];

/// Web tools an orchestrator's parent never calls directly.
const WEB_TOOLS: &[&str] = &["WebSearch", "WebFetch"];

/// Legacy hook-event names and their current equivalents.
const LEGACY_HOOK_EVENTS: &[(&str, &str)] = &[
    ("BeforeToolUse", "PreToolUse"),
    ("AfterToolUse", "PostToolUse"),
    ("BeforeSubagentCall", "SubagentStart"),
    ("AfterSubagentCall", "SubagentStop"),
    ("OnError", "PostToolUseFailure"),
];

const CUSTOM_SERVER_NAME: &str = "custom";

/// Whether an agent needs a container: any sandbox tool enabled, or an
/// orchestrator (whose subagents always get the sandbox server).
pub fn needs_sandbox(config: &AgentConfig) -> bool {
    config.is_orchestrator()
        || config
            .tools
            .enabled
            .iter()
            .any(|t| SANDBOX_TOOL_NAMES.contains(&t.as_str()))
}

/// Session-scoped inputs the compiler needs beyond the config itself.
pub struct CompileContext<'a> {
    pub session_id: &'a str,
    /// Controller plus the session's live container, when one exists.
    pub controller: Option<&'a SandboxController>,
    pub container_id: Option<&'a str>,
    /// Decryptable token providers keyed by connection id. A connector
    /// reference without one is skipped.
    pub token_providers: &'a HashMap<String, Arc<dyn AccessTokenProvider>>,
    pub bridge: QuestionBridge,
    pub events: mpsc::UnboundedSender<ExecutionEvent>,
}

/// Transforms agent configurations into execution plans.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigCompiler;

impl ConfigCompiler {
    pub fn new() -> Self {
        Self
    }

    pub async fn compile(
        &self,
        config: &AgentConfig,
        ctx: CompileContext<'_>,
    ) -> Result<ExecutionPlan, CompileError> {
        let is_orchestrator = config.is_orchestrator();
        let custom_names: HashSet<&str> =
            config.custom_tools.iter().map(|t| t.name.as_str()).collect();
        let connector_names: HashSet<&str> = config
            .connectors
            .iter()
            .flat_map(|c| provider_tool_names(c.provider).iter().copied())
            .collect();

        // Validation collects every offense before failing atomically.
        let mut offenses = Vec::new();
        for name in &config.tools.enabled {
            let known = BUILTIN_TOOLS.contains(&name.as_str())
                || SANDBOX_TOOL_NAMES.contains(&name.as_str())
                || custom_names.contains(name.as_str())
                || connector_names.contains(name.as_str())
                || name.starts_with("mcp__");
            if !known {
                offenses.push(format!("unknown tool '{name}'"));
            }
        }
        for (name, sub) in &config.subagents {
            if sub.description.trim().is_empty() {
                offenses.push(format!("subagent '{name}' has no description"));
            }
        }
        if !offenses.is_empty() {
            return Err(CompileError::Invalid(offenses));
        }

        let wants_sandbox = needs_sandbox(config);

        let mut plan = ExecutionPlan {
            model: config.model.as_str().to_string(),
            permission_mode: config.settings.permission_mode,
            max_turns: config.settings.max_turns,
            max_budget_usd: config.settings.max_budget_usd,
            max_thinking_tokens: config.settings.max_thinking_tokens,
            output_schema: config.output_schema.clone(),
            mcp_connections: config.mcp_connections.clone(),
            ..Default::default()
        };

        // Sandbox plumbing: the server is registered whenever it might be
        // needed, and the host-side tool names are always denied so even
        // name-collision tools route through the container.
        if wants_sandbox {
            let (controller, container_id) = match (ctx.controller, ctx.container_id) {
                (Some(c), Some(id)) => (c, id),
                _ => {
                    return Err(CompileError::SandboxRequired(if is_orchestrator {
                        "orchestrators always run against a container".to_string()
                    } else {
                        "a sandbox tool is enabled".to_string()
                    }))
                }
            };
            plan.tool_servers.push(build_sandbox_server(
                controller.clone(),
                container_id,
                config.settings.resource_limits,
            ));
            plan.disallowed_tools
                .extend(SANDBOX_TOOL_NAMES.iter().map(|s| s.to_string()));
        }

        // Custom tools: invalid handler code still registers, as a stub
        // that always errors.
        if !config.custom_tools.is_empty() {
            let mut server = ToolServer::new(CUSTOM_SERVER_NAME);
            for tool in &config.custom_tools {
                let handler: Arc<dyn crucible_core::ToolHandler> =
                    match CodeEvaluator::prevalidate(&tool.handler_code) {
                        Ok(()) => Arc::new(EvaluatedToolHandler::new(&tool.handler_code)),
                        Err(e) => {
                            warn!(tool = %tool.name, error = %e, "custom tool handler rejected");
                            Arc::new(StubToolHandler::new(e.to_string()))
                        }
                    };
                server = server.with_tool(ToolEntry {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    input_schema: normalize_schema(&tool.input_schema),
                    handler,
                });
            }
            plan.tool_servers.push(server);
        }

        // Connectors: only connections that are connected and have a
        // decryptable token provider contribute tools.
        let connections: Vec<ConnectorConnection> = config
            .connectors
            .iter()
            .filter(|c| c.status == ConnectorStatus::Connected)
            .filter_map(|c| {
                let tokens = ctx.token_providers.get(&c.connection_id)?;
                Some(ConnectorConnection {
                    connection_id: c.connection_id.clone(),
                    provider: c.provider,
                    tokens: tokens.clone(),
                    base_url: None,
                })
            })
            .collect();
        if !connections.is_empty() {
            plan.tool_servers.push(build_connector_server(
                &connections,
                config.settings.resource_limits,
            ));
        }

        // Allowed tool surface.
        let qualified = |name: &str| -> String {
            if SANDBOX_TOOL_NAMES.contains(&name) {
                format!("sandbox:{name}")
            } else if custom_names.contains(name) {
                format!("{CUSTOM_SERVER_NAME}:{name}")
            } else if connector_names.contains(name) {
                format!("connectors:{name}")
            } else {
                name.to_string()
            }
        };

        let mut orchestrator_blocked: Vec<String> = Vec::new();
        if is_orchestrator {
            // Parent keeps the coordination set; Task is always present.
            let mut allowed: Vec<String> = vec!["Task".to_string()];
            for tool in ORCHESTRATION_TOOLS.iter().skip(1) {
                if config.tools.enabled.iter().any(|t| t == tool)
                    || !config.tools.disabled.iter().any(|t| t == tool)
                {
                    allowed.push(tool.to_string());
                }
            }
            plan.allowed_tools = allowed;

            // Everything else is blocked for the parent but stays
            // registered for subagent inheritance.
            for name in SANDBOX_TOOL_NAMES {
                orchestrator_blocked.push(name.to_string());
                orchestrator_blocked.push(format!("sandbox:{name}"));
            }
            for name in &custom_names {
                orchestrator_blocked.push(name.to_string());
                orchestrator_blocked.push(format!("{CUSTOM_SERVER_NAME}:{name}"));
            }
            for name in &connector_names {
                orchestrator_blocked.push(name.to_string());
                orchestrator_blocked.push(format!("connectors:{name}"));
            }
            orchestrator_blocked.extend(WEB_TOOLS.iter().map(|s| s.to_string()));

            plan.disallowed_tools
                .extend(orchestrator_blocked.iter().cloned());
        } else {
            plan.allowed_tools = config
                .tools
                .enabled
                .iter()
                .filter(|t| !config.tools.disabled.contains(*t))
                .map(|t| qualified(t))
                .collect();
            plan.disallowed_tools
                .extend(config.tools.disabled.iter().cloned());
        }
        dedup_preserving_order(&mut plan.disallowed_tools);

        // Hooks: migrate legacy names, wrap snippets, and prepend the
        // synthesized Task guard for orchestrators (user hooks never
        // overwrite it).
        let mut hooks: HashMap<HookEvent, Vec<HookRegistration>> = HashMap::new();
        for (raw_name, entries) in &config.hooks {
            let migrated = LEGACY_HOOK_EVENTS
                .iter()
                .find(|(legacy, _)| legacy == raw_name)
                .map(|(_, current)| *current)
                .unwrap_or(raw_name.as_str());

            let Some(event) = HookEvent::parse(migrated) else {
                warn!(event = %raw_name, "dropping unsupported hook event");
                continue;
            };

            for entry in entries {
                hooks.entry(event).or_default().push(HookRegistration {
                    matcher: entry.matcher.clone(),
                    callbacks: vec![Arc::new(EvaluatedHook::new(&entry.code))],
                });
            }
        }
        if is_orchestrator {
            let guard = HookRegistration {
                matcher: Some("Task".to_string()),
                callbacks: vec![Arc::new(TaskGuardHook::new(
                    config.subagents.keys().cloned(),
                ))],
            };
            hooks.entry(HookEvent::PreToolUse).or_default().insert(0, guard);
        }
        plan.hooks = hooks;

        // Subagent profiles, with declared tool names translated to their
        // server-qualified forms. An absent tool list inherits the full
        // parent registry.
        for (name, sub) in &config.subagents {
            plan.subagents.push(SubagentProfile {
                name: name.clone(),
                description: sub.description.clone(),
                prompt: format!("{}{}", sub.prompt, prompts::WORKSPACE_BLOCK),
                tools: sub.tools.as_ref().map(|tools| {
                    tools.iter().map(|t| qualified(t)).collect()
                }),
                model: sub.model.resolve(config.model).as_str().to_string(),
            });
        }
        if is_orchestrator && !config.subagents.contains_key("FileManager") {
            plan.subagents.push(SubagentProfile {
                name: "FileManager".to_string(),
                description: prompts::FILE_MANAGER_DESCRIPTION.to_string(),
                prompt: format!("{}{}", prompts::FILE_MANAGER_PROMPT, prompts::WORKSPACE_BLOCK),
                tools: Some(
                    SANDBOX_TOOL_NAMES
                        .iter()
                        .map(|t| format!("sandbox:{t}"))
                        .collect(),
                ),
                model: "haiku".to_string(),
            });
        }

        // Effective system prompt: base, delegation guidelines, context
        // section, platform guidelines.
        let mut system_prompt = config.system_prompt.clone();
        if is_orchestrator {
            let names: Vec<String> = plan.subagents.iter().map(|s| s.name.clone()).collect();
            system_prompt.push_str(&prompts::delegation_guidelines(&names));
        }
        let dynamic_context = match &config.context {
            Some(context) => match &context.dynamic_loader {
                Some(code) => {
                    let evaluator = CodeEvaluator::new();
                    match evaluator
                        .eval(
                            code,
                            serde_json::json!({"session_id": ctx.session_id}),
                            EvalSite::ContextLoader,
                        )
                        .await
                    {
                        Ok(Value::String(s)) => Some(s),
                        Ok(value) => Some(value.to_string()),
                        Err(e) => {
                            warn!(error = %e, "dynamic context loader failed");
                            None
                        }
                    }
                }
                None => None,
            },
            None => None,
        };
        if let Some(section) = prompts::context_section(
            config
                .context
                .as_ref()
                .and_then(|c| c.static_context.as_deref()),
            dynamic_context.as_deref(),
        ) {
            system_prompt.push_str(&section);
        }
        let disable_platform = config
            .advanced
            .as_ref()
            .map(|a| a.disable_platform_guidelines)
            .unwrap_or(false);
        if !disable_platform {
            system_prompt.push_str(prompts::PLATFORM_BLOCK);
        }
        plan.system_prompt = system_prompt;

        // The parent canUseTool chain.
        let user_callback: Option<Arc<dyn PermissionCallback>> = config
            .advanced
            .as_ref()
            .and_then(|a| a.can_use_tool.as_deref())
            .map(|code| {
                Arc::new(EvaluatedPermissionCallback::new(code)) as Arc<dyn PermissionCallback>
            });
        let subagent_names: Vec<String> =
            plan.subagents.iter().map(|s| s.name.clone()).collect();
        plan.can_use_tool = Some(Arc::new(ParentPermissionCallback::new(
            ctx.session_id,
            is_orchestrator,
            orchestrator_blocked.iter().cloned(),
            subagent_names,
            user_callback,
            ctx.bridge.clone(),
            ctx.events.clone(),
        )));

        // Setting sources: skills require project and user sources.
        let mut setting_sources = config
            .advanced
            .as_ref()
            .map(|a| a.setting_sources.clone())
            .unwrap_or_default();
        if !config.skills.is_empty() {
            for required in ["project", "user"] {
                if !setting_sources.iter().any(|s| s == required) {
                    setting_sources.push(required.to_string());
                }
            }
        }
        plan.setting_sources = setting_sources;

        if let Some(advanced) = &config.advanced {
            plan.env = advanced.env.clone();
            plan.betas = advanced.betas.clone();
        }

        plan.metadata = PlanMetadata {
            is_orchestrator,
            orchestrator_blocked_tools: orchestrator_blocked,
        };

        Ok(plan)
    }
}

/// Custom tool schemas pass through as-is, except that a missing `type`
/// defaults to `object` (the protocol requires object inputs).
fn normalize_schema(schema: &Value) -> Value {
    let mut schema = schema.clone();
    if let Value::Object(ref mut map) = schema {
        map.entry("type".to_string())
            .or_insert_with(|| Value::String("object".to_string()));
    }
    schema
}

fn dedup_preserving_order(items: &mut Vec<String>) {
    let mut seen = HashSet::new();
    items.retain(|item| seen.insert(item.clone()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crucible_core::{
        AgentSettings, ConnectorProvider, ConnectorRef, CustomToolConfig, HookEntry, ModelChoice,
        PermissionContext, SubagentConfig, ToolSelection,
    };
    use crucible_sandbox::{ContainerRegistry, SandboxController};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn base_config() -> AgentConfig {
        serde_json::from_value(json!({
            "id": "a1",
            "name": "agent",
            "systemPrompt": "You are the agent."
        }))
        .unwrap()
    }

    fn with_subagents(mut config: AgentConfig) -> AgentConfig {
        let mut subagents = BTreeMap::new();
        subagents.insert(
            "Analyzer".to_string(),
            SubagentConfig {
                description: "analyzes code".to_string(),
                prompt: "You analyze.".to_string(),
                tools: Some(vec!["Read".to_string(), "Grep".to_string()]),
                model: ModelChoice::Inherit,
            },
        );
        config.subagents = subagents;
        config
    }

    struct Ctx {
        controller: SandboxController,
        providers: HashMap<String, Arc<dyn AccessTokenProvider>>,
        events: mpsc::UnboundedSender<ExecutionEvent>,
        _rx: mpsc::UnboundedReceiver<ExecutionEvent>,
    }

    impl Ctx {
        fn new() -> Self {
            let (events, _rx) = mpsc::unbounded_channel();
            Self {
                controller: SandboxController::new(ContainerRegistry::new()).unwrap(),
                providers: HashMap::new(),
                events,
                _rx,
            }
        }

        fn compile_ctx(&self) -> CompileContext<'_> {
            CompileContext {
                session_id: "sess-1",
                controller: Some(&self.controller),
                container_id: Some("container-1"),
                token_providers: &self.providers,
                bridge: QuestionBridge::new(),
                events: self.events.clone(),
            }
        }

        fn no_container(&self) -> CompileContext<'_> {
            CompileContext {
                session_id: "sess-1",
                controller: None,
                container_id: None,
                token_providers: &self.providers,
                bridge: QuestionBridge::new(),
                events: self.events.clone(),
            }
        }
    }

    // ===== validation =====

    #[tokio::test]
    async fn test_unknown_tools_collected_atomically() {
        let ctx = Ctx::new();
        let mut config = base_config();
        config.tools = ToolSelection {
            enabled: vec!["Read".into(), "Frobnicate".into(), "Zap".into()],
            disabled: vec![],
        };

        let err = ConfigCompiler::new()
            .compile(&config, ctx.compile_ctx())
            .await
            .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("Frobnicate"));
        assert!(text.contains("Zap"));
    }

    #[tokio::test]
    async fn test_sandbox_tool_requires_container() {
        let ctx = Ctx::new();
        let mut config = base_config();
        config.tools.enabled = vec!["Read".into()];

        let err = ConfigCompiler::new()
            .compile(&config, ctx.no_container())
            .await
            .unwrap_err();
        assert!(matches!(err, CompileError::SandboxRequired(_)));
    }

    #[tokio::test]
    async fn test_orchestrator_requires_container() {
        let ctx = Ctx::new();
        let config = with_subagents(base_config());

        let err = ConfigCompiler::new()
            .compile(&config, ctx.no_container())
            .await
            .unwrap_err();
        assert!(matches!(err, CompileError::SandboxRequired(_)));
    }

    // ===== worker plans =====

    #[tokio::test]
    async fn test_worker_gets_qualified_sandbox_tools() {
        let ctx = Ctx::new();
        let mut config = base_config();
        config.tools.enabled = vec!["Read".into(), "Bash".into(), "TodoWrite".into()];

        let plan = ConfigCompiler::new()
            .compile(&config, ctx.compile_ctx())
            .await
            .unwrap();

        assert_eq!(
            plan.allowed_tools,
            vec!["sandbox:Read", "sandbox:Bash", "TodoWrite"]
        );
        // Host-side names are always denied once the sandbox is wired.
        for name in SANDBOX_TOOL_NAMES {
            assert!(plan.disallowed_tools.contains(&name.to_string()));
        }
        assert!(!plan.metadata.is_orchestrator);
        assert_eq!(plan.tool_servers.len(), 1);
        assert_eq!(plan.tool_servers[0].name, "sandbox");
    }

    // ===== orchestrator plans =====

    #[tokio::test]
    async fn test_orchestrator_restricted_to_coordination_tools() {
        let ctx = Ctx::new();
        let mut config = with_subagents(base_config());
        config.tools.enabled = vec!["Read".into(), "Task".into(), "TodoWrite".into()];

        let plan = ConfigCompiler::new()
            .compile(&config, ctx.compile_ctx())
            .await
            .unwrap();

        assert!(plan.metadata.is_orchestrator);
        assert_eq!(plan.allowed_tools[0], "Task");
        assert!(plan.allowed_tools.contains(&"TodoWrite".to_string()));
        assert!(plan.allowed_tools.contains(&"AskUserQuestion".to_string()));
        assert!(!plan.allowed_tools.iter().any(|t| t.contains("Read")));

        // Blocked for the parent, but the server stays registered so the
        // subagents inherit access.
        assert!(plan
            .metadata
            .orchestrator_blocked_tools
            .contains(&"Read".to_string()));
        assert!(plan
            .metadata
            .orchestrator_blocked_tools
            .contains(&"sandbox:Read".to_string()));
        assert!(plan.tool_servers.iter().any(|s| s.name == "sandbox"));
    }

    #[tokio::test]
    async fn test_task_always_added_even_if_not_enabled() {
        let ctx = Ctx::new();
        let mut config = with_subagents(base_config());
        config.tools.enabled = vec![];

        let plan = ConfigCompiler::new()
            .compile(&config, ctx.compile_ctx())
            .await
            .unwrap();
        assert!(plan.allowed_tools.contains(&"Task".to_string()));
    }

    #[tokio::test]
    async fn test_file_manager_injected() {
        let ctx = Ctx::new();
        let config = with_subagents(base_config());

        let plan = ConfigCompiler::new()
            .compile(&config, ctx.compile_ctx())
            .await
            .unwrap();

        let fm = plan
            .subagents
            .iter()
            .find(|s| s.name == "FileManager")
            .expect("FileManager injected");
        assert_eq!(fm.model, "haiku");
        assert!(fm.description.contains("cloning"));
        assert_eq!(
            fm.tools.as_ref().unwrap(),
            &vec!["sandbox:Read", "sandbox:Write", "sandbox:Bash", "sandbox:Find", "sandbox:Grep"]
        );
    }

    #[tokio::test]
    async fn test_file_manager_not_duplicated() {
        let ctx = Ctx::new();
        let mut config = with_subagents(base_config());
        config.subagents.insert(
            "FileManager".to_string(),
            SubagentConfig {
                description: "my own file manager".to_string(),
                prompt: "You manage files.".to_string(),
                tools: None,
                model: ModelChoice::Haiku,
            },
        );

        let plan = ConfigCompiler::new()
            .compile(&config, ctx.compile_ctx())
            .await
            .unwrap();

        let managers: Vec<_> = plan
            .subagents
            .iter()
            .filter(|s| s.name == "FileManager")
            .collect();
        assert_eq!(managers.len(), 1);
        assert_eq!(managers[0].description, "my own file manager");
    }

    #[tokio::test]
    async fn test_subagent_tools_translated_and_inheritance_preserved() {
        let ctx = Ctx::new();
        let mut config = with_subagents(base_config());
        config.subagents.insert(
            "Helper".to_string(),
            SubagentConfig {
                description: "helps".to_string(),
                prompt: "You help.".to_string(),
                tools: None,
                model: ModelChoice::Inherit,
            },
        );

        let plan = ConfigCompiler::new()
            .compile(&config, ctx.compile_ctx())
            .await
            .unwrap();

        let analyzer = plan.subagents.iter().find(|s| s.name == "Analyzer").unwrap();
        assert_eq!(
            analyzer.tools.as_ref().unwrap(),
            &vec!["sandbox:Read", "sandbox:Grep"]
        );
        assert!(analyzer.prompt.contains("/scratch"));

        let helper = plan.subagents.iter().find(|s| s.name == "Helper").unwrap();
        assert!(helper.tools.is_none());
    }

    #[tokio::test]
    async fn test_delegation_guidelines_appended() {
        let ctx = Ctx::new();
        let config = with_subagents(base_config());

        let plan = ConfigCompiler::new()
            .compile(&config, ctx.compile_ctx())
            .await
            .unwrap();
        assert!(plan.system_prompt.contains("orchestrator"));
        assert!(plan.system_prompt.contains("Analyzer"));
        assert!(plan.system_prompt.contains("FileManager"));
    }

    // ===== hooks =====

    #[tokio::test]
    async fn test_legacy_hook_names_migrated() {
        let ctx = Ctx::new();
        let mut config = base_config();
        config.hooks.insert(
            "BeforeToolUse".to_string(),
            vec![HookEntry {
                matcher: Some("Bash".to_string()),
                code: "#{ }".to_string(),
            }],
        );
        config.hooks.insert(
            "TotallyUnknownEvent".to_string(),
            vec![HookEntry {
                matcher: None,
                code: "#{ }".to_string(),
            }],
        );

        let plan = ConfigCompiler::new()
            .compile(&config, ctx.compile_ctx())
            .await
            .unwrap();

        let pre = plan.hooks.get(&HookEvent::PreToolUse).unwrap();
        assert_eq!(pre.len(), 1);
        assert_eq!(pre[0].matcher.as_deref(), Some("Bash"));
        // The unsupported event was dropped entirely.
        assert_eq!(plan.hooks.len(), 1);
    }

    #[tokio::test]
    async fn test_orchestrator_task_guard_prepended() {
        let ctx = Ctx::new();
        let mut config = with_subagents(base_config());
        config.hooks.insert(
            "PreToolUse".to_string(),
            vec![HookEntry {
                matcher: Some("Task".to_string()),
                code: "#{ }".to_string(),
            }],
        );

        let plan = ConfigCompiler::new()
            .compile(&config, ctx.compile_ctx())
            .await
            .unwrap();

        let pre = plan.hooks.get(&HookEvent::PreToolUse).unwrap();
        assert_eq!(pre.len(), 2);
        // The guard comes first; the user hook did not overwrite it.
        let guard_input = crucible_core::HookInput {
            event: HookEvent::PreToolUse,
            session_id: "sess-1".to_string(),
            tool_name: Some("Task".to_string()),
            tool_input: json!({"prompt": "no subagent named"}),
        };
        let outcome = pre[0].callbacks[0].fire(&guard_input).await;
        assert!(matches!(outcome, crucible_core::HookOutcome::Deny { .. }));
    }

    // ===== custom tools and connectors =====

    #[tokio::test]
    async fn test_custom_tool_with_invalid_handler_becomes_stub() {
        let ctx = Ctx::new();
        let mut config = base_config();
        config.custom_tools.push(CustomToolConfig {
            name: "summarize".to_string(),
            description: "summarizes".to_string(),
            input_schema: json!({"properties": {"text": {"type": "string"}}}),
            handler_code: "process.exit(1)".to_string(),
        });
        config.tools.enabled = vec!["summarize".into()];

        let plan = ConfigCompiler::new()
            .compile(&config, ctx.compile_ctx())
            .await
            .unwrap();

        assert_eq!(plan.allowed_tools, vec!["custom:summarize"]);
        let entry = plan.find_tool("custom:summarize").unwrap();
        // Schema was normalized to an object type.
        assert_eq!(entry.input_schema["type"], "object");
        let out = entry.handler.call(json!({"text": "x"})).await;
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn test_connectors_require_connected_state_and_tokens() {
        let mut ctx = Ctx::new();
        ctx.providers.insert(
            "conn-ok".to_string(),
            Arc::new(crucible_tools::StaticTokenProvider("t".into())),
        );

        let mut config = base_config();
        config.connectors = vec![
            ConnectorRef {
                connection_id: "conn-ok".to_string(),
                provider: ConnectorProvider::Github,
                status: ConnectorStatus::Connected,
            },
            // Connected but no decryptable tokens: skipped.
            ConnectorRef {
                connection_id: "conn-no-token".to_string(),
                provider: ConnectorProvider::Gmail,
                status: ConnectorStatus::Connected,
            },
            // Not connected: skipped.
            ConnectorRef {
                connection_id: "conn-off".to_string(),
                provider: ConnectorProvider::Slack,
                status: ConnectorStatus::Disconnected,
            },
        ];

        let plan = ConfigCompiler::new()
            .compile(&config, ctx.compile_ctx())
            .await
            .unwrap();

        let connectors = plan
            .tool_servers
            .iter()
            .find(|s| s.name == "connectors")
            .unwrap();
        let names: Vec<&str> = connectors.tools.iter().map(|t| t.name.as_str()).collect();
        assert!(names.contains(&"github_list_repos"));
        assert!(!names.contains(&"gmail_list"));
        assert!(!names.contains(&"slack_send"));
    }

    // ===== permission chain =====

    #[tokio::test]
    async fn test_compiled_callback_denies_parent_and_allows_subagent() {
        let ctx = Ctx::new();
        let config = with_subagents(base_config());

        let plan = ConfigCompiler::new()
            .compile(&config, ctx.compile_ctx())
            .await
            .unwrap();
        let callback = plan.can_use_tool.as_ref().unwrap();

        let parent_ctx = PermissionContext {
            session_id: "sess-1".to_string(),
            subagent_id: None,
        };
        let decision = callback
            .decide("Read", json!({"file_path": "/scratch/x"}), &parent_ctx)
            .await;
        match decision {
            crucible_core::PermissionDecision::Deny { reason, .. } => {
                assert!(reason.contains("Task"))
            }
            other => panic!("expected deny, got {other:?}"),
        }

        let sub_ctx = PermissionContext {
            session_id: "sess-1".to_string(),
            subagent_id: Some("Analyzer".to_string()),
        };
        let decision = callback
            .decide("Read", json!({"file_path": "/scratch/x"}), &sub_ctx)
            .await;
        assert_eq!(decision, crucible_core::PermissionDecision::allow());
    }

    // ===== settings passthrough =====

    #[tokio::test]
    async fn test_settings_and_metadata_on_plan() {
        let ctx = Ctx::new();
        let mut config = base_config();
        config.model = ModelChoice::Opus;
        config.settings = AgentSettings {
            max_turns: Some(12),
            max_budget_usd: Some(2.5),
            ..Default::default()
        };
        config.skills = vec!["git-workflow".to_string()];

        let plan = ConfigCompiler::new()
            .compile(&config, ctx.compile_ctx())
            .await
            .unwrap();

        assert_eq!(plan.model, "opus");
        assert_eq!(plan.max_turns, Some(12));
        assert_eq!(plan.max_budget_usd, Some(2.5));
        assert!(plan.setting_sources.contains(&"project".to_string()));
        assert!(plan.setting_sources.contains(&"user".to_string()));
        assert!(plan.system_prompt.contains("Platform guidelines"));
    }

    #[tokio::test]
    async fn test_platform_guidelines_can_be_disabled() {
        let ctx = Ctx::new();
        let mut config = base_config();
        config.advanced = Some(crucible_core::AdvancedOptions {
            disable_platform_guidelines: true,
            ..Default::default()
        });

        let plan = ConfigCompiler::new()
            .compile(&config, ctx.compile_ctx())
            .await
            .unwrap();
        assert!(!plan.system_prompt.contains("Platform guidelines"));
    }

    #[tokio::test]
    async fn test_static_context_appended() {
        let ctx = Ctx::new();
        let mut config = base_config();
        config.context = Some(crucible_core::ContextConfig {
            static_context: Some("repo: demo".to_string()),
            dynamic_loader: Some(r#""branch: " + "main""#.to_string()),
        });

        let plan = ConfigCompiler::new()
            .compile(&config, ctx.compile_ctx())
            .await
            .unwrap();
        assert!(plan.system_prompt.contains("## Context"));
        assert!(plan.system_prompt.contains("repo: demo"));
        assert!(plan.system_prompt.contains("branch: main"));
    }
}
