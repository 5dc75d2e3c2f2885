//! Fixed prompt blocks assembled by the config compiler.

use crucible_core::ProgressState;

/// Appended to every orchestrator's system prompt.
pub fn delegation_guidelines(subagent_names: &[String]) -> String {
    format!(
        "\n\n## Delegation\n\
         You are an orchestrator. You do not read, write, or run anything \
         yourself; you delegate all concrete work to your subagents via the \
         Task tool and coordinate their results.\n\
         Available subagents: {}.\n\
         Every Task call must name one of them in `subagent_type`. Host \
         paths (/Users/..., /home/..., C:\\...) are forbidden in prompts; \
         all file work happens under /scratch inside the sandbox.",
        subagent_names.join(", ")
    )
}

/// Appended to every subagent prompt.
pub const WORKSPACE_BLOCK: &str = "\n\n## Workspace\n\
    You work inside a sandbox. /scratch is your read-write workspace; \
    /skills and /claude-cache are read-only references. Host filesystem \
    paths are not accessible.";

/// Appended unless `advanced.disablePlatformGuidelines` is set.
pub const PLATFORM_BLOCK: &str = "\n\n## Platform guidelines\n\
    Keep tool results small: paginate reads, filter searches, and prefer \
    targeted queries over full dumps. Write large outputs incrementally to \
    files under /scratch instead of returning them inline. The filesystem \
    boundary is absolute: /scratch is read-write, /skills and /claude-cache \
    are read-only, and nothing else exists.";

/// Description for the auto-injected FileManager subagent.
pub const FILE_MANAGER_DESCRIPTION: &str =
    "handles file operations: cloning, downloading, workspace setup";

/// Prompt for the auto-injected FileManager subagent.
pub const FILE_MANAGER_PROMPT: &str = "You are FileManager. You prepare and \
    maintain the workspace for the other agents: fetching sources, laying \
    out directories, copying reference material, and cleaning up. All of \
    your work happens under /scratch; nothing outside it is writable.";

/// Appended to the system prompt when a session resumes with completed
/// steps in its progress journal.
pub fn progress_resume_block(state: &ProgressState) -> String {
    let mut block = format!(
        "\n\n## Resuming previous session\n\
         This session is resuming. Current phase: {}.\nCompleted steps:\n",
        state.current_phase
    );
    for step in &state.completed_steps {
        block.push_str(&format!("- {} ({})\n", step.step, step.result));
    }
    if !state.pending_steps.is_empty() {
        block.push_str("Pending steps:\n");
        for step in &state.pending_steps {
            block.push_str(&format!("- {step}\n"));
        }
    }
    block.push_str("Do not repeat completed work; continue from where the session left off.");
    block
}

/// Section appended when static or dynamic context is configured.
pub fn context_section(static_context: Option<&str>, dynamic: Option<&str>) -> Option<String> {
    let mut parts = Vec::new();
    if let Some(s) = static_context {
        if !s.trim().is_empty() {
            parts.push(s.trim().to_string());
        }
    }
    if let Some(d) = dynamic {
        if !d.trim().is_empty() {
            parts.push(d.trim().to_string());
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(format!("\n\n## Context\n{}", parts.join("\n\n")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delegation_names_subagents() {
        let block = delegation_guidelines(&["FileManager".into(), "Analyzer".into()]);
        assert!(block.contains("FileManager, Analyzer"));
        assert!(block.contains("Task"));
        assert!(block.contains("/Users/"));
    }

    #[test]
    fn test_resume_block_lists_steps() {
        let mut state = ProgressState::new("s", "task");
        state.set_phase("analysis");
        state.complete_step("cloned repo", "success");
        state.pending_steps.push("run tests".to_string());

        let block = progress_resume_block(&state);
        assert!(block.contains("analysis"));
        assert!(block.contains("cloned repo (success)"));
        assert!(block.contains("run tests"));
    }

    #[test]
    fn test_context_section_merging() {
        assert!(context_section(None, None).is_none());
        assert!(context_section(Some("  "), None).is_none());

        let merged = context_section(Some("repo: demo"), Some("branch: main")).unwrap();
        assert!(merged.contains("## Context"));
        assert!(merged.contains("repo: demo"));
        assert!(merged.contains("branch: main"));
    }
}
