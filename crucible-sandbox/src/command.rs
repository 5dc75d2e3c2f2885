//! Shell command validation.
//!
//! Commands are tokenized with quote and escape awareness (newlines are
//! preserved so heredocs survive), then checked against three rules:
//!
//! 1. No command substitution (`$(` or backticks) outside single quotes,
//!    and no output redirection targeting anything but `/scratch` or
//!    `/dev/null`.
//! 2. Every token in a command position (first token, and the token after
//!    `|`, `&&`, `||`, `;`, or a newline) must be on the allow-list, or be
//!    one of the path-restricted commands (`cp`, `mkdir`) with conforming
//!    path arguments. Tokens in argument positions are never checked, so
//!    `grep 'rm' log.txt` is fine.
//! 3. Unknown command names are rejected by default.
//!
//! Heredoc bodies are recognized and skipped: a blocked name inside
//! `python3 << 'EOF' ... EOF` is data, not a command. An *unterminated*
//! heredoc still validates; the container shell reports that failure at
//! exec time.

use crate::error::SandboxError;
use crate::path::normalize_path;

/// A command that passed validation, in sanitized form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedCommand {
    /// Sanitized command text, safe to pass to `bash -c` in the container.
    pub sanitized: String,
}

/// Commands runnable without path restrictions: read-only filesystem
/// inspection, search/filter, text processing, and scripting runtimes
/// shipped in the sandbox image.
const ALLOWED_COMMANDS: &[&str] = &[
    // filesystem inspection
    "ls", "pwd", "cat", "head", "tail", "wc", "stat", "file", "du", "df", "tree", "find",
    "readlink", "realpath", "basename", "dirname",
    // search and filter
    "grep", "egrep", "fgrep", "rg", "cut", "sort", "uniq", "tr", "diff", "comm", "paste", "join",
    "awk", "sed",
    // text processing
    "echo", "printf", "jq", "base64", "md5sum", "sha1sum", "sha256sum", "nl", "tac", "od", "xxd",
    "fold", "column",
    // scripting runtimes
    "python3", "python", "node",
    // shell builtins that show up in pipelines
    "true", "false", "test", "[", "expr", "seq", "which",
];

/// Commands allowed only when every path argument conforms: `cp` sources
/// must lie in a read-allowed directory and its destination in `/scratch`;
/// every `mkdir` path must lie in `/scratch`.
const PATH_RESTRICTED_COMMANDS: &[&str] = &["cp", "mkdir"];

/// Explicitly denied commands. The deny table also names `cp` and `mkdir`
/// (file modification in general), but the path-restricted allowance above
/// is checked first and is authoritative for those two.
const DENIED_COMMANDS: &[&str] = &[
    // file modification
    "rm", "rmdir", "mv", "chmod", "chown", "chgrp", "ln", "dd", "truncate", "shred", "cp",
    "mkdir", "touch",
    // network egress
    "curl", "wget", "nc", "ncat", "netcat", "telnet", "ssh", "scp", "sftp", "rsync", "ftp",
    // privilege escalation
    "sudo", "su", "doas", "passwd",
    // package management
    "apt", "apt-get", "dpkg", "yum", "dnf", "apk", "pacman", "pip", "pip3", "npm", "npx", "yarn",
    "pnpm", "gem", "cargo",
    // editors
    "vi", "vim", "nvim", "nano", "emacs", "ed",
    // schedulers and process control
    "crontab", "at", "batch", "nohup", "systemctl", "service", "kill", "pkill", "killall",
    "reboot", "shutdown", "mount", "umount", "mkfs", "fdisk",
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    /// A word with quotes resolved away. `quoted` is true if any part of
    /// the word was quoted (heredoc delimiters care).
    Word { text: String, quoted: bool },
    /// `|`, `&&`, `||`, `;`, or a newline: the next word is a command.
    Separator,
    /// `>` or `>>` (with any fd prefix): the next word is an output target.
    OutputRedirect,
    /// `<`: input redirection, target unchecked.
    InputRedirect,
    /// `<<` or `<<-`: the next word is a heredoc delimiter.
    Heredoc { strip_tabs: bool },
}

/// Tokenizes shell command strings and enforces the sandbox command policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandValidator;

impl CommandValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate a command string.
    ///
    /// Returns the sanitized command on success. All failures are
    /// [`SandboxError::CommandRejected`] with a reason the model can act
    /// on.
    pub fn validate(&self, command: &str) -> Result<ValidatedCommand, SandboxError> {
        let sanitized = sanitize(command);
        if sanitized.trim().is_empty() {
            return Err(SandboxError::CommandRejected("command is empty".to_string()));
        }

        let tokens = tokenize(&sanitized)?;
        check_commands(&tokens)?;

        Ok(ValidatedCommand { sanitized })
    }
}

/// Strip null bytes and carriage returns, collapse runs of non-newline
/// whitespace, and collapse consecutive newlines.
fn sanitize(command: &str) -> String {
    let mut out = String::with_capacity(command.len());
    let mut in_space = false;
    let mut in_newline = false;

    for ch in command.chars() {
        match ch {
            '\0' | '\r' => {}
            '\n' => {
                if !in_newline {
                    out.push('\n');
                }
                in_newline = true;
                in_space = false;
            }
            c if c.is_whitespace() => {
                if !in_space {
                    out.push(' ');
                }
                in_space = true;
                in_newline = false;
            }
            c => {
                out.push(c);
                in_space = false;
                in_newline = false;
            }
        }
    }
    out.trim_matches(|c| c == ' ' || c == '\n').to_string()
}

/// Tokenize with quote/escape awareness. Rejects substitution while
/// scanning (so `$(` inside single quotes is fine but anywhere else is
/// not) and skips heredoc bodies entirely.
fn tokenize(input: &str) -> Result<Vec<Token>, SandboxError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    // Heredoc delimiters seen on the current line, consumed in order once
    // the line ends.
    let mut pending_heredocs: Vec<(String, bool)> = Vec::new();
    // Set after a `<<` so the next word is captured as a delimiter.
    let mut awaiting_delimiter: Option<bool> = None;

    let mut current = String::new();
    let mut current_quoted = false;

    macro_rules! flush_word {
        () => {
            if !current.is_empty() || current_quoted {
                if let Some(strip_tabs) = awaiting_delimiter.take() {
                    pending_heredocs.push((std::mem::take(&mut current), strip_tabs));
                    current_quoted = false;
                } else {
                    tokens.push(Token::Word {
                        text: std::mem::take(&mut current),
                        quoted: current_quoted,
                    });
                    current_quoted = false;
                }
            }
        };
    }

    while i < chars.len() {
        let ch = chars[i];
        match ch {
            '\'' => {
                // Single quotes: everything literal until the closing quote.
                current_quoted = true;
                i += 1;
                while i < chars.len() && chars[i] != '\'' {
                    current.push(chars[i]);
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(SandboxError::CommandRejected(
                        "unterminated single quote".to_string(),
                    ));
                }
                i += 1;
            }
            '"' => {
                // Double quotes: substitution still applies inside.
                current_quoted = true;
                i += 1;
                while i < chars.len() && chars[i] != '"' {
                    match chars[i] {
                        '`' => {
                            return Err(SandboxError::CommandRejected(
                                "backtick command substitution is not allowed".to_string(),
                            ))
                        }
                        '$' if chars.get(i + 1) == Some(&'(') => {
                            return Err(SandboxError::CommandRejected(
                                "command substitution $(...) is not allowed".to_string(),
                            ))
                        }
                        '\\' if i + 1 < chars.len() => {
                            current.push(chars[i + 1]);
                            i += 1;
                        }
                        c => current.push(c),
                    }
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(SandboxError::CommandRejected(
                        "unterminated double quote".to_string(),
                    ));
                }
                i += 1;
            }
            '\\' => {
                if let Some(&next) = chars.get(i + 1) {
                    if next != '\n' {
                        current.push(next);
                    }
                    i += 2;
                } else {
                    i += 1;
                }
            }
            '`' => {
                return Err(SandboxError::CommandRejected(
                    "backtick command substitution is not allowed".to_string(),
                ))
            }
            '$' if chars.get(i + 1) == Some(&'(') => {
                return Err(SandboxError::CommandRejected(
                    "command substitution $(...) is not allowed".to_string(),
                ))
            }
            '\n' => {
                flush_word!();
                if pending_heredocs.is_empty() {
                    tokens.push(Token::Separator);
                    i += 1;
                } else {
                    // Skip heredoc bodies: consume raw lines until each
                    // pending delimiter is matched. An unmatched delimiter
                    // consumes the rest of the input; that is the shell's
                    // problem to report, not ours.
                    i += 1;
                    for (delimiter, strip_tabs) in pending_heredocs.drain(..) {
                        loop {
                            let start = i;
                            while i < chars.len() && chars[i] != '\n' {
                                i += 1;
                            }
                            let line: String = chars[start..i].iter().collect();
                            let line = if strip_tabs {
                                line.trim_start_matches('\t').to_string()
                            } else {
                                line
                            };
                            let at_end = i >= chars.len();
                            if !at_end {
                                i += 1;
                            }
                            if line == delimiter || at_end {
                                break;
                            }
                        }
                    }
                    tokens.push(Token::Separator);
                }
                continue;
            }
            ' ' | '\t' => {
                flush_word!();
                i += 1;
            }
            '|' => {
                flush_word!();
                tokens.push(Token::Separator);
                i += if chars.get(i + 1) == Some(&'|') { 2 } else { 1 };
            }
            '&' => {
                flush_word!();
                if chars.get(i + 1) == Some(&'&') {
                    tokens.push(Token::Separator);
                    i += 2;
                } else if chars.get(i + 1) == Some(&'>') {
                    // &> redirects both streams.
                    tokens.push(Token::OutputRedirect);
                    i += if chars.get(i + 2) == Some(&'>') { 3 } else { 2 };
                } else {
                    return Err(SandboxError::CommandRejected(
                        "backgrounding with '&' is not allowed".to_string(),
                    ));
                }
            }
            ';' => {
                flush_word!();
                tokens.push(Token::Separator);
                i += 1;
            }
            '>' => {
                // A pure-digit word glued to '>' is an fd prefix (2>), not
                // an argument.
                if !current.is_empty() && current.chars().all(|c| c.is_ascii_digit()) {
                    current.clear();
                } else {
                    flush_word!();
                }
                tokens.push(Token::OutputRedirect);
                i += if chars.get(i + 1) == Some(&'>') { 2 } else { 1 };
                // >&2 style fd duplication has no path target.
                if chars.get(i) == Some(&'&') {
                    tokens.pop();
                    i += 1;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            '<' => {
                flush_word!();
                if chars.get(i + 1) == Some(&'<') {
                    let strip_tabs = chars.get(i + 2) == Some(&'-');
                    awaiting_delimiter = Some(strip_tabs);
                    tokens.push(Token::Heredoc { strip_tabs });
                    i += if strip_tabs { 3 } else { 2 };
                } else {
                    tokens.push(Token::InputRedirect);
                    i += 1;
                }
            }
            c => {
                current.push(c);
                i += 1;
            }
        }
    }
    flush_word!();

    Ok(tokens)
}

/// Walk the token stream enforcing command-position and redirection rules.
fn check_commands(tokens: &[Token]) -> Result<(), SandboxError> {
    let mut expect_command = true;
    let mut idx = 0;

    while idx < tokens.len() {
        match &tokens[idx] {
            Token::Separator => {
                expect_command = true;
                idx += 1;
            }
            Token::Heredoc { .. } => {
                // Delimiter was swallowed by the tokenizer.
                idx += 1;
            }
            Token::InputRedirect => {
                // Input sources are covered by the path validator at read
                // time, not here.
                idx += 1;
                if matches!(tokens.get(idx), Some(Token::Word { .. })) {
                    idx += 1;
                }
            }
            Token::OutputRedirect => {
                idx += 1;
                let target = match tokens.get(idx) {
                    Some(Token::Word { text, .. }) => text.clone(),
                    _ => {
                        return Err(SandboxError::CommandRejected(
                            "output redirection without a target".to_string(),
                        ))
                    }
                };
                check_redirect_target(&target)?;
                idx += 1;
            }
            Token::Word { text, .. } => {
                if expect_command {
                    check_command_word(text, tokens, idx)?;
                    expect_command = false;
                }
                idx += 1;
            }
        }
    }
    Ok(())
}

fn check_redirect_target(target: &str) -> Result<(), SandboxError> {
    if target == "/dev/null" {
        return Ok(());
    }
    let normalized = normalize_path(target);
    if normalized.starts_with("/scratch/") {
        return Ok(());
    }
    Err(SandboxError::CommandRejected(format!(
        "output redirection to '{target}' is not allowed; redirect to /scratch or /dev/null"
    )))
}

fn check_command_word(name: &str, tokens: &[Token], idx: usize) -> Result<(), SandboxError> {
    // Environment assignments prefixing a command (FOO=bar cmd) are not
    // commands themselves.
    if name.contains('=') && !name.starts_with('=') {
        return Err(SandboxError::CommandRejected(format!(
            "inline environment assignment '{name}' is not allowed"
        )));
    }

    // Path-restricted allowance wins over the deny table for cp/mkdir.
    if PATH_RESTRICTED_COMMANDS.contains(&name) {
        return check_path_restricted(name, tokens, idx);
    }

    if ALLOWED_COMMANDS.contains(&name) {
        return Ok(());
    }

    if DENIED_COMMANDS.contains(&name) {
        return Err(SandboxError::CommandRejected(format!(
            "command '{name}' is blocked in the sandbox"
        )));
    }

    Err(SandboxError::CommandRejected(format!(
        "command '{name}' is not on the allow-list"
    )))
}

/// Validate the path arguments of `cp` and `mkdir`.
fn check_path_restricted(name: &str, tokens: &[Token], idx: usize) -> Result<(), SandboxError> {
    let mut paths: Vec<String> = Vec::new();
    for token in &tokens[idx + 1..] {
        match token {
            Token::Word { text, .. } => {
                if !text.starts_with('-') {
                    paths.push(text.clone());
                }
            }
            Token::Separator => break,
            // Redirections are validated separately.
            _ => break,
        }
    }

    if paths.is_empty() {
        return Err(SandboxError::CommandRejected(format!(
            "'{name}' requires path arguments"
        )));
    }

    match name {
        "cp" => {
            if paths.len() < 2 {
                return Err(SandboxError::CommandRejected(
                    "'cp' requires a source and a destination".to_string(),
                ));
            }
            let dest = paths.pop().unwrap_or_default();
            for src in &paths {
                if !in_read_root(src) {
                    return Err(SandboxError::CommandRejected(format!(
                        "'cp' source '{src}' must be under /scratch, /skills, or /claude-cache"
                    )));
                }
            }
            if !in_scratch(&dest) {
                return Err(SandboxError::CommandRejected(format!(
                    "'cp' destination '{dest}' must be under /scratch"
                )));
            }
        }
        "mkdir" => {
            for path in &paths {
                if !in_scratch(path) {
                    return Err(SandboxError::CommandRejected(format!(
                        "'mkdir' path '{path}' must be under /scratch"
                    )));
                }
            }
        }
        _ => {}
    }
    Ok(())
}

fn in_scratch(path: &str) -> bool {
    let normalized = normalize_path(path);
    normalized == "/scratch" || normalized.starts_with("/scratch/")
}

fn in_read_root(path: &str) -> bool {
    let normalized = normalize_path(path);
    crate::path::READ_ROOTS
        .iter()
        .any(|root| normalized == *root || normalized.starts_with(&format!("{root}/")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> CommandValidator {
        CommandValidator::new()
    }

    // ===== basic acceptance =====

    #[test]
    fn test_simple_commands_accepted() {
        for cmd in [
            "ls /scratch",
            "cat /scratch/notes.txt",
            "grep -r pattern /scratch/src",
            "python3 /scratch/run.py",
            "find /scratch -name '*.rs'",
        ] {
            assert!(validator().validate(cmd).is_ok(), "{cmd} should validate");
        }
    }

    #[test]
    fn test_pipelines_check_every_command_position() {
        assert!(validator().validate("cat /scratch/a | grep x | sort").is_ok());
        let err = validator()
            .validate("cat /scratch/a | rm /scratch/a")
            .unwrap_err();
        assert!(err.to_string().contains("rm"));
    }

    #[test]
    fn test_command_positions_after_connectors() {
        for cmd in [
            "ls /scratch && rm /scratch/x",
            "ls /scratch || rm /scratch/x",
            "ls /scratch; rm /scratch/x",
        ] {
            assert!(validator().validate(cmd).is_err(), "{cmd} should be rejected");
        }
    }

    #[test]
    fn test_blocked_name_in_argument_position_is_fine() {
        assert!(validator().validate("grep 'rm' /scratch/log.txt").is_ok());
        assert!(validator().validate("echo sudo").is_ok());
    }

    #[test]
    fn test_unknown_commands_rejected_by_default() {
        let err = validator().validate("frobnicate /scratch/x").unwrap_err();
        assert!(err.to_string().contains("allow-list"));
    }

    // ===== substitution =====

    #[test]
    fn test_substitution_rejected() {
        assert!(validator().validate("echo $(whoami)").is_err());
        assert!(validator().validate("echo `whoami`").is_err());
        assert!(validator().validate("echo \"$(whoami)\"").is_err());
    }

    #[test]
    fn test_substitution_in_single_quotes_is_literal() {
        assert!(validator().validate("echo '$(not run)'").is_ok());
        assert!(validator().validate("grep '`tick`' /scratch/f").is_ok());
    }

    // ===== redirection =====

    #[test]
    fn test_redirection_to_scratch_or_devnull() {
        assert!(validator().validate("echo hi > /scratch/out.txt").is_ok());
        assert!(validator().validate("echo hi >> /scratch/out.txt").is_ok());
        assert!(validator().validate("ls /scratch 2> /dev/null").is_ok());
    }

    #[test]
    fn test_redirection_elsewhere_rejected() {
        for cmd in [
            "echo hi > /etc/passwd",
            "echo hi > /project/out.txt",
            "echo hi >> /skills/notes.md",
            "echo hi > /scratch/../etc/x",
        ] {
            assert!(validator().validate(cmd).is_err(), "{cmd} should be rejected");
        }
    }

    #[test]
    fn test_fd_duplication_is_not_a_path_target() {
        assert!(validator().validate("ls /scratch >&2").is_ok());
    }

    // ===== heredocs =====

    #[test]
    fn test_heredoc_body_is_not_parsed_as_commands() {
        let cmd = "python3 << 'EOF'\nprint(1)\nEOF";
        assert!(validator().validate(cmd).is_ok());
    }

    #[test]
    fn test_heredoc_body_may_contain_blocked_names() {
        let cmd = "cat << EOF\nrm -rf /\nsudo reboot\nEOF";
        assert!(validator().validate(cmd).is_ok());
    }

    #[test]
    fn test_blocked_command_after_heredoc_still_rejected() {
        let cmd = "cat << EOF\nbody\nEOF\nrm /scratch/x";
        assert!(validator().validate(cmd).is_err());
    }

    #[test]
    fn test_unterminated_heredoc_validates() {
        // The shell will report the missing delimiter at exec time.
        let cmd = "python3 << 'EOF'\nprint(1)";
        assert!(validator().validate(cmd).is_ok());
    }

    #[test]
    fn test_heredoc_dash_strips_tabs_before_delimiter_match() {
        let cmd = "cat <<- EOF\n\tindented\n\tEOF\nls /scratch";
        assert!(validator().validate(cmd).is_ok());
    }

    // ===== path-restricted commands =====

    #[test]
    fn test_cp_within_sandbox_roots() {
        assert!(validator().validate("cp /scratch/a /scratch/b").is_ok());
        assert!(validator().validate("cp /skills/tpl.md /scratch/tpl.md").is_ok());
        assert!(validator()
            .validate("cp /claude-cache/projects/x/f /scratch/f")
            .is_ok());
    }

    #[test]
    fn test_cp_outside_scratch_dest_rejected() {
        assert!(validator().validate("cp /scratch/a /project/b").is_err());
        assert!(validator().validate("cp /etc/passwd /scratch/pw").is_err());
    }

    #[test]
    fn test_mkdir_only_in_scratch() {
        assert!(validator().validate("mkdir -p /scratch/work/sub").is_ok());
        assert!(validator().validate("mkdir /var/work").is_err());
    }

    // ===== misc rejections =====

    #[test]
    fn test_denied_commands() {
        for cmd in ["curl https://example.com", "sudo ls", "pip install x", "vim /scratch/a"] {
            let err = validator().validate(cmd).unwrap_err();
            assert!(err.to_string().contains("blocked"), "{cmd}: {err}");
        }
    }

    #[test]
    fn test_backgrounding_rejected() {
        assert!(validator().validate("python3 /scratch/run.py &").is_err());
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(validator().validate("   ").is_err());
    }

    // ===== sanitization =====

    #[test]
    fn test_sanitize_strips_nulls_and_collapses_whitespace() {
        let out = validator().validate("ls\0   -la\t\t/scratch\r").unwrap();
        assert_eq!(out.sanitized, "ls -la /scratch");
    }

    #[test]
    fn test_sanitize_collapses_consecutive_newlines() {
        let out = validator().validate("ls /scratch\n\n\nls /skills").unwrap();
        assert_eq!(out.sanitized, "ls /scratch\nls /skills");
    }
}
