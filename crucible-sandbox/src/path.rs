//! Path validation for container-side file operations.
//!
//! Every path an agent reads or writes is classified against the sandbox's
//! allowed directories before any container call is made. Validation always
//! operates on the *normalized* path; the raw input is never trusted.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::SandboxError;

/// Directories readable from inside the sandbox.
pub const READ_ROOTS: &[&str] = &["/scratch", "/skills", "/claude-cache"];

/// Directories writable from inside the sandbox.
pub const WRITE_ROOTS: &[&str] = &["/scratch"];

/// System directories that are never reachable, regardless of operation.
const BLOCKED_DIRS: &[&str] = &[
    "/etc", "/var", "/sys", "/proc", "/dev", "/boot", "/root", "/usr", "/bin", "/sbin", "/lib",
    "/lib64", "/tmp", "/run",
];

/// A path that passed validation. Holds the normalized form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validated {
    /// Normalized absolute path, safe to hand to the container.
    pub path: String,
}

/// Classifies absolute paths as read-permitted, write-permitted, or blocked.
///
/// The validator is stateless and cheap to construct; [`PathValidator::default`]
/// is the usual entry point.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathValidator;

impl PathValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate a path for reading.
    ///
    /// A valid read path normalizes to an absolute path under `/scratch`,
    /// `/skills`, or `/claude-cache`, and does not match any sensitive-file
    /// pattern.
    pub fn validate_read(&self, path: &str) -> Result<Validated, SandboxError> {
        self.validate(path, READ_ROOTS, "read")
    }

    /// Validate a path for writing.
    ///
    /// Writes are only ever permitted under `/scratch`.
    pub fn validate_write(&self, path: &str) -> Result<Validated, SandboxError> {
        self.validate(path, WRITE_ROOTS, "write")
    }

    fn validate(
        &self,
        path: &str,
        roots: &[&str],
        operation: &str,
    ) -> Result<Validated, SandboxError> {
        if path.is_empty() {
            return Err(SandboxError::PathRejected("path is empty".to_string()));
        }

        let normalized = normalize_path(path);

        if !normalized.starts_with('/') {
            return Err(SandboxError::PathRejected(format!(
                "'{path}' is not absolute; use an absolute path under {}",
                roots.join(", ")
            )));
        }

        if let Some(dir) = BLOCKED_DIRS.iter().find(|d| is_under(&normalized, d)) {
            return Err(SandboxError::PathRejected(format!(
                "'{normalized}' is inside blocked system directory '{dir}'"
            )));
        }

        if !roots.iter().any(|root| is_under(&normalized, root)) {
            return Err(SandboxError::PathRejected(format!(
                "'{normalized}' is outside the directories allowed for {operation} ({})",
                roots.join(", ")
            )));
        }

        if let Some(pattern) = sensitive_match(&normalized) {
            return Err(SandboxError::PathRejected(format!(
                "'{normalized}' matches sensitive-file pattern '{pattern}'"
            )));
        }

        Ok(Validated { path: normalized })
    }
}

/// Resolve `.` and `..` segments and collapse repeated separators.
///
/// Purely lexical: nothing on disk is consulted, and symlinks are not
/// followed (inside the container there is nothing interesting to link to).
/// `..` at the root stays at the root, so `/scratch/..` normalizes to `/`.
/// Idempotent: `normalize_path(normalize_path(p)) == normalize_path(p)`.
pub fn normalize_path(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut stack: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            s => stack.push(s),
        }
    }

    if absolute {
        format!("/{}", stack.join("/"))
    } else {
        stack.join("/")
    }
}

/// Join a relative segment onto a base path and normalize the result.
pub fn join_path(base: &str, segment: &str) -> String {
    if segment.starts_with('/') {
        normalize_path(segment)
    } else {
        normalize_path(&format!("{base}/{segment}"))
    }
}

/// The directory portion of a path (`/scratch/a/b.txt` -> `/scratch/a`).
pub fn dirname(path: &str) -> String {
    let normalized = normalize_path(path);
    match normalized.rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => normalized[..idx].to_string(),
        None => ".".to_string(),
    }
}

/// The final component of a path (`/scratch/a/b.txt` -> `b.txt`).
pub fn filename(path: &str) -> String {
    let normalized = normalize_path(path);
    normalized
        .rsplit('/')
        .next()
        .unwrap_or(&normalized)
        .to_string()
}

/// Whether a path looks like a host filesystem path rather than a
/// container path. Used by the tool layer to produce a diagnostic that
/// names the sandbox directories instead of a bare rejection.
pub fn looks_like_host_path(path: &str) -> bool {
    static HOST_RE: OnceLock<Regex> = OnceLock::new();
    let re = HOST_RE.get_or_init(|| {
        Regex::new(r"^(/Users/|/home/|[A-Za-z]:\\)").expect("host path regex")
    });
    re.is_match(path)
}

fn is_under(path: &str, root: &str) -> bool {
    path == root || path.starts_with(&format!("{root}/"))
}

/// Patterns for files that are never readable or writable even inside an
/// allowed directory: dotenv files, private keys, SSH material, cloud
/// credentials, package-manager tokens, and database/auth configs.
fn sensitive_match(path: &str) -> Option<&'static str> {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        let table: &[(&str, &str)] = &[
            (r"(^|/)\.env($|\.)", "dotenv"),
            (r"\.(pem|key|p12|pfx|jks)$", "private key"),
            (r"(^|/)id_(rsa|dsa|ecdsa|ed25519)(\.pub)?$", "SSH key"),
            (r"(^|/)\.ssh(/|$)", "SSH directory"),
            (r"(^|/)(authorized_keys|known_hosts)$", "SSH config"),
            (r"(^|/)\.aws(/|$)", "AWS credentials"),
            (r"(^|/)\.azure(/|$)", "Azure credentials"),
            (r"(^|/)\.config/gcloud(/|$)", "GCP credentials"),
            (r"(^|/)(\.npmrc|\.pypirc|\.cargo/credentials(\.toml)?)$", "package-manager token"),
            (r"(^|/)(\.netrc|\.git-credentials)$", "stored credentials"),
            (r"(^|/)(\.pgpass|\.my\.cnf|\.htpasswd)$", "database/auth config"),
        ];
        table
            .iter()
            .map(|(pat, label)| (Regex::new(pat).expect("sensitive pattern"), *label))
            .collect()
    });

    patterns
        .iter()
        .find(|(re, _)| re.is_match(path))
        .map(|(_, label)| *label)
}
