//! Runtime error types, flattened into `crucible_core::Error` at the
//! public boundary.

use thiserror::Error;

use crucible_sandbox::SandboxError;

/// Errors from plan compilation.
#[derive(Debug, Error)]
pub enum CompileError {
    /// One or more configuration offenses; all are collected before
    /// failing.
    #[error("invalid agent configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),

    /// A sandbox tool (or orchestrator) needs a container this compile
    /// was not given.
    #[error("agent requires a sandbox container: {0}")]
    SandboxRequired(String),
}

/// Errors from driving a session.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error("client failure: {0}")]
    Client(String),

    /// An answer was expected for a pending question that no longer
    /// exists (wrong id, or the session was interrupted).
    #[error("no pending question matches '{0}'")]
    AnswerMissing(String),

    #[error("session interrupted")]
    Interrupted,
}

impl From<CompileError> for crucible_core::Error {
    fn from(err: CompileError) -> Self {
        crucible_core::Error::Config(err.to_string())
    }
}

impl From<EngineError> for crucible_core::Error {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Compile(e) => e.into(),
            EngineError::Sandbox(e) => crucible_core::Error::Sandbox(e.to_string()),
            EngineError::Client(msg) => crucible_core::Error::Client(msg),
            EngineError::AnswerMissing(id) => {
                crucible_core::Error::Other(format!("no pending question matches '{id}'"))
            }
            EngineError::Interrupted => {
                crucible_core::Error::Interrupted("session interrupted".to_string())
            }
        }
    }
}
