//! Top-level error type for crucible
//!
//! This module provides a simplified, user-facing error type that flattens
//! the per-subsystem error hierarchy into actionable categories.

use thiserror::Error;

use crate::client::ClientError;
use crate::eval::EvalError;

/// Top-level error type for crucible operations
///
/// This enum provides a flattened view of errors, categorized by how users
/// typically need to handle them:
///
/// - [`Error::Config`] - Fix the agent configuration and recompile
/// - [`Error::Sandbox`] - Start Docker / build the image, then retry
/// - [`Error::Validation`] - A path or command was refused; not retryable
/// - [`Error::Eval`] - A user-supplied snippet was rejected or timed out
/// - [`Error::Client`] - The LLM protocol client failed
/// - [`Error::Store`] - Session config persistence failed
/// - [`Error::Interrupted`] - The caller cancelled the session
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid agent configuration; aggregates every offense found.
    #[error("configuration error: {0}")]
    Config(String),

    /// The container engine or image is unusable for this session.
    #[error("sandbox error: {0}")]
    Sandbox(String),

    /// A path or command failed validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// User-supplied code was rejected, failed, or timed out.
    #[error("evaluation error: {0}")]
    Eval(String),

    /// The protocol client reported a fatal failure.
    #[error("client error: {0}")]
    Client(String),

    /// Tool execution failed at the engine level.
    #[error("tool error: {0}")]
    Tool(String),

    /// Session config store failure.
    #[error("store error: {0}")]
    Store(String),

    /// The session was interrupted by its caller.
    #[error("interrupted: {0}")]
    Interrupted(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    pub fn is_sandbox(&self) -> bool {
        matches!(self, Self::Sandbox(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    pub fn is_eval(&self) -> bool {
        matches!(self, Self::Eval(_))
    }

    pub fn is_client(&self) -> bool {
        matches!(self, Self::Client(_))
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted(_))
    }

    /// Returns true if retrying the same call might succeed without user
    /// intervention. Config and validation failures never are.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Sandbox(_) | Self::Client(_))
    }
}

impl From<EvalError> for Error {
    fn from(err: EvalError) -> Self {
        Self::Eval(err.to_string())
    }
}

impl From<ClientError> for Error {
    fn from(err: ClientError) -> Self {
        Self::Client(err.to_string())
    }
}

/// Result type for crucible operations
pub type Result<T> = std::result::Result<T, Error>;
