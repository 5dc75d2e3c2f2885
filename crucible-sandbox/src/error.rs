//! Error types for the sandbox layer.

use thiserror::Error;

/// Errors raised by validators and the container controller.
///
/// Validation failures ([`SandboxError::PathRejected`],
/// [`SandboxError::CommandRejected`]) are expected to be surfaced to the
/// model as tool errors so it can self-correct. Engine-level failures
/// ([`SandboxError::EngineUnavailable`], [`SandboxError::ImageMissing`])
/// are fatal for the session and carry a remediation hint.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// A path failed read/write validation.
    #[error("path rejected: {0}")]
    PathRejected(String),

    /// A shell command failed validation.
    #[error("command rejected: {0}")]
    CommandRejected(String),

    /// The container engine is not reachable.
    #[error("container engine unavailable: {0}. Is Docker running? Start it and retry.")]
    EngineUnavailable(String),

    /// The sandbox image is not present locally.
    #[error("sandbox image '{0}' not found locally. Build it first: docker build -t {0} .")]
    ImageMissing(String),

    /// Creating or destroying a container failed.
    #[error("container lifecycle operation failed: {0}")]
    Lifecycle(String),

    /// An exec/read/write against a live container failed at the engine level.
    #[error("container operation failed: {0}")]
    ContainerOp(String),

    /// A container-side file operation reported a non-zero exit.
    #[error("file operation failed in container: {0}")]
    FileOp(String),

    /// Container creation exceeded its composite timeout.
    #[error("container initialization timed out after {0} ms")]
    InitTimeout(u64),

    /// No container is mapped to the given session.
    #[error("no container for session '{0}'")]
    UnknownSession(String),
}

impl From<bollard::errors::Error> for SandboxError {
    fn from(err: bollard::errors::Error) -> Self {
        Self::ContainerOp(err.to_string())
    }
}
