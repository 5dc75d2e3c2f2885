//! Sandbox layer for the crucible agent runtime.
//!
//! Everything an agent does to a filesystem or a shell goes through this
//! crate: paths are classified against the container's allowed directories,
//! shell commands are tokenized and checked against an allow/deny policy,
//! and the surviving operations are executed inside a per-session Docker
//! container managed by [`SandboxController`].
//!
//! The container's filesystem view is deliberately tiny:
//!
//! - `/scratch` — read-write, bind-mounted to a per-session host directory
//! - `/skills` — read-only, present only if the host source exists
//! - `/claude-cache` — read-only project cache, present only if the host
//!   source exists
//!
//! No other host directory is ever exposed.

mod command;
mod controller;
mod error;
mod mounts;
mod path;
mod registry;

pub use command::{CommandValidator, ValidatedCommand};
pub use controller::{
    container_name, ContainerStatus, ExecOutput, FileInfo, SandboxController,
    CONTAINER_NAME_PREFIX, DEFAULT_CREATE_TIMEOUT, SANDBOX_IMAGE,
};
pub use error::SandboxError;
pub use mounts::{cache_name_for, MountSet};
pub use path::{
    dirname, filename, join_path, looks_like_host_path, normalize_path, PathValidator, Validated,
};

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, SandboxError>;

pub use registry::ContainerRegistry;
