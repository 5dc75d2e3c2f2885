//! Session execution for the crucible agent runtime.
//!
//! This crate turns a declarative [`AgentConfig`](crucible_core::AgentConfig)
//! into a running session:
//!
//! - [`ConfigCompiler`] produces the [`ExecutionPlan`](crucible_core::ExecutionPlan)
//!   the protocol client consumes, enforcing the orchestrator/worker
//!   delegation architecture along the way.
//! - [`ExecutionEngine`] provisions the sandbox, resumes the progress
//!   journal, drives the client's event stream, and fields out-of-band
//!   control (questions, interrupts, mode changes).
//! - [`EngineRegistry`] is the process-wide session→engine map that
//!   short-lived handlers use to reach a streaming session.

mod bridge;
mod callbacks;
mod compiler;
mod engine;
mod error;
mod progress;
mod prompts;
mod registry;

pub use bridge::QuestionBridge;
pub use compiler::{needs_sandbox, CompileContext, ConfigCompiler, ORCHESTRATION_TOOLS};
pub use engine::{EngineOptions, ExecutionEngine};
pub use error::{CompileError, EngineError};
pub use progress::{ProgressJournal, PROGRESS_FILE};
pub use registry::EngineRegistry;
