//! HTTP surface for the crucible agent runtime.
//!
//! Handlers are short-lived; they reach long-running sessions through the
//! [`EngineRegistry`](crucible_runtime::EngineRegistry) and reconstitute
//! configurations from the
//! [`SessionConfigStore`](crucible_core::SessionConfigStore). Execution
//! streams back to the caller as server-sent events.

mod error;
mod handlers;
mod router;
mod state;

pub use error::{ApiError, BuildError};
pub use handlers::{AnswerRequest, ExecuteRequest, ModeRequest, StatusResponse};
pub use router::CrucibleRouter;
pub use state::AppState;
