//! Router builder for crucible HTTP endpoints.

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::BuildError;
use crate::handlers;
use crate::state::AppState;

/// Builder for configuring crucible HTTP endpoints.
///
/// # Example
///
/// ```rust,no_run
/// use crucible_server::{AppState, CrucibleRouter};
///
/// # fn example(state: AppState) -> Result<(), Box<dyn std::error::Error>> {
/// let app = CrucibleRouter::new(state)
///     .with_api("/api/sessions")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct CrucibleRouter {
    state: AppState,
    api_path: Option<String>,
}

impl CrucibleRouter {
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            api_path: None,
        }
    }

    /// Enable the session API under the given path prefix.
    ///
    /// Routes:
    /// - `POST {prefix}/:id/execute` — start/resume, streams SSE events
    /// - `POST {prefix}/:id/answer` — answer a pending question
    /// - `POST {prefix}/:id/interrupt` — interrupt the stream
    /// - `POST {prefix}/:id/mode` — change permission mode / model
    /// - `GET  {prefix}/:id/status` — tree, timeline, progress
    /// - `DELETE {prefix}/:id` — destroy the session
    pub fn with_api(mut self, path: impl Into<String>) -> Self {
        self.api_path = Some(path.into());
        self
    }

    /// Build the router with all configured endpoints.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::NoEndpoints`] if no endpoints were
    /// configured. Call `.with_api()` before `.build()`.
    pub fn build(self) -> Result<Router, BuildError> {
        let Some(prefix) = self.api_path else {
            return Err(BuildError::NoEndpoints);
        };

        let api = Router::new()
            .route("/:id/execute", post(handlers::execute_handler))
            .route("/:id/answer", post(handlers::answer_handler))
            .route("/:id/interrupt", post(handlers::interrupt_handler))
            .route("/:id/mode", post(handlers::mode_handler))
            .route("/:id/status", get(handlers::status_handler))
            .route("/:id", delete(handlers::delete_handler));

        Ok(Router::new()
            .nest(&prefix, api)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(self.state))
    }

    /// Build the router and nest it under a prefix path.
    pub fn build_nested(self, prefix: impl Into<String>) -> Result<Router, BuildError> {
        Ok(Router::new().nest(&prefix.into(), self.build()?))
    }
}
