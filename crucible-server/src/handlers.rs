//! Request handlers: execute (SSE), answer, interrupt, status, delete.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crucible_core::{AgentConfig, PermissionMode};
use crucible_runtime::{EngineOptions, ExecutionEngine};

use crate::error::ApiError;
use crate::state::AppState;

/// Body for starting (or resuming) an execution. Both fields are optional
/// so a caller can re-trigger a stored session by reference alone.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    #[serde(default)]
    pub agent_config: Option<AgentConfig>,
    #[serde(default)]
    pub prompt: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRequest {
    pub request_id: String,
    pub answers: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeRequest {
    pub permission_mode: Option<PermissionMode>,
    pub model: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub session_id: String,
    pub root: crucible_core::ExecutionNode,
    pub timeline: Vec<crucible_core::TimelineEvent>,
    pub progress: Option<crucible_core::ProgressState>,
}

/// POST `/sessions/{id}/execute` — start the session and stream its
/// events as SSE.
pub async fn execute_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<ExecuteRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    // Resolve config and prompt: the request wins, the store fills gaps.
    let stored = state
        .store
        .load(&session_id)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let (config, prompt) = match (request.agent_config, request.prompt, stored) {
        (Some(config), Some(prompt), _) => {
            // Persist so later handler invocations can reconstitute the
            // session by reference.
            if let Err(e) = state.store.save(&session_id, &config, &prompt) {
                warn!(%session_id, error = %e, "session config save failed");
            }
            (config, prompt)
        }
        (None, None, Some(stored)) => (stored.agent_config, stored.prompt),
        (Some(config), None, Some(stored)) => (config, stored.prompt),
        (None, Some(prompt), Some(stored)) => (stored.agent_config, prompt),
        _ => {
            return Err(ApiError::BadRequest(
                "agentConfig and prompt are required for a new session".to_string(),
            ))
        }
    };

    let engine = ExecutionEngine::new(EngineOptions {
        session_id: session_id.clone(),
        config,
        client: state.client.clone(),
        controller: state.controller.clone(),
        cwd: state.cwd.clone(),
        home: state.home.clone(),
        token_providers: state.token_providers.clone(),
        registry: Some(state.registry.clone()),
    });

    let stream = engine.execute(prompt).map(|item| {
        let event = match item {
            Ok(event) => Event::default()
                .json_data(&event)
                .unwrap_or_else(|e| Event::default().event("error").data(e.to_string())),
            Err(e) => Event::default().event("error").data(e.to_string()),
        };
        Ok(event)
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// POST `/sessions/{id}/answer` — deliver answers to the pending
/// `AskUserQuestion`.
pub async fn answer_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<AnswerRequest>,
) -> Result<Json<Value>, ApiError> {
    let engine = live_engine(&state, &session_id)?;
    engine
        .resolve_question(&request.request_id, request.answers)
        .await
        .map_err(|e| ApiError::Conflict(e.to_string()))?;
    Ok(Json(json!({ "ok": true })))
}

/// POST `/sessions/{id}/interrupt` — stop the in-flight stream.
pub async fn interrupt_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let engine = live_engine(&state, &session_id)?;
    engine.interrupt().await;
    Ok(Json(json!({ "ok": true })))
}

/// POST `/sessions/{id}/mode` — change permission mode and/or model.
pub async fn mode_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<ModeRequest>,
) -> Result<Json<Value>, ApiError> {
    let engine = live_engine(&state, &session_id)?;
    if let Some(mode) = request.permission_mode {
        engine
            .set_permission_mode(mode)
            .await
            .map_err(|e| ApiError::Conflict(e.to_string()))?;
    }
    if let Some(model) = &request.model {
        engine
            .set_model(model)
            .await
            .map_err(|e| ApiError::Conflict(e.to_string()))?;
    }
    Ok(Json(json!({ "ok": true })))
}

/// GET `/sessions/{id}/status` — tree, timeline, and progress snapshot.
pub async fn status_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let engine = live_engine(&state, &session_id)?;
    Ok(Json(StatusResponse {
        session_id,
        root: engine.root_node(),
        timeline: engine.timeline(),
        progress: engine.progress(),
    }))
}

/// DELETE `/sessions/{id}` — destroy the engine (and its container) and
/// forget the stored config.
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if let Some(engine) = state.registry.get(&session_id) {
        let _ = engine.destroy().await;
    } else {
        // No live engine; still clean up any leftover container.
        let _ = state.controller.destroy_by_session(&session_id).await;
    }
    let deleted = state
        .store
        .delete(&session_id)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(json!({ "ok": true, "configDeleted": deleted })))
}

fn live_engine(state: &AppState, session_id: &str) -> Result<Arc<ExecutionEngine>, ApiError> {
    state
        .registry
        .get(session_id)
        .ok_or_else(|| ApiError::SessionNotFound(session_id.to_string()))
}
