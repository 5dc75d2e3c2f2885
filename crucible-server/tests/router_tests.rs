//! Router-level tests with a scripted protocol client.

use std::sync::Arc;

use axum_test::TestServer;
use serde_json::json;

use crucible_core::test_utils::MockClient;
use crucible_core::{AssistantMessage, ClientEvent};
use crucible_runtime::EngineRegistry;
use crucible_sandbox::{ContainerRegistry, SandboxController};
use crucible_server::{AppState, CrucibleRouter};

fn test_state(client: MockClient) -> (AppState, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let state = AppState::new(
        EngineRegistry::new(),
        SandboxController::new(ContainerRegistry::new()).unwrap(),
        Arc::new(client),
        dir.path().to_path_buf(),
        None,
    );
    (state, dir)
}

fn agent_config_json() -> serde_json::Value {
    json!({
        "id": "a1",
        "name": "helper",
        "systemPrompt": "You help."
    })
}

#[test]
fn build_without_endpoints_fails() {
    let (state, _dir) = test_state(MockClient::new());
    assert!(CrucibleRouter::new(state).build().is_err());
}

#[tokio::test]
async fn execute_streams_events_and_persists_config() {
    let client = MockClient::new()
        .push(ClientEvent::Assistant {
            message: AssistantMessage {
                text: Some("hello".to_string()),
                tool_uses: vec![],
            },
            parent_tool_use_id: None,
        })
        .push_success();

    let (state, _dir) = test_state(client);
    let store = state.store.clone();
    let app = CrucibleRouter::new(state)
        .with_api("/api/sessions")
        .build()
        .unwrap();
    let server = TestServer::new(app).unwrap();

    let response = server
        .post("/api/sessions/sess-1/execute")
        .json(&json!({
            "agentConfig": agent_config_json(),
            "prompt": "say hello"
        }))
        .await;

    response.assert_status_ok();
    let body = response.text();
    assert!(body.contains("\"type\":\"started\""));
    assert!(body.contains("\"type\":\"assistant_text\""));
    assert!(body.contains("\"type\":\"completed\""));

    // The config was persisted for later reference-only calls.
    let stored = store.load("sess-1").unwrap().unwrap();
    assert_eq!(stored.prompt, "say hello");
    assert_eq!(stored.agent_config.name, "helper");
}

#[tokio::test]
async fn execute_by_reference_uses_stored_config() {
    let client = MockClient::new().push_success();
    let (state, _dir) = test_state(client.clone());

    // Seed the store as an earlier invocation would have.
    let config = serde_json::from_value(agent_config_json()).unwrap();
    state.store.save("sess-2", &config, "stored prompt").unwrap();

    let app = CrucibleRouter::new(state)
        .with_api("/api/sessions")
        .build()
        .unwrap();
    let server = TestServer::new(app).unwrap();

    let response = server
        .post("/api/sessions/sess-2/execute")
        .json(&json!({}))
        .await;
    response.assert_status_ok();

    let (prompt, _plan) = client.started_with().unwrap();
    assert_eq!(prompt, "stored prompt");
}

#[tokio::test]
async fn execute_without_config_or_store_is_bad_request() {
    let (state, _dir) = test_state(MockClient::new());
    let app = CrucibleRouter::new(state)
        .with_api("/api/sessions")
        .build()
        .unwrap();
    let server = TestServer::new(app).unwrap();

    let response = server
        .post("/api/sessions/fresh/execute")
        .json(&json!({}))
        .await;
    response.assert_status_bad_request();
}

#[tokio::test]
async fn control_endpoints_404_for_unknown_sessions() {
    let (state, _dir) = test_state(MockClient::new());
    let app = CrucibleRouter::new(state)
        .with_api("/api/sessions")
        .build()
        .unwrap();
    let server = TestServer::new(app).unwrap();

    let response = server
        .post("/api/sessions/ghost/interrupt")
        .json(&json!({}))
        .await;
    response.assert_status_not_found();

    let response = server
        .post("/api/sessions/ghost/answer")
        .json(&json!({"requestId": "r1", "answers": {}}))
        .await;
    response.assert_status_not_found();

    let response = server.get("/api/sessions/ghost/status").await;
    response.assert_status_not_found();
}

#[tokio::test]
async fn delete_clears_stored_config() {
    let (state, _dir) = test_state(MockClient::new());
    let config = serde_json::from_value(agent_config_json()).unwrap();
    state.store.save("sess-3", &config, "p").unwrap();
    let store = state.store.clone();

    let app = CrucibleRouter::new(state)
        .with_api("/api/sessions")
        .build()
        .unwrap();
    let server = TestServer::new(app).unwrap();

    let response = server.delete("/api/sessions/sess-3").await;
    response.assert_status_ok();
    assert!(store.load("sess-3").unwrap().is_none());
}
