//! Application state for the crucible server.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crucible_core::{ProtocolClient, SessionConfigStore};
use crucible_runtime::EngineRegistry;
use crucible_sandbox::SandboxController;
use crucible_tools::AccessTokenProvider;

/// Shared application state, cloned into each request handler.
///
/// The registry and controller are the two process-wide services; the
/// store lets short-lived handlers reconstitute a session's configuration
/// without carrying it in every request.
#[derive(Clone)]
pub struct AppState {
    pub registry: EngineRegistry,
    pub controller: SandboxController,
    pub store: Arc<SessionConfigStore>,
    pub client: Arc<dyn ProtocolClient>,
    /// Host working directory; scratch directories live under it.
    pub cwd: PathBuf,
    /// Host home directory for the read-only cache mount.
    pub home: Option<PathBuf>,
    pub token_providers: HashMap<String, Arc<dyn AccessTokenProvider>>,
}

impl AppState {
    pub fn new(
        registry: EngineRegistry,
        controller: SandboxController,
        client: Arc<dyn ProtocolClient>,
        cwd: PathBuf,
        home: Option<PathBuf>,
    ) -> Self {
        let store = Arc::new(SessionConfigStore::new(&cwd));
        Self {
            registry,
            controller,
            store,
            client,
            cwd,
            home,
            token_providers: HashMap::new(),
        }
    }

    pub fn with_token_providers(
        mut self,
        providers: HashMap<String, Arc<dyn AccessTokenProvider>>,
    ) -> Self {
        self.token_providers = providers;
        self
    }
}
