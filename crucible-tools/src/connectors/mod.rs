//! OAuth-backed connector tools.
//!
//! Each connected provider contributes a handful of read-mostly tools
//! (plus `slack_send`), all speaking HTTPS with a bearer token fetched
//! through an opaque [`AccessTokenProvider`]. Token acquisition and
//! refresh live elsewhere; this layer only ever sees short-lived access
//! tokens. Page sizes are capped per provider and responses are truncated
//! symmetrically with the sandbox tools.

mod drive;
mod github;
mod gmail;
mod notion;
mod slack;

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;

use crucible_core::{ConnectorProvider, ResourceLimits, ToolHandler, ToolOutput, ToolServer};

/// Namespace for connector tools (`connectors:gmail_list`, ...).
pub const CONNECTORS_SERVER_NAME: &str = "connectors";

/// Errors from connector plumbing.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("token error: {0}")]
    Token(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("api error ({status}): {body}")]
    Api { status: u16, body: String },
}

/// Supplies a current access token for one connection. Implementations
/// wrap whatever refresh machinery the OAuth layer provides.
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String, ConnectorError>;
}

/// A fixed token, for tests and pre-refreshed flows.
pub struct StaticTokenProvider(pub String);

#[async_trait]
impl AccessTokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<String, ConnectorError> {
        Ok(self.0.clone())
    }
}

/// One live connector connection.
pub struct ConnectorConnection {
    pub connection_id: String,
    pub provider: ConnectorProvider,
    pub tokens: Arc<dyn AccessTokenProvider>,
    /// Endpoint override, used by tests; `None` uses the provider's
    /// public API host.
    pub base_url: Option<String>,
}

/// Shared HTTP plumbing for one connection.
pub(crate) struct ConnectorClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn AccessTokenProvider>,
    pub(crate) limits: ResourceLimits,
}

impl ConnectorClient {
    fn new(connection: &ConnectorConnection, limits: ResourceLimits) -> Self {
        let base_url = connection
            .base_url
            .clone()
            .unwrap_or_else(|| default_base_url(connection.provider).to_string());
        Self {
            http: reqwest::Client::new(),
            base_url,
            tokens: connection.tokens.clone(),
            limits,
        }
    }

    pub(crate) async fn get_json(&self, path_and_query: &str) -> Result<Value, ConnectorError> {
        let token = self.tokens.access_token().await?;
        let response = self
            .http
            .get(format!("{}{}", self.base_url, path_and_query))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ConnectorError::Http(e.to_string()))?;
        Self::into_json(response).await
    }

    pub(crate) async fn post_json(
        &self,
        path: &str,
        body: &Value,
    ) -> Result<Value, ConnectorError> {
        let token = self.tokens.access_token().await?;
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|e| ConnectorError::Http(e.to_string()))?;
        Self::into_json(response).await
    }

    pub(crate) async fn get_text(&self, path_and_query: &str) -> Result<String, ConnectorError> {
        let token = self.tokens.access_token().await?;
        let response = self
            .http
            .get(format!("{}{}", self.base_url, path_and_query))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ConnectorError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ConnectorError::Api {
                status: status.as_u16(),
                body,
            });
        }
        response
            .text()
            .await
            .map_err(|e| ConnectorError::Http(e.to_string()))
    }

    async fn into_json(response: reqwest::Response) -> Result<Value, ConnectorError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ConnectorError::Api {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json()
            .await
            .map_err(|e| ConnectorError::Http(e.to_string()))
    }

    /// Render an API response as a truncated tool result.
    pub(crate) fn render(&self, value: &Value) -> ToolOutput {
        let text = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
        ToolOutput::text(crate::common::truncate_result(&text, &self.limits))
    }
}

fn default_base_url(provider: ConnectorProvider) -> &'static str {
    match provider {
        ConnectorProvider::Gmail => "https://gmail.googleapis.com",
        ConnectorProvider::Drive => "https://www.googleapis.com",
        ConnectorProvider::Slack => "https://slack.com/api",
        ConnectorProvider::Notion => "https://api.notion.com",
        ConnectorProvider::Github => "https://api.github.com",
    }
}

/// Closure-backed tool handler; connector tools are thin request wrappers
/// and do not warrant one struct each.
pub(crate) struct FnTool(
    pub(crate) Arc<dyn Fn(Value) -> BoxFuture<'static, ToolOutput> + Send + Sync>,
);

#[async_trait]
impl ToolHandler for FnTool {
    async fn call(&self, input: Value) -> ToolOutput {
        (self.0)(input).await
    }
}

/// Build the single `connectors` tool server covering every supplied
/// connection.
pub fn build_connector_server(
    connections: &[ConnectorConnection],
    limits: ResourceLimits,
) -> ToolServer {
    let mut server = ToolServer::new(CONNECTORS_SERVER_NAME);
    for connection in connections {
        let client = Arc::new(ConnectorClient::new(connection, limits));
        let tools = match connection.provider {
            ConnectorProvider::Gmail => gmail::tools(client),
            ConnectorProvider::Drive => drive::tools(client),
            ConnectorProvider::Slack => slack::tools(client),
            ConnectorProvider::Notion => notion::tools(client),
            ConnectorProvider::Github => github::tools(client),
        };
        for tool in tools {
            server = server.with_tool(tool);
        }
    }
    server
}

/// The tool names a provider contributes.
pub fn provider_tool_names(provider: ConnectorProvider) -> &'static [&'static str] {
    match provider {
        ConnectorProvider::Gmail => &["gmail_list", "gmail_read"],
        ConnectorProvider::Drive => &["drive_list", "drive_read", "drive_search"],
        ConnectorProvider::Slack => &["slack_list_channels", "slack_read", "slack_send"],
        ConnectorProvider::Notion => &["notion_search", "notion_read_page"],
        ConnectorProvider::Github => &["github_list_repos", "github_get_repo", "github_list_issues"],
    }
}

pub(crate) fn parse_input<T: serde::de::DeserializeOwned>(input: Value) -> Result<T, ToolOutput> {
    serde_json::from_value(input).map_err(|e| ToolOutput::error(format!("Invalid input: {e}")))
}

/// Percent-encode a path or query component.
pub(crate) fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

pub(crate) fn render_error(err: ConnectorError) -> ToolOutput {
    ToolOutput::error(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection(provider: ConnectorProvider) -> ConnectorConnection {
        ConnectorConnection {
            connection_id: "conn-1".to_string(),
            provider,
            tokens: Arc::new(StaticTokenProvider("tok".to_string())),
            base_url: None,
        }
    }

    #[test]
    fn test_server_contains_all_provider_tools() {
        let connections = vec![
            connection(ConnectorProvider::Gmail),
            connection(ConnectorProvider::Slack),
        ];
        let server = build_connector_server(&connections, ResourceLimits::default());
        let names: Vec<&str> = server.tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["gmail_list", "gmail_read", "slack_list_channels", "slack_read", "slack_send"]
        );
    }

    #[test]
    fn test_empty_connections_empty_server() {
        let server = build_connector_server(&[], ResourceLimits::default());
        assert!(server.tools.is_empty());
        assert_eq!(server.name, CONNECTORS_SERVER_NAME);
    }

    #[test]
    fn test_every_provider_has_names() {
        for provider in [
            ConnectorProvider::Gmail,
            ConnectorProvider::Drive,
            ConnectorProvider::Slack,
            ConnectorProvider::Notion,
            ConnectorProvider::Github,
        ] {
            assert!(!provider_tool_names(provider).is_empty());
        }
    }
}
