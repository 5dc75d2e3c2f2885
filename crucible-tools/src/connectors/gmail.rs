//! Gmail connector tools.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;

use crucible_core::ToolEntry;

use super::{parse_input, render_error, urlencode, ConnectorClient, FnTool};
use crate::common::schema_of;

/// Messages fetched per list call, regardless of what the model asks for.
const PAGE_SIZE_CAP: u32 = 25;

#[derive(Debug, Deserialize, JsonSchema)]
struct GmailListInput {
    /// Gmail search query, e.g. `from:alice is:unread`
    #[serde(default)]
    query: Option<String>,
    /// Max messages to return (capped at 25)
    #[serde(default)]
    max_results: Option<u32>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct GmailReadInput {
    /// Message id from gmail_list
    message_id: String,
}

pub(crate) fn tools(client: Arc<ConnectorClient>) -> Vec<ToolEntry> {
    let list_client = client.clone();
    let list = ToolEntry {
        name: "gmail_list".to_string(),
        description: "List Gmail messages, optionally filtered by a search query.".to_string(),
        input_schema: schema_of::<GmailListInput>(),
        handler: Arc::new(FnTool(Arc::new(move |input| {
            let client = list_client.clone();
            Box::pin(async move {
                let input: GmailListInput = match parse_input(input) {
                    Ok(i) => i,
                    Err(out) => return out,
                };
                let max = input.max_results.unwrap_or(PAGE_SIZE_CAP).min(PAGE_SIZE_CAP);
                let mut url = format!("/gmail/v1/users/me/messages?maxResults={max}");
                if let Some(query) = &input.query {
                    url.push_str(&format!("&q={}", urlencode(query)));
                }
                match client.get_json(&url).await {
                    Ok(value) => client.render(&value),
                    Err(e) => render_error(e),
                }
            })
        }))),
    };

    let read_client = client;
    let read = ToolEntry {
        name: "gmail_read".to_string(),
        description: "Read a single Gmail message by id.".to_string(),
        input_schema: schema_of::<GmailReadInput>(),
        handler: Arc::new(FnTool(Arc::new(move |input| {
            let client = read_client.clone();
            Box::pin(async move {
                let input: GmailReadInput = match parse_input(input) {
                    Ok(i) => i,
                    Err(out) => return out,
                };
                let url = format!(
                    "/gmail/v1/users/me/messages/{}?format=full",
                    urlencode(&input.message_id)
                );
                match client.get_json(&url).await {
                    Ok(value) => client.render(&value),
                    Err(e) => render_error(e),
                }
            })
        }))),
    };

    vec![list, read]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urlencode() {
        assert_eq!(urlencode("from:alice is:unread"), "from%3Aalice%20is%3Aunread");
        assert_eq!(urlencode("plain-id_123"), "plain-id_123");
    }

    #[test]
    fn test_tool_names() {
        use super::super::StaticTokenProvider;
        use crucible_core::{ConnectorProvider, ResourceLimits};

        let connection = super::super::ConnectorConnection {
            connection_id: "c".to_string(),
            provider: ConnectorProvider::Gmail,
            tokens: std::sync::Arc::new(StaticTokenProvider("t".to_string())),
            base_url: None,
        };
        let client = Arc::new(ConnectorClient::new(&connection, ResourceLimits::default()));
        let entries = tools(client);
        let names: Vec<&str> = entries.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["gmail_list", "gmail_read"]);
    }
}
