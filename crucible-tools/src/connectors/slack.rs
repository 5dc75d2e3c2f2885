//! Slack connector tools.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;

use crucible_core::ToolEntry;

use super::{parse_input, render_error, urlencode, ConnectorClient, FnTool};
use crate::common::schema_of;

const PAGE_SIZE_CAP: u32 = 50;

#[derive(Debug, Deserialize, JsonSchema)]
struct SlackListChannelsInput {
    /// Max channels to return (capped at 50)
    #[serde(default)]
    limit: Option<u32>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SlackReadInput {
    /// Channel id, e.g. C0123456
    channel: String,
    /// Max messages to return (capped at 50)
    #[serde(default)]
    limit: Option<u32>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SlackSendInput {
    /// Channel id to post into
    channel: String,
    /// Message text
    text: String,
}

pub(crate) fn tools(client: Arc<ConnectorClient>) -> Vec<ToolEntry> {
    let list_client = client.clone();
    let list = ToolEntry {
        name: "slack_list_channels".to_string(),
        description: "List Slack channels visible to the connection.".to_string(),
        input_schema: schema_of::<SlackListChannelsInput>(),
        handler: Arc::new(FnTool(Arc::new(move |input| {
            let client = list_client.clone();
            Box::pin(async move {
                let input: SlackListChannelsInput = match parse_input(input) {
                    Ok(i) => i,
                    Err(out) => return out,
                };
                let limit = input.limit.unwrap_or(PAGE_SIZE_CAP).min(PAGE_SIZE_CAP);
                match client
                    .get_json(&format!("/conversations.list?limit={limit}"))
                    .await
                {
                    Ok(value) => client.render(&value),
                    Err(e) => render_error(e),
                }
            })
        }))),
    };

    let read_client = client.clone();
    let read = ToolEntry {
        name: "slack_read".to_string(),
        description: "Read recent messages from a Slack channel.".to_string(),
        input_schema: schema_of::<SlackReadInput>(),
        handler: Arc::new(FnTool(Arc::new(move |input| {
            let client = read_client.clone();
            Box::pin(async move {
                let input: SlackReadInput = match parse_input(input) {
                    Ok(i) => i,
                    Err(out) => return out,
                };
                let limit = input.limit.unwrap_or(PAGE_SIZE_CAP).min(PAGE_SIZE_CAP);
                let url = format!(
                    "/conversations.history?channel={}&limit={limit}",
                    urlencode(&input.channel)
                );
                match client.get_json(&url).await {
                    Ok(value) => client.render(&value),
                    Err(e) => render_error(e),
                }
            })
        }))),
    };

    let send_client = client;
    let send = ToolEntry {
        name: "slack_send".to_string(),
        description: "Send a message to a Slack channel.".to_string(),
        input_schema: schema_of::<SlackSendInput>(),
        handler: Arc::new(FnTool(Arc::new(move |input| {
            let client = send_client.clone();
            Box::pin(async move {
                let input: SlackSendInput = match parse_input(input) {
                    Ok(i) => i,
                    Err(out) => return out,
                };
                let body = json!({"channel": input.channel, "text": input.text});
                match client.post_json("/chat.postMessage", &body).await {
                    Ok(value) => client.render(&value),
                    Err(e) => render_error(e),
                }
            })
        }))),
    };

    vec![list, read, send]
}
