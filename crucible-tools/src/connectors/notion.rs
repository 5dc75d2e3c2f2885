//! Notion connector tools.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;

use crucible_core::ToolEntry;

use super::{parse_input, render_error, urlencode, ConnectorClient, FnTool};
use crate::common::schema_of;

const PAGE_SIZE_CAP: u32 = 25;

#[derive(Debug, Deserialize, JsonSchema)]
struct NotionSearchInput {
    /// Search query across pages and databases
    query: String,
    /// Max results (capped at 25)
    #[serde(default)]
    page_size: Option<u32>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct NotionReadPageInput {
    /// Page id from notion_search
    page_id: String,
}

pub(crate) fn tools(client: Arc<ConnectorClient>) -> Vec<ToolEntry> {
    let search_client = client.clone();
    let search = ToolEntry {
        name: "notion_search".to_string(),
        description: "Search Notion pages and databases.".to_string(),
        input_schema: schema_of::<NotionSearchInput>(),
        handler: Arc::new(FnTool(Arc::new(move |input| {
            let client = search_client.clone();
            Box::pin(async move {
                let input: NotionSearchInput = match parse_input(input) {
                    Ok(i) => i,
                    Err(out) => return out,
                };
                let size = input.page_size.unwrap_or(PAGE_SIZE_CAP).min(PAGE_SIZE_CAP);
                let body = json!({"query": input.query, "page_size": size});
                match client.post_json("/v1/search", &body).await {
                    Ok(value) => client.render(&value),
                    Err(e) => render_error(e),
                }
            })
        }))),
    };

    let read_client = client;
    let read = ToolEntry {
        name: "notion_read_page".to_string(),
        description: "Read a Notion page's properties by id.".to_string(),
        input_schema: schema_of::<NotionReadPageInput>(),
        handler: Arc::new(FnTool(Arc::new(move |input| {
            let client = read_client.clone();
            Box::pin(async move {
                let input: NotionReadPageInput = match parse_input(input) {
                    Ok(i) => i,
                    Err(out) => return out,
                };
                let url = format!("/v1/pages/{}", urlencode(&input.page_id));
                match client.get_json(&url).await {
                    Ok(value) => client.render(&value),
                    Err(e) => render_error(e),
                }
            })
        }))),
    };

    vec![search, read]
}
