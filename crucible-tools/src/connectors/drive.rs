//! Google Drive connector tools.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;

use crucible_core::{ToolEntry, ToolOutput};

use super::{parse_input, render_error, urlencode, ConnectorClient, FnTool};
use crate::common::{schema_of, truncate_result};

const PAGE_SIZE_CAP: u32 = 25;

#[derive(Debug, Deserialize, JsonSchema)]
struct DriveListInput {
    /// Max files to return (capped at 25)
    #[serde(default)]
    page_size: Option<u32>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct DriveReadInput {
    /// File id from drive_list or drive_search
    file_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct DriveSearchInput {
    /// Drive query, e.g. `name contains 'report'`
    query: String,
    /// Max files to return (capped at 25)
    #[serde(default)]
    page_size: Option<u32>,
}

pub(crate) fn tools(client: Arc<ConnectorClient>) -> Vec<ToolEntry> {
    let list_client = client.clone();
    let list = ToolEntry {
        name: "drive_list".to_string(),
        description: "List files in Google Drive.".to_string(),
        input_schema: schema_of::<DriveListInput>(),
        handler: Arc::new(FnTool(Arc::new(move |input| {
            let client = list_client.clone();
            Box::pin(async move {
                let input: DriveListInput = match parse_input(input) {
                    Ok(i) => i,
                    Err(out) => return out,
                };
                let size = input.page_size.unwrap_or(PAGE_SIZE_CAP).min(PAGE_SIZE_CAP);
                match client
                    .get_json(&format!("/drive/v3/files?pageSize={size}"))
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
        name: "drive_read".to_string(),
        description: "Download a Drive file's content as text.".to_string(),
        input_schema: schema_of::<DriveReadInput>(),
        handler: Arc::new(FnTool(Arc::new(move |input| {
            let client = read_client.clone();
            Box::pin(async move {
                let input: DriveReadInput = match parse_input(input) {
                    Ok(i) => i,
                    Err(out) => return out,
                };
                let url = format!("/drive/v3/files/{}?alt=media", urlencode(&input.file_id));
                match client.get_text(&url).await {
                    Ok(text) => ToolOutput::text(truncate_result(&text, &client.limits)),
                    Err(e) => render_error(e),
                }
            })
        }))),
    };

    let search_client = client;
    let search = ToolEntry {
        name: "drive_search".to_string(),
        description: "Search Google Drive files by query.".to_string(),
        input_schema: schema_of::<DriveSearchInput>(),
        handler: Arc::new(FnTool(Arc::new(move |input| {
            let client = search_client.clone();
            Box::pin(async move {
                let input: DriveSearchInput = match parse_input(input) {
                    Ok(i) => i,
                    Err(out) => return out,
                };
                let size = input.page_size.unwrap_or(PAGE_SIZE_CAP).min(PAGE_SIZE_CAP);
                let url = format!(
                    "/drive/v3/files?q={}&pageSize={size}",
                    urlencode(&input.query)
                );
                match client.get_json(&url).await {
                    Ok(value) => client.render(&value),
                    Err(e) => render_error(e),
                }
            })
        }))),
    };

    vec![list, read, search]
}
