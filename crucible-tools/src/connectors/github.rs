//! GitHub connector tools.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;

use crucible_core::ToolEntry;

use super::{parse_input, render_error, urlencode, ConnectorClient, FnTool};
use crate::common::schema_of;

const PAGE_SIZE_CAP: u32 = 30;

#[derive(Debug, Deserialize, JsonSchema)]
struct GithubListReposInput {
    /// Max repositories to return (capped at 30)
    #[serde(default)]
    per_page: Option<u32>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct GithubGetRepoInput {
    /// Repository owner login
    owner: String,
    /// Repository name
    repo: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct GithubListIssuesInput {
    /// Repository owner login
    owner: String,
    /// Repository name
    repo: String,
    /// Max issues to return (capped at 30)
    #[serde(default)]
    per_page: Option<u32>,
}

pub(crate) fn tools(client: Arc<ConnectorClient>) -> Vec<ToolEntry> {
    let list_client = client.clone();
    let list = ToolEntry {
        name: "github_list_repos".to_string(),
        description: "List repositories for the authenticated user.".to_string(),
        input_schema: schema_of::<GithubListReposInput>(),
        handler: Arc::new(FnTool(Arc::new(move |input| {
            let client = list_client.clone();
            Box::pin(async move {
                let input: GithubListReposInput = match parse_input(input) {
                    Ok(i) => i,
                    Err(out) => return out,
                };
                let per_page = input.per_page.unwrap_or(PAGE_SIZE_CAP).min(PAGE_SIZE_CAP);
                match client
                    .get_json(&format!("/user/repos?per_page={per_page}"))
                    .await
                {
                    Ok(value) => client.render(&value),
                    Err(e) => render_error(e),
                }
            })
        }))),
    };

    let get_client = client.clone();
    let get = ToolEntry {
        name: "github_get_repo".to_string(),
        description: "Fetch a repository's metadata.".to_string(),
        input_schema: schema_of::<GithubGetRepoInput>(),
        handler: Arc::new(FnTool(Arc::new(move |input| {
            let client = get_client.clone();
            Box::pin(async move {
                let input: GithubGetRepoInput = match parse_input(input) {
                    Ok(i) => i,
                    Err(out) => return out,
                };
                let url = format!(
                    "/repos/{}/{}",
                    urlencode(&input.owner),
                    urlencode(&input.repo)
                );
                match client.get_json(&url).await {
                    Ok(value) => client.render(&value),
                    Err(e) => render_error(e),
                }
            })
        }))),
    };

    let issues_client = client;
    let issues = ToolEntry {
        name: "github_list_issues".to_string(),
        description: "List open issues for a repository.".to_string(),
        input_schema: schema_of::<GithubListIssuesInput>(),
        handler: Arc::new(FnTool(Arc::new(move |input| {
            let client = issues_client.clone();
            Box::pin(async move {
                let input: GithubListIssuesInput = match parse_input(input) {
                    Ok(i) => i,
                    Err(out) => return out,
                };
                let per_page = input.per_page.unwrap_or(PAGE_SIZE_CAP).min(PAGE_SIZE_CAP);
                let url = format!(
                    "/repos/{}/{}/issues?per_page={per_page}",
                    urlencode(&input.owner),
                    urlencode(&input.repo)
                );
                match client.get_json(&url).await {
                    Ok(value) => client.render(&value),
                    Err(e) => render_error(e),
                }
            })
        }))),
    };

    vec![list, get, issues]
}
