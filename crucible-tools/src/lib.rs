//! Tool servers for the crucible agent runtime.
//!
//! Two families:
//!
//! - **Sandbox tools** (`Read`, `Write`, `Bash`, `Find`, `Grep`): every
//!   call runs through path/command validation and then the session's
//!   container. Built per session via [`build_sandbox_server`].
//! - **Connector tools** (Gmail, Drive, Slack, Notion, GitHub): bearer-
//!   token HTTPS calls with capped page sizes, built per session via
//!   [`build_connector_server`] from the agent's connected connections.
//!
//! Both families share the same guardrails: results truncate at the
//! session's `max_result_size` and failures carry remediation hints when
//! hints are enabled.

mod common;
pub mod connectors;
pub mod sandbox;

pub use connectors::{
    build_connector_server, provider_tool_names, AccessTokenProvider, ConnectorConnection,
    ConnectorError, StaticTokenProvider, CONNECTORS_SERVER_NAME,
};
pub use sandbox::{
    build_sandbox_server, BashTool, FindTool, GrepTool, ReadTool, WriteTool, SANDBOX_SERVER_NAME,
    SANDBOX_TOOL_NAMES,
};
