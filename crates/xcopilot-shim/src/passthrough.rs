// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! [`PassthroughShim`] — the rmcp [`ServerHandler`] that impersonates a tool
//! server while the real tools live in Xcode.
//!
//! rmcp owns the MCP lifecycle (`initialize`, `notifications/initialized`,
//! protocol version 2024-11-05, `-32601` for unknown methods); this handler
//! only implements `tools/list` and `tools/call`, both as HTTP forwards to
//! the bridge.  A forwarding failure surfaces as an internal (`-32603`)
//! error and the session library decides whether to retry.

use std::sync::Arc;

use rmcp::{
    handler::server::ServerHandler,
    model::{
        CallToolRequestParams, CallToolResult, Content, JsonObject, ListToolsResult,
        PaginatedRequestParams, ServerCapabilities, ServerInfo, Tool as McpTool,
    },
    service::{RequestContext, RoleServer},
    ErrorData as McpError,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// One tool as the bridge's tools endpoint serves it.
#[derive(Debug, Clone, Deserialize)]
struct BridgeTool {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(rename = "inputSchema", default)]
    input_schema: Value,
}

#[derive(Debug, Clone, Deserialize)]
struct BridgeCallReply {
    #[serde(default)]
    content: Value,
    #[serde(default)]
    error: Option<String>,
}

/// Stateless MCP server that forwards everything to the bridge.
#[derive(Clone)]
pub struct PassthroughShim {
    bridge_url: String,
    client: reqwest::Client,
}

impl PassthroughShim {
    /// `bridge_url` is the route prefix, e.g.
    /// `http://127.0.0.1:8123/mcp/<conversation>` or `…/internal`.
    pub fn new(bridge_url: impl Into<String>) -> Self {
        Self {
            bridge_url: bridge_url.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Build from the environment the session library launches shims with:
    /// `MCP_SERVER_PORT` (required) and `MCP_CONVERSATION_ID` (optional).
    pub fn from_env() -> anyhow::Result<Self> {
        let port: u16 = std::env::var("MCP_SERVER_PORT")
            .map_err(|_| anyhow::anyhow!("MCP_SERVER_PORT is not set"))?
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid MCP_SERVER_PORT: {e}"))?;
        let url = match std::env::var("MCP_CONVERSATION_ID") {
            Ok(conversation) => format!("http://127.0.0.1:{port}/mcp/{conversation}"),
            Err(_) => format!("http://127.0.0.1:{port}/internal"),
        };
        Ok(Self::new(url))
    }

    async fn fetch_tools(&self) -> Result<Vec<BridgeTool>, McpError> {
        let url = format!("{}/tools", self.bridge_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| McpError::internal_error(format!("bridge unreachable: {e}"), None))?;
        response
            .json()
            .await
            .map_err(|e| McpError::internal_error(format!("bad bridge tools reply: {e}"), None))
    }
}

impl ServerHandler for PassthroughShim {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..ServerInfo::default()
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        async move {
            let tools = self
                .fetch_tools()
                .await?
                .into_iter()
                .map(bridge_tool_to_mcp)
                .collect();
            Ok(ListToolsResult {
                tools,
                next_cursor: None,
                meta: None,
            })
        }
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let arguments = request
            .arguments
            .map(|m| Value::Object(m.into_iter().collect()))
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
        let url = format!("{}/tool-call", self.bridge_url);
        debug!(tool = %request.name, "forwarding tool call to bridge");

        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({"name": request.name, "arguments": arguments}))
            .send()
            .await
            .map_err(|e| McpError::internal_error(format!("bridge unreachable: {e}"), None))?;

        let status = response.status();
        let reply: BridgeCallReply = response
            .json()
            .await
            .map_err(|e| McpError::internal_error(format!("bad bridge reply: {e}"), None))?;

        if let Some(error) = reply.error {
            return Err(McpError::internal_error(error, None));
        }
        if !status.is_success() {
            return Err(McpError::internal_error(
                format!("bridge returned {status}"),
                None,
            ));
        }

        let text = match reply.content {
            Value::String(s) => s,
            other => other.to_string(),
        };
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }
}

/// Convert a bridge tool descriptor into an rmcp [`McpTool`].
fn bridge_tool_to_mcp(tool: BridgeTool) -> McpTool {
    McpTool::new(
        std::borrow::Cow::Owned(tool.name),
        std::borrow::Cow::Owned(tool.description),
        Arc::new(value_to_object(tool.input_schema)),
    )
}

/// MCP requires the schema to be a JSON object; wrap anything else in a
/// minimal `{"type":"object"}` envelope.
fn value_to_object(v: Value) -> JsonObject {
    use serde_json::Map;
    match v {
        Value::Object(m) => m,
        other => {
            let mut m = Map::new();
            m.insert("type".to_string(), Value::String("object".to_string()));
            if !other.is_null() {
                m.insert("value".to_string(), other);
            }
            m
        }
    }
}

/// Serve the shim on stdin/stdout until the session library disconnects.
pub async fn serve_stdio(shim: PassthroughShim) -> anyhow::Result<()> {
    use rmcp::ServiceExt;
    let running = shim
        .serve((tokio::io::stdin(), tokio::io::stdout()))
        .await
        .map_err(|e| anyhow::anyhow!("MCP shim init error: {e}"))?;
    running
        .waiting()
        .await
        .map_err(|e| anyhow::anyhow!("MCP shim error: {e}"))?;
    Ok(())
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
