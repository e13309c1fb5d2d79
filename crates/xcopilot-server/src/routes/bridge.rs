// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! The bridge endpoints the MCP shim calls.
//!
//! `GET …/tools` serves the conversation's cached catalog (with
//! `input_schema` renamed to `inputSchema`, the key MCP clients expect).
//! `POST …/tool-call` parks until Xcode delivers the matching
//! `tool_result`; the reply is held open through resolve, reject, timeout,
//! or client disconnect.  The `/internal/*` pair serves single-conversation
//! deployments where the shim carries no conversation id.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use xcopilot_bridge::{Conversation, ToolCallError};
use xcopilot_protocol::ToolDefinition;

use crate::state::SharedContext;

#[derive(Debug, Deserialize)]
pub struct ToolCallBody {
    pub name: String,
    /// Present on the wire but not forwarded: Xcode already received the
    /// arguments inside the `tool_use` block it is executing.
    #[serde(default)]
    pub arguments: Option<Value>,
}

// ── Tools ─────────────────────────────────────────────────────────────────────

pub async fn tools(
    State(ctx): State<SharedContext>,
    Path(conversation_id): Path<String>,
) -> Response {
    match ctx.manager.get(&conversation_id) {
        Some(conversation) => Json(tool_list(conversation.state.tools())).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "unknown conversation"),
    }
}

/// Single-conversation fallback: serve the most recent conversation's
/// catalog, or an empty list when none is live.
pub async fn tools_global(State(ctx): State<SharedContext>) -> Response {
    let tools = ctx
        .manager
        .latest()
        .map(|c| c.state.tools())
        .unwrap_or_default();
    Json(tool_list(tools)).into_response()
}

fn tool_list(tools: Vec<ToolDefinition>) -> Value {
    let entries: Vec<Value> = tools
        .into_iter()
        .map(|t| {
            json!({
                "name": t.name,
                "description": t.description.unwrap_or_default(),
                "inputSchema": t.input_schema,
            })
        })
        .collect();
    json!(entries)
}

// ── Tool calls ────────────────────────────────────────────────────────────────

pub async fn tool_call(
    State(ctx): State<SharedContext>,
    Path(conversation_id): Path<String>,
    body: Result<Json<ToolCallBody>, axum::extract::rejection::JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };
    let Some(conversation) = ctx.manager.get(&conversation_id) else {
        return error_response(StatusCode::NOT_FOUND, "unknown conversation");
    };
    debug!(tool = %body.name, has_args = body.arguments.is_some(), "bridge tool-call received");
    park_tool_call(conversation, &body.name).await
}

/// Id-less variant: route by expected-tool lookup across all conversations.
pub async fn tool_call_global(
    State(ctx): State<SharedContext>,
    body: Result<Json<ToolCallBody>, axum::extract::rejection::JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };
    let conversation = ctx.manager.find_by_expected_tool(&body.name).or_else(|| {
        // The shim may have shortened the name; resolve it against the most
        // recent catalog and look again.
        let latest = ctx.manager.latest()?;
        let resolved = latest.state.resolve_tool_name(&body.name);
        ctx.manager.find_by_expected_tool(&resolved)
    });
    match conversation {
        Some(conversation) => park_tool_call(conversation, &body.name).await,
        None => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &ToolCallError::NoExpectedCall(body.name.clone()).to_string(),
        ),
    }
}

/// Register the call and hold the HTTP reply open until it resolves.
async fn park_tool_call(conversation: Arc<Conversation>, name: &str) -> Response {
    let state = &conversation.state;
    let resolved = state.resolve_tool_name(name);
    let receiver = match state.register_mcp_request(&resolved) {
        Ok(receiver) => receiver,
        Err(e) => {
            warn!(conversation = %conversation.id, tool = %resolved, "bridge call rejected: {e}");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
        }
    };

    debug!(conversation = %conversation.id, tool = %resolved, "bridge call parked");
    // Await outside any state lock; resolution, timeout, or session teardown
    // all complete this.
    match receiver.await {
        Ok(Ok(content)) => Json(json!({"content": content})).into_response(),
        Ok(Err(e)) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
        Err(_) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "tool call dropped without resolution",
        ),
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({"error": message}))).into_response()
}
