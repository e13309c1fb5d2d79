// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! `POST /v1/messages` — the conversation router.
//!
//! Every request is either the start of a conversation or Xcode delivering
//! tool results for one that is parked on the bridge.  The decision is the
//! manager's `find_by_continuation`; everything here is the wiring around it.
//!
//! Two simultaneous new requests must create two independent conversations;
//! nothing in this path shares mutable state except the manager registry,
//! which is append-only for new sessions.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use xcopilot_bridge::Conversation;
use xcopilot_protocol::{
    ContentBlock, ErrorEnvelope, MessageContent, MessagesRequest, SseFrame,
};
use xcopilot_session::{build_session_config, lookup_model, SessionParams};

use crate::redact::format_prompt;
use crate::reply::{sse_response, ReplyGuard};
use crate::state::SharedContext;
use crate::stream::spawn_streaming_transform;

pub async fn handle(State(ctx): State<SharedContext>, body: String) -> Response {
    let request: MessagesRequest = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(e) => {
            return invalid_request(format!("malformed request body: {e}"));
        }
    };

    match ctx.manager.find_by_continuation(&request.messages) {
        Some(conversation) => continuation(ctx, conversation, request).await,
        None => new_session(ctx, request).await,
    }
}

// ── Continuation path ─────────────────────────────────────────────────────────

async fn continuation(
    ctx: SharedContext,
    conversation: Arc<Conversation>,
    request: MessagesRequest,
) -> Response {
    info!(conversation = %conversation.id, "continuation request");

    let (tx, rx) = mpsc::unbounded_channel();
    let generation = conversation.state.set_reply(tx);
    conversation
        .state
        .send_frame(SseFrame::message_start(&message_id(), &request.model));

    // Deliver every tool result to its parked bridge call.
    let mut delivered = 0usize;
    if let Some(last) = request.messages.last() {
        if let MessageContent::Blocks(blocks) = &last.content {
            for block in blocks {
                if let ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    ..
                } = block
                {
                    let value = content
                        .as_ref()
                        .map(|c| c.to_value())
                        .unwrap_or(serde_json::Value::Null);
                    if conversation.state.resolve_tool_call(tool_use_id, value) {
                        delivered += 1;
                    } else {
                        warn!(
                            conversation = %conversation.id,
                            tool_use_id = %tool_use_id,
                            "tool result for unknown call id dropped"
                        );
                    }
                }
            }
        }
    }

    if delivered == 0 {
        // Matched through the active-session fallback: Xcode re-sent the
        // conversation (internal retry or a fresh user turn on a live
        // session).  Forward only the unseen tail as a new prompt.
        let sent = conversation.sent_message_count();
        let start = if request.messages.len() < sent { 0 } else { sent };
        let prompt = format_prompt(&request.messages[start..], &ctx.redactor);
        if !prompt.trim().is_empty() {
            let forwarded = conversation
                .control()
                .map(|control| control.send_input(prompt.as_str()))
                .unwrap_or(false);
            if forwarded {
                debug!(conversation = %conversation.id, "forwarded retry prompt to live session");
            } else {
                warn!(conversation = %conversation.id, "live session rejected retry prompt");
            }
        }
    }
    conversation.set_sent_message_count(request.messages.len());

    sse_response(rx, ReplyGuard::new(conversation, generation))
}

// ── New-session path ──────────────────────────────────────────────────────────

async fn new_session(ctx: SharedContext, request: MessagesRequest) -> Response {
    let Some(model) = lookup_model(&request.model) else {
        return invalid_request(format!("unknown model: {}", request.model));
    };

    let conversation = ctx.manager.create();
    let tools = request.tools.clone().unwrap_or_default();
    let has_tool_bridge = !tools.is_empty();
    conversation.state.cache_tools(tools);

    let session_config = build_session_config(SessionParams {
        model: model.id,
        system_message: request.system.as_ref().map(|s| s.as_text()),
        config: &ctx.config,
        supports_reasoning_effort: model.supports_reasoning_effort,
        working_directory: None,
        has_tool_bridge,
        port: ctx.port,
        conversation_id: &conversation.id,
    });
    let prompt = format_prompt(&request.messages, &ctx.redactor);

    info!(
        conversation = %conversation.id,
        model = model.id,
        tool_bridge = has_tool_bridge,
        "opening session"
    );
    let handle = match ctx.provider.open(session_config, prompt).await {
        Ok(handle) => handle,
        Err(e) => {
            warn!(conversation = %conversation.id, "session open failed: {e}");
            ctx.manager.remove(&conversation.id);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorEnvelope::api_error(e.to_string())),
            )
                .into_response();
        }
    };
    conversation.set_control(handle.control);
    conversation.set_sent_message_count(request.messages.len());

    let (tx, rx) = mpsc::unbounded_channel();
    let generation = conversation.state.set_reply(tx);
    spawn_streaming_transform(
        Arc::clone(&conversation),
        handle.events,
        model.id.to_string(),
    );

    sse_response(rx, ReplyGuard::new(conversation, generation))
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn invalid_request(message: String) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorEnvelope::invalid_request(message)),
    )
        .into_response()
}

fn message_id() -> String {
    format!("msg_{}", Uuid::new_v4().simple())
}
