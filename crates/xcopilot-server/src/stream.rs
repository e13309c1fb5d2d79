// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! The streaming transform: session events in, Anthropic SSE frames out.
//!
//! One transform task runs for the whole life of a session, writing to
//! whichever reply is currently attached to the conversation.  A turn that
//! ends with outstanding tool calls ([`SessionEvent::TurnPaused`]) closes
//! the current HTTP response with `stop_reason: "tool_use"`; the session
//! stays open and the next frames land on the reply the continuation
//! request attaches.
//!
//! Ordering rule: for every tool call, `register_expected(id, name)` runs
//! strictly before any frame advertising that id is written.  The
//! continuation router matches on those ids, so Xcode must never see an id
//! the bridge does not yet know.

use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, error, warn};
use uuid::Uuid;

use xcopilot_bridge::Conversation;
use xcopilot_protocol::{SseFrame, Usage};
use xcopilot_session::{SessionEvent, SessionStream};

/// Spawn the transform task for a freshly-opened session.
pub fn spawn_streaming_transform(
    conversation: Arc<Conversation>,
    events: SessionStream,
    model: String,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run(conversation, events, model))
}

/// Per-message content block bookkeeping.  Indices restart at zero for each
/// SSE message (i.e. after every turn boundary).
#[derive(Default)]
struct Blocks {
    next_index: usize,
    open_text: Option<usize>,
}

impl Blocks {
    fn allocate(&mut self) -> usize {
        let index = self.next_index;
        self.next_index += 1;
        index
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

async fn run(conversation: Arc<Conversation>, mut events: SessionStream, model: String) {
    let state = &conversation.state;
    state.mark_session_active();
    state.send_frame(SseFrame::message_start(&message_id(), &model));

    let mut blocks = Blocks::default();
    let mut usage = Usage::default();

    while let Some(event) = events.next().await {
        match event {
            Ok(SessionEvent::TextDelta(text)) => {
                if text.is_empty() {
                    continue;
                }
                let index = match blocks.open_text {
                    Some(index) => index,
                    None => {
                        let index = blocks.allocate();
                        blocks.open_text = Some(index);
                        state.send_frame(SseFrame::content_block_start_text(index));
                        index
                    }
                };
                state.send_frame(SseFrame::text_delta(index, &text));
            }
            Ok(SessionEvent::ToolUse { id, name, input }) => {
                close_open_text(state, &mut blocks);
                let resolved = state.resolve_tool_name(&name);
                let input = state.normalize_args(&resolved, input);
                // Must complete before the block is visible to Xcode, or the
                // next request could race the continuation lookup.
                state.register_expected(&id, &resolved);
                let index = blocks.allocate();
                state.send_frame(SseFrame::content_block_start_tool_use(index, &id, &resolved));
                let payload = serde_json::to_string(&input).unwrap_or_else(|_| "{}".to_string());
                state.send_frame(SseFrame::input_json_delta(index, &payload));
                state.send_frame(SseFrame::content_block_stop(index));
                debug!(conversation = %conversation.id, tool = %resolved, call = %id, "tool_use emitted");
            }
            Ok(SessionEvent::TurnPaused) => {
                close_open_text(state, &mut blocks);
                state.send_frame(SseFrame::message_delta("tool_use", usage));
                state.send_frame(SseFrame::message_stop());
                state.clear_reply();
                state.notify_streaming_done();
                blocks.reset();
                usage = Usage::default();
            }
            Ok(SessionEvent::Usage {
                input_tokens,
                output_tokens,
            }) => {
                usage.input_tokens = usage.input_tokens.saturating_add(input_tokens);
                usage.output_tokens = usage.output_tokens.saturating_add(output_tokens);
            }
            Ok(SessionEvent::Idle) => {
                close_open_text(state, &mut blocks);
                state.send_frame(SseFrame::message_delta("end_turn", usage));
                state.send_frame(SseFrame::message_stop());
                finish(&conversation);
                return;
            }
            Ok(SessionEvent::Error(message)) => {
                error!(conversation = %conversation.id, "session error: {message}");
                state.set_had_error();
                state.send_frame(SseFrame::error(&message));
                finish(&conversation);
                return;
            }
            Err(e) => {
                error!(conversation = %conversation.id, "session stream error: {e}");
                state.set_had_error();
                state.send_frame(SseFrame::error(&e.to_string()));
                finish(&conversation);
                return;
            }
        }
    }

    // Stream ended without a terminal event: treat like an idle session,
    // but don't pretend the turn completed.
    warn!(conversation = %conversation.id, "session stream ended without idle");
    finish(&conversation);
}

/// Terminal path shared by idle, error, and truncated streams: inactivate
/// (rejecting stale expected/pending), release any waiter, detach the reply.
fn finish(conversation: &Arc<Conversation>) {
    let state = &conversation.state;
    state.mark_session_inactive();
    state.notify_streaming_done();
    state.clear_reply();
}

fn close_open_text(state: &xcopilot_bridge::ConversationState, blocks: &mut Blocks) {
    if let Some(index) = blocks.open_text.take() {
        state.send_frame(SseFrame::content_block_stop(index));
    }
}

fn message_id() -> String {
    format!("msg_{}", Uuid::new_v4().simple())
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
