// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Server-Sent Events frames for the Anthropic streaming response format.
//!
//! The vocabulary mirrors what the upstream API emits: `message_start`, then
//! per content block `content_block_start` / `content_block_delta` /
//! `content_block_stop`, then `message_delta` (carrying `stop_reason` and
//! usage) and `message_stop`.  Deltas come in two flavours: `text_delta` for
//! prose and `input_json_delta` for tool-call arguments.

use serde::Serialize;
use serde_json::{json, Value};

/// Token usage reported in `message_delta`.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// One SSE frame: an event name plus a JSON payload.
///
/// Frames are written verbatim as `event: <name>\ndata: <json>\n\n`.
#[derive(Debug, Clone, PartialEq)]
pub struct SseFrame {
    pub event: &'static str,
    pub data: Value,
}

impl SseFrame {
    /// Serialize to the wire representation, including the trailing blank line.
    pub fn to_wire(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.event, self.data)
    }

    pub fn message_start(message_id: &str, model: &str) -> Self {
        Self {
            event: "message_start",
            data: json!({
                "type": "message_start",
                "message": {
                    "id": message_id,
                    "type": "message",
                    "role": "assistant",
                    "model": model,
                    "content": [],
                    "stop_reason": null,
                    "stop_sequence": null,
                    "usage": {"input_tokens": 0, "output_tokens": 0},
                },
            }),
        }
    }

    pub fn content_block_start_text(index: usize) -> Self {
        Self {
            event: "content_block_start",
            data: json!({
                "type": "content_block_start",
                "index": index,
                "content_block": {"type": "text", "text": ""},
            }),
        }
    }

    pub fn content_block_start_tool_use(index: usize, id: &str, name: &str) -> Self {
        Self {
            event: "content_block_start",
            data: json!({
                "type": "content_block_start",
                "index": index,
                "content_block": {"type": "tool_use", "id": id, "name": name, "input": {}},
            }),
        }
    }

    pub fn text_delta(index: usize, text: &str) -> Self {
        Self {
            event: "content_block_delta",
            data: json!({
                "type": "content_block_delta",
                "index": index,
                "delta": {"type": "text_delta", "text": text},
            }),
        }
    }

    pub fn input_json_delta(index: usize, partial_json: &str) -> Self {
        Self {
            event: "content_block_delta",
            data: json!({
                "type": "content_block_delta",
                "index": index,
                "delta": {"type": "input_json_delta", "partial_json": partial_json},
            }),
        }
    }

    pub fn content_block_stop(index: usize) -> Self {
        Self {
            event: "content_block_stop",
            data: json!({"type": "content_block_stop", "index": index}),
        }
    }

    pub fn message_delta(stop_reason: &str, usage: Usage) -> Self {
        Self {
            event: "message_delta",
            data: json!({
                "type": "message_delta",
                "delta": {"stop_reason": stop_reason, "stop_sequence": null},
                "usage": {"input_tokens": usage.input_tokens, "output_tokens": usage.output_tokens},
            }),
        }
    }

    pub fn message_stop() -> Self {
        Self {
            event: "message_stop",
            data: json!({"type": "message_stop"}),
        }
    }

    /// Anthropic-format error frame (session failures surface as these).
    pub fn error(message: &str) -> Self {
        Self {
            event: "error",
            data: json!({
                "type": "error",
                "error": {"type": "api_error", "message": message},
            }),
        }
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
