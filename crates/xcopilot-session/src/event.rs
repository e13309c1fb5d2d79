// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde_json::Value;

/// Events emitted by a session.  The streaming transform consumes these and
/// turns them into Anthropic SSE frames.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A text chunk streamed from the model.
    TextDelta(String),
    /// The model requested a tool call.  `input` is the complete argument
    /// object; the session library only announces a call once its arguments
    /// have finished streaming.
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    /// The assistant turn ended with outstanding tool calls; the session is
    /// parked until their results arrive through the MCP bridge.  Ends the
    /// current HTTP response with `stop_reason: "tool_use"`.
    TurnPaused,
    /// Token usage update for the turn.
    Usage {
        input_tokens: u32,
        output_tokens: u32,
    },
    /// The session finished its final turn; nothing further will arrive.
    Idle,
    /// A session-level failure.  Terminal.
    Error(String),
}
