// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! `xcopilot-bridge` — the tool-bridge continuation engine.
//!
//! Xcode executes tools locally, but the session library only knows how to
//! run tools through MCP servers.  The bridge squares that circle: the
//! streaming transform registers each `tool_use` the model emits as an
//! *expected* call, the MCP shim's HTTP request *parks* on that expectation,
//! and Xcode's next `/v1/messages` request (carrying `tool_result` blocks)
//! resolves the parked call so the session can continue.
//!
//! ```text
//! session event ──► register_expected(id, name)          (streaming transform)
//!                        │ pop
//! shim HTTP call ──► register_mcp_request(name) ──► oneshot::Receiver
//!                        │                               ▲
//! Xcode tool_result ► resolve_tool_call(id, result) ─────┘
//! ```
//!
//! Three pieces:
//!
//! - [`catalog`] — the per-conversation tool catalog with hallucinated-name
//!   resolution and argument-key/enum normalization.
//! - [`conversation`] — the per-conversation bridge state (expected queues,
//!   pending table, reply attachment, lifecycle flags).
//! - [`manager`] — the process-wide registry and the continuation router.

pub mod catalog;
pub mod conversation;
pub mod manager;

pub use catalog::ToolCatalog;
pub use conversation::{ConversationState, ToolCallError, TOOL_CALL_TIMEOUT};
pub use manager::{Conversation, ConversationManager};
