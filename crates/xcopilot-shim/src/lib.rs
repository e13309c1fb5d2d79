// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! `xcopilot-shim` — the MCP server processes the session library spawns.
//!
//! # Passthrough shim
//!
//! ```text
//! session library (Copilot CLI)
//!       │  stdin/stdout (line-delimited JSON-RPC, MCP)
//!       ▼
//! PassthroughShim (rmcp ServerHandler)
//!       │  HTTP (loopback)
//!       ▼
//! xcopilot bridge ── parks until Xcode posts the tool_result
//! ```
//!
//! The shim holds no state: `tools/list` and `tools/call` are forwarded to
//! the bridge verbatim, and the bridge decides which conversation they
//! belong to.  `MCP_SERVER_PORT` selects the bridge port;
//! `MCP_CONVERSATION_ID`, when set, selects the per-conversation routes.
//!
//! # mcpbridge adapter
//!
//! [`mcpbridge::run`] wraps Apple's native `xcrun mcpbridge` MCP server,
//! whose `tools/call` responses lack `structuredContent`, and injects it so
//! strict MCP clients accept them.

pub mod mcpbridge;
pub mod passthrough;

pub use passthrough::{serve_stdio, PassthroughShim};
