// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Session config builder — a pure function of the server config plus the
//! per-request facts (model, conversation id, whether Xcode advertised
//! tools).
//!
//! Policy highlights:
//!
//! - User MCP servers are copied with `tools: ["*"]` forced on; the
//!   pre-tool-use hook is the single filtering point, so the session library
//!   must see every tool.
//! - With a tool bridge, a synthetic `xcode-bridge` HTTP server pointing back
//!   at this proxy is added, and `availableTools` is omitted (the full CLI
//!   toolset stays visible, the hook filters).  Without a bridge, a non-empty
//!   `allowedCliTools` becomes `availableTools`.
//! - `reasoningEffort` is only forwarded when the model supports it.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use xcopilot_config::Config;

use crate::config::{
    HookDecision, InfiniteSessions, McpServerConfig, PermissionDecision, SessionCallbacks,
    SessionConfig,
};

/// Per-request inputs to [`build_session_config`].
pub struct SessionParams<'a> {
    pub model: &'a str,
    pub system_message: Option<String>,
    pub config: &'a Config,
    pub supports_reasoning_effort: bool,
    pub working_directory: Option<PathBuf>,
    pub has_tool_bridge: bool,
    pub port: u16,
    pub conversation_id: &'a str,
}

/// Prefix under which the session library exposes bridge tools to its hooks.
pub const BRIDGE_TOOL_PREFIX: &str = "xcode-bridge-";

/// Name of the synthetic MCP server that routes tool calls back to Xcode.
pub const BRIDGE_SERVER_NAME: &str = "xcode-bridge";

pub fn build_session_config(params: SessionParams<'_>) -> SessionConfig {
    let mut mcp_servers: BTreeMap<String, McpServerConfig> = params
        .config
        .mcp_servers
        .iter()
        .map(|(name, entry)| {
            (
                name.clone(),
                McpServerConfig::Stdio {
                    command: entry.command.clone(),
                    args: entry.args.clone(),
                    env: entry.env.clone(),
                    tools: vec!["*".to_string()],
                },
            )
        })
        .collect();

    if params.has_tool_bridge {
        mcp_servers.insert(
            BRIDGE_SERVER_NAME.to_string(),
            McpServerConfig::Http {
                url: format!(
                    "http://127.0.0.1:{}/mcp/{}",
                    params.port, params.conversation_id
                ),
                tools: vec!["*".to_string()],
            },
        );
    }

    let available_tools = if !params.has_tool_bridge && !params.config.allowed_cli_tools.is_empty()
    {
        Some(params.config.allowed_cli_tools.clone())
    } else {
        None
    };

    let reasoning_effort = params
        .config
        .reasoning_effort
        .filter(|_| params.supports_reasoning_effort);

    let auto_approve = params.config.auto_approve_permissions.clone();
    let allowed_cli = params.config.allowed_cli_tools.clone();
    let mcp_allowed: Vec<Vec<String>> = params
        .config
        .mcp_servers
        .values()
        .filter_map(|entry| entry.allowed_tools.clone())
        .collect();

    let callbacks = SessionCallbacks {
        on_user_input_request: Arc::new(|_prompt| {
            "User input is not available; continue with your best judgement.".to_string()
        }),
        on_permission_request: Arc::new(move |request| {
            if auto_approve.approves(&request.kind) {
                PermissionDecision::Approve
            } else {
                PermissionDecision::Deny
            }
        }),
        on_pre_tool_use: Arc::new(move |tool_name| {
            if tool_name.starts_with(BRIDGE_TOOL_PREFIX) {
                return HookDecision::Allow;
            }
            if list_allows(&allowed_cli, tool_name) {
                return HookDecision::Allow;
            }
            if mcp_allowed.iter().any(|list| list_allows(list, tool_name)) {
                return HookDecision::Allow;
            }
            HookDecision::Deny
        }),
    };

    SessionConfig {
        model: params.model.to_string(),
        system_message: params.system_message,
        streaming: true,
        infinite_sessions: InfiniteSessions { enabled: true },
        working_directory: params.working_directory,
        mcp_servers,
        available_tools,
        reasoning_effort,
        callbacks,
    }
}

fn list_allows(list: &[String], tool_name: &str) -> bool {
    list.iter().any(|t| t == "*" || t == tool_name)
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
