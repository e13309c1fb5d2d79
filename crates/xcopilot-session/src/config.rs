// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use xcopilot_config::ReasoningEffort;

/// Callback answering a session-library permission request.
pub type PermissionCallback =
    Arc<dyn Fn(&PermissionRequest) -> PermissionDecision + Send + Sync>;

/// Callback answering a session-library request for interactive user input.
/// The proxy is headless, so the standard implementation returns a refusal.
pub type UserInputCallback = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Pre-tool-use hook: called with the tool name before the session library
/// runs any tool; [`HookDecision::Deny`] blocks the call.
pub type PreToolUseHook = Arc<dyn Fn(&str) -> HookDecision + Send + Sync>;

/// A permission request surfaced by the session library.
#[derive(Debug, Clone)]
pub struct PermissionRequest {
    /// Request kind, e.g. `"shell"`, `"write"`, `"read"`.
    pub kind: String,
    /// Free-form description of what is being asked.
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionDecision {
    Approve,
    Deny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookDecision {
    Allow,
    Deny,
}

/// One MCP server in the session config.  `Stdio` entries come from the user
/// config; the synthetic `xcode-bridge` entry is `Http`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum McpServerConfig {
    Stdio {
        command: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        env: Option<BTreeMap<String, String>>,
        tools: Vec<String>,
    },
    Http {
        url: String,
        tools: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct InfiniteSessions {
    pub enabled: bool,
}

/// Everything a session is opened with.
///
/// The serializable half goes over the wire to the Copilot CLI
/// ([`SessionConfig::wire_params`]); the callbacks stay on this side and
/// answer the CLI's inbound requests.
#[derive(Clone)]
pub struct SessionConfig {
    pub model: String,
    pub system_message: Option<String>,
    pub streaming: bool,
    pub infinite_sessions: InfiniteSessions,
    pub working_directory: Option<PathBuf>,
    pub mcp_servers: BTreeMap<String, McpServerConfig>,
    /// When `None` the session library keeps its full CLI toolset and the
    /// pre-tool-use hook does the filtering.
    pub available_tools: Option<Vec<String>>,
    pub reasoning_effort: Option<ReasoningEffort>,
    pub callbacks: SessionCallbacks,
}

#[derive(Clone)]
pub struct SessionCallbacks {
    pub on_user_input_request: UserInputCallback,
    pub on_permission_request: PermissionCallback,
    pub on_pre_tool_use: PreToolUseHook,
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("model", &self.model)
            .field("streaming", &self.streaming)
            .field("infinite_sessions", &self.infinite_sessions)
            .field("mcp_servers", &self.mcp_servers)
            .field("available_tools", &self.available_tools)
            .field("reasoning_effort", &self.reasoning_effort)
            .finish_non_exhaustive()
    }
}

impl SessionConfig {
    /// The camelCase parameter object for `session.create`.
    pub fn wire_params(&self) -> Value {
        let mut params = json!({
            "model": self.model,
            "streaming": self.streaming,
            "infiniteSessions": {"enabled": self.infinite_sessions.enabled},
            "mcpServers": self.mcp_servers,
        });
        if let Some(system) = &self.system_message {
            params["systemPrompt"] = json!(system);
        }
        if let Some(dir) = &self.working_directory {
            params["workingDirectory"] = json!(dir.display().to_string());
        }
        if let Some(tools) = &self.available_tools {
            params["availableTools"] = json!(tools);
        }
        if let Some(effort) = self.reasoning_effort {
            params["reasoningEffort"] = json!(effort.as_str());
        }
        params
    }

    /// The URL of the synthetic tool-bridge MCP server, when present.
    pub fn bridge_url(&self) -> Option<&str> {
        self.mcp_servers.values().find_map(|s| match s {
            McpServerConfig::Http { url, .. } => Some(url.as_str()),
            _ => None,
        })
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config() -> SessionConfig {
        SessionConfig {
            model: "gpt-5-codex".into(),
            system_message: Some("be brief".into()),
            streaming: true,
            infinite_sessions: InfiniteSessions { enabled: true },
            working_directory: None,
            mcp_servers: BTreeMap::new(),
            available_tools: None,
            reasoning_effort: None,
            callbacks: SessionCallbacks {
                on_user_input_request: Arc::new(|_| "no".into()),
                on_permission_request: Arc::new(|_| PermissionDecision::Deny),
                on_pre_tool_use: Arc::new(|_| HookDecision::Deny),
            },
        }
    }

    #[test]
    fn wire_params_omits_absent_fields() {
        let params = minimal_config().wire_params();
        assert_eq!(params["model"], "gpt-5-codex");
        assert_eq!(params["systemPrompt"], "be brief");
        assert_eq!(params["infiniteSessions"]["enabled"], true);
        assert!(params.get("availableTools").is_none());
        assert!(params.get("reasoningEffort").is_none());
        assert!(params.get("workingDirectory").is_none());
    }

    #[test]
    fn mcp_server_serialization_is_tagged_camel_case() {
        let mut config = minimal_config();
        config.mcp_servers.insert(
            "xcode-bridge".into(),
            McpServerConfig::Http {
                url: "http://127.0.0.1:8123/mcp/abc".into(),
                tools: vec!["*".into()],
            },
        );
        let params = config.wire_params();
        let bridge = &params["mcpServers"]["xcode-bridge"];
        assert_eq!(bridge["type"], "http");
        assert_eq!(bridge["url"], "http://127.0.0.1:8123/mcp/abc");
        assert_eq!(bridge["tools"][0], "*");
    }

    #[test]
    fn bridge_url_finds_the_http_server() {
        let mut config = minimal_config();
        assert!(config.bridge_url().is_none());
        config.mcp_servers.insert(
            "xcode-bridge".into(),
            McpServerConfig::Http {
                url: "http://127.0.0.1:1/mcp/x".into(),
                tools: vec!["*".into()],
            },
        );
        assert_eq!(config.bridge_url(), Some("http://127.0.0.1:1/mcp/x"));
    }
}
