// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

fn default_port() -> u16 {
    8123
}

/// Maximum accepted request body size in bytes.  Xcode sends the full
/// conversation history (including file contents in code fences) on every
/// request, so the default is generous.
fn default_body_limit() -> usize {
    50 * 1024 * 1024
}

/// Top-level xcopilot configuration.
///
/// Field names on the wire are camelCase, matching the config files Xcode
/// users already share between tools:
///
/// ```yaml
/// port: 8123
/// model: gpt-5-codex
/// mcpServers:
///   github:
///     command: github-mcp-server
///     args: ["stdio"]
///     allowedTools: ["*"]
/// allowedCliTools: ["view", "grep"]
/// excludedFilePatterns: ["\\.env", "secrets/"]
/// autoApprovePermissions: true
/// reasoningEffort: medium
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// TCP port the proxy listens on (loopback only).
    pub port: u16,

    /// Default model id used when a request does not carry one that the
    /// catalog recognises.  `None` means the catalog default.
    pub model: Option<String>,

    /// Which session backend to use: `"copilot"` (the Copilot CLI in
    /// `--server` mode) or `"mock"` (deterministic echo, for development).
    pub session_provider: String,

    /// User-configured MCP servers, passed through to every session.
    /// The proxy forces `tools: ["*"]` on each so the pre-tool-use hook is
    /// the single filtering point.
    pub mcp_servers: BTreeMap<String, McpServerEntry>,

    /// CLI tools the session library may run locally (`"*"` allows all).
    /// With a tool bridge attached this feeds the pre-tool-use hook; without
    /// one it becomes the session's `availableTools` list.
    pub allowed_cli_tools: Vec<String>,

    /// Regex fragments matched against the info line of fenced code blocks
    /// in user messages.  Matching fences are stripped before the prompt is
    /// sent to the model.  Xcode happily pastes `.env` files into context.
    pub excluded_file_patterns: Vec<String>,

    /// Maximum accepted request body size in bytes.
    pub body_limit: usize,

    /// Permission policy for session-library permission requests.
    /// `true`/`false` approve or deny everything; a list approves only the
    /// named request kinds.
    pub auto_approve_permissions: AutoApprovePermissions,

    /// Reasoning effort forwarded to models that support it.
    pub reasoning_effort: Option<ReasoningEffort>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            model: None,
            session_provider: "copilot".to_string(),
            mcp_servers: BTreeMap::new(),
            allowed_cli_tools: Vec::new(),
            excluded_file_patterns: Vec::new(),
            body_limit: default_body_limit(),
            auto_approve_permissions: AutoApprovePermissions::All(true),
            reasoning_effort: None,
        }
    }
}

/// One user-configured MCP server (stdio transport).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpServerEntry {
    /// Executable to spawn.
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Tools from this server the pre-tool-use hook lets through
    /// (`"*"` allows all).  `None` allows none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, String>>,
}

/// `autoApprovePermissions` accepts either a bare bool or a list of
/// permission kinds, so the schema is an untagged union.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AutoApprovePermissions {
    All(bool),
    Kinds(Vec<String>),
}

impl AutoApprovePermissions {
    /// Whether a permission request of `kind` should be auto-approved.
    pub fn approves(&self, kind: &str) -> bool {
        match self {
            Self::All(b) => *b,
            Self::Kinds(kinds) => kinds.iter().any(|k| k == kind),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── Defaults ─────────────────────────────────────────────────────────────

    #[test]
    fn default_config_is_copilot_on_loopback_port() {
        let c = Config::default();
        assert_eq!(c.port, 8123);
        assert_eq!(c.session_provider, "copilot");
        assert!(c.mcp_servers.is_empty());
    }

    #[test]
    fn empty_document_deserializes_to_defaults() {
        let c: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(c.port, Config::default().port);
        assert!(c.auto_approve_permissions.approves("tool"));
    }

    // ── Wire shape ────────────────────────────────────────────────────────────

    #[test]
    fn camel_case_keys_are_accepted() {
        let yaml = r#"
            allowedCliTools: ["grep"]
            excludedFilePatterns: ["\\.env"]
            bodyLimit: 1024
            reasoningEffort: high
        "#;
        let c: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(c.allowed_cli_tools, vec!["grep"]);
        assert_eq!(c.excluded_file_patterns, vec!["\\.env"]);
        assert_eq!(c.body_limit, 1024);
        assert_eq!(c.reasoning_effort, Some(ReasoningEffort::High));
    }

    #[test]
    fn mcp_server_entry_round_trips() {
        let yaml = r#"
            mcpServers:
              github:
                command: github-mcp-server
                args: ["stdio"]
                allowedTools: ["*"]
        "#;
        let c: Config = serde_yaml::from_str(yaml).unwrap();
        let gh = &c.mcp_servers["github"];
        assert_eq!(gh.command, "github-mcp-server");
        assert_eq!(gh.allowed_tools.as_deref(), Some(&["*".to_string()][..]));
    }

    // ── autoApprovePermissions union ──────────────────────────────────────────

    #[test]
    fn auto_approve_bool_is_uniform() {
        let c: Config = serde_yaml::from_str("autoApprovePermissions: false").unwrap();
        assert!(!c.auto_approve_permissions.approves("anything"));
    }

    #[test]
    fn auto_approve_list_is_membership_test() {
        let c: Config =
            serde_yaml::from_str(r#"autoApprovePermissions: ["read", "shell"]"#).unwrap();
        assert!(c.auto_approve_permissions.approves("shell"));
        assert!(!c.auto_approve_permissions.approves("write"));
    }
}
