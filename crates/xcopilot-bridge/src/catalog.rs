// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Per-conversation tool catalog.
//!
//! Xcode advertises its tools on every request and the catalog is replaced
//! wholesale each time.  Models hallucinate short names (`XcodeRead` instead
//! of `mcp__xcode-tools__XcodeRead`) and inconsistent argument casings;
//! [`ToolCatalog::resolve_name`] and [`ToolCatalog::normalize_args`] repair
//! both without ever rejecting a call.

use heck::{ToLowerCamelCase, ToSnakeCase};
use serde_json::{Map, Value};
use xcopilot_protocol::ToolDefinition;

/// Fixed aliases for argument keys that do not survive camel/snake
/// conversion, mostly grep-style single-letter flags.
const KEY_ALIASES: &[(&str, &str)] = &[
    ("ignoreCase", "-i"),
    ("lineNumbers", "-n"),
    ("afterContext", "-A"),
    ("beforeContext", "-B"),
    ("contextLines", "-C"),
];

/// The current tool catalog of one conversation.
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    tools: Vec<ToolDefinition>,
}

impl ToolCatalog {
    /// Replace the stored catalog.
    pub fn cache(&mut self, tools: Vec<ToolDefinition>) {
        self.tools = tools;
    }

    /// The stored catalog (may be empty).
    pub fn get(&self) -> &[ToolDefinition] {
        &self.tools
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Map a possibly-shortened tool name back to its catalog name.
    ///
    /// Exact matches win.  Otherwise, if exactly one cached tool's name ends
    /// with `"__" + name` (the MCP prefix convention), that tool is meant.
    /// Ambiguous or unknown names pass through unchanged, so the function
    /// is idempotent.
    pub fn resolve_name(&self, name: &str) -> String {
        if self.tools.iter().any(|t| t.name == name) {
            return name.to_string();
        }
        let suffix = format!("__{name}");
        let mut candidates = self.tools.iter().filter(|t| t.name.ends_with(&suffix));
        match (candidates.next(), candidates.next()) {
            (Some(only), None) => only.name.clone(),
            _ => name.to_string(),
        }
    }

    /// Repair argument keys and enum values against the tool's schema.
    ///
    /// Per key: exact schema match is kept; otherwise a camelCase↔snake_case
    /// flip is tried, then the fixed alias table.  Per value: when the target
    /// property declares a string `enum`, the incoming string is case-flipped
    /// to a member if one matches.  Unknown keys and values always pass
    /// through; the tool decides what to reject, not the proxy.
    pub fn normalize_args(&self, tool_name: &str, args: Value) -> Value {
        let Some(tool) = self.tools.iter().find(|t| t.name == tool_name) else {
            return args;
        };
        let Some(properties) = tool.input_schema.get("properties").and_then(Value::as_object)
        else {
            return args;
        };
        if properties.is_empty() {
            return args;
        }
        let entries = match args {
            Value::Object(entries) => entries,
            other => return other,
        };

        let mut normalized = Map::with_capacity(entries.len());
        for (key, value) in entries {
            let key = normalize_key(&key, properties);
            let value = normalize_enum_value(&key, value, properties);
            normalized.insert(key, value);
        }
        Value::Object(normalized)
    }
}

fn normalize_key(key: &str, properties: &Map<String, Value>) -> String {
    if properties.contains_key(key) {
        return key.to_string();
    }
    let snake = key.to_snake_case();
    if properties.contains_key(&snake) {
        return snake;
    }
    let camel = key.to_lower_camel_case();
    if properties.contains_key(&camel) {
        return camel;
    }
    if let Some((_, alias)) = KEY_ALIASES.iter().find(|(from, _)| *from == key) {
        if properties.contains_key(*alias) {
            return (*alias).to_string();
        }
    }
    key.to_string()
}

fn normalize_enum_value(key: &str, value: Value, properties: &Map<String, Value>) -> Value {
    let Some(members) = properties
        .get(key)
        .and_then(|p| p.get("enum"))
        .and_then(Value::as_array)
    else {
        return value;
    };
    let Value::String(s) = &value else {
        return value;
    };
    if members.iter().any(|m| m.as_str() == Some(s)) {
        return value;
    }
    let snake = s.to_snake_case();
    let camel = s.to_lower_camel_case();
    for m in members {
        if let Some(member) = m.as_str() {
            if member == snake || member == camel {
                return Value::String(member.to_string());
            }
        }
    }
    value
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
