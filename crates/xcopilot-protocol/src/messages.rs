// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Request types ────────────────────────────────────────────────────────────

/// `POST /v1/messages` request body.
#[derive(Debug, Clone, Deserialize)]
pub struct MessagesRequest {
    pub model: String,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub system: Option<SystemPrompt>,
    #[serde(default)]
    pub tools: Option<Vec<ToolDefinition>>,
    #[serde(default)]
    pub stream: Option<bool>,
}

/// The `system` field is either a bare string or a list of text blocks.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    Text(String),
    Blocks(Vec<SystemBlock>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemBlock {
    #[serde(default)]
    pub text: String,
}

impl SystemPrompt {
    /// Flatten to a single string (blocks joined by blank lines).
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(t) => t.clone(),
            Self::Blocks(blocks) => blocks
                .iter()
                .map(|b| b.text.as_str())
                .collect::<Vec<_>>()
                .join("\n\n"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// A single message in the conversation history.
#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    /// Collect the `tool_use_id`s of every `tool_result` block.
    ///
    /// Returns an empty vec for plain-string content; the continuation
    /// router treats those as new conversations.
    pub fn tool_result_ids(&self) -> Vec<&str> {
        match &self.content {
            MessageContent::Text(_) => Vec::new(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id.as_str()),
                    _ => None,
                })
                .collect(),
        }
    }

    /// All text carried by this message, block boundaries joined by newlines.
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Message content is either a raw string or a list of typed blocks.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// One content block in a block-list message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Option<ToolResultContent>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

/// Tool result content: a plain string or nested blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl ToolResultContent {
    /// Flatten to the value handed back to the parked bridge call: a string
    /// when possible, otherwise the raw block JSON.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Text(t) => Value::String(t.clone()),
            Self::Blocks(blocks) => {
                let texts: Vec<&str> = blocks
                    .iter()
                    .filter_map(|b| match b {
                        ContentBlock::Text { text } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect();
                if texts.len() == blocks.len() {
                    Value::String(texts.join("\n"))
                } else {
                    serde_json::to_value(blocks).unwrap_or(Value::Null)
                }
            }
        }
    }
}

/// A tool definition as Xcode advertises it.
///
/// `input_schema` is a JSON-schema-shaped object (`type: "object"` with a
/// `properties` map).  It is kept as raw JSON; the proxy never validates
/// against it, only mines it for key/enum normalization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub input_schema: Value,
}

// ─── Error envelope ───────────────────────────────────────────────────────────

/// Anthropic-format error envelope, used for every non-SSE error response.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub message: String,
}

impl ErrorEnvelope {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            kind: "error",
            error: ErrorBody {
                kind: "invalid_request_error",
                message: message.into(),
            },
        }
    }

    pub fn api_error(message: impl Into<String>) -> Self {
        Self {
            kind: "error",
            error: ErrorBody {
                kind: "api_error",
                message: message.into(),
            },
        }
    }
}

// ─── Models list ──────────────────────────────────────────────────────────────

/// `GET /v1/models` response.
#[derive(Debug, Clone, Serialize)]
pub struct ModelList {
    pub data: Vec<ModelInfo>,
    pub has_more: bool,
    pub first_id: Option<String>,
    pub last_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub id: String,
    pub display_name: String,
}

impl ModelList {
    pub fn new(models: impl IntoIterator<Item = (String, String)>) -> Self {
        let data: Vec<ModelInfo> = models
            .into_iter()
            .map(|(id, display_name)| ModelInfo {
                kind: "model",
                id,
                display_name,
            })
            .collect();
        Self {
            has_more: false,
            first_id: data.first().map(|m| m.id.clone()),
            last_id: data.last().map(|m| m.id.clone()),
            data,
        }
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn parse(v: serde_json::Value) -> MessagesRequest {
        serde_json::from_value(v).unwrap()
    }

    // ── Content shapes ────────────────────────────────────────────────────────

    #[test]
    fn string_content_parses() {
        let req = parse(json!({
            "model": "gpt-5-codex",
            "messages": [{"role": "user", "content": "Hello"}]
        }));
        assert!(matches!(
            req.messages[0].content,
            MessageContent::Text(ref t) if t == "Hello"
        ));
    }

    #[test]
    fn block_content_parses() {
        let req = parse(json!({
            "model": "gpt-5-codex",
            "messages": [{"role": "user", "content": [
                {"type": "text", "text": "look at this"},
                {"type": "tool_result", "tool_use_id": "tc1", "content": "FILE"}
            ]}]
        }));
        assert_eq!(req.messages[0].tool_result_ids(), vec!["tc1"]);
        assert_eq!(req.messages[0].text(), "look at this");
    }

    #[test]
    fn string_content_has_no_tool_result_ids() {
        let req = parse(json!({
            "model": "m",
            "messages": [{"role": "user", "content": "tc1 is mentioned here"}]
        }));
        assert!(req.messages[0].tool_result_ids().is_empty());
    }

    #[test]
    fn tool_result_block_content_flattens_to_string() {
        let content = ToolResultContent::Blocks(vec![
            ContentBlock::Text { text: "a".into() },
            ContentBlock::Text { text: "b".into() },
        ]);
        assert_eq!(content.to_value(), json!("a\nb"));
    }

    #[test]
    fn system_prompt_accepts_both_shapes() {
        let s: SystemPrompt = serde_json::from_value(json!("be brief")).unwrap();
        assert_eq!(s.as_text(), "be brief");
        let s: SystemPrompt =
            serde_json::from_value(json!([{"type": "text", "text": "a"}, {"type": "text", "text": "b"}]))
                .unwrap();
        assert_eq!(s.as_text(), "a\n\nb");
    }

    #[test]
    fn missing_model_is_a_parse_error() {
        let r: Result<MessagesRequest, _> =
            serde_json::from_value(json!({"messages": []}));
        assert!(r.is_err());
    }

    // ── Error envelope ────────────────────────────────────────────────────────

    #[test]
    fn invalid_request_envelope_shape() {
        let v = serde_json::to_value(ErrorEnvelope::invalid_request("bad body")).unwrap();
        assert_eq!(v["type"], "error");
        assert_eq!(v["error"]["type"], "invalid_request_error");
        assert_eq!(v["error"]["message"], "bad body");
    }

    // ── Models list ───────────────────────────────────────────────────────────

    #[test]
    fn model_list_tracks_first_and_last() {
        let list = ModelList::new([
            ("a".to_string(), "Model A".to_string()),
            ("b".to_string(), "Model B".to_string()),
        ]);
        assert_eq!(list.first_id.as_deref(), Some("a"));
        assert_eq!(list.last_id.as_deref(), Some("b"));
        assert!(!list.has_more);
    }
}
