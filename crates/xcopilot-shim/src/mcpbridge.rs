// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Adapter around Apple's native `xcrun mcpbridge` MCP server.
//!
//! mcpbridge speaks correct MCP except for one gap: its `tools/call`
//! responses carry only a `content` array, no `structuredContent`, which
//! strict clients reject.  This adapter sits between the session library
//! and mcpbridge, forwards every line untouched in both directions, and
//! injects `structuredContent` into `tools/call` responses on the way back:
//! the first text content item is parsed as JSON when possible, else
//! wrapped as `{"text": …}`.

use std::collections::HashSet;
use std::process::Stdio;

use anyhow::Context as _;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::process::Command;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, warn};

/// Spawn `<command> <args…>` and proxy stdio JSON-RPC until either side
/// closes.  The default invocation is `xcrun mcpbridge`.
pub async fn run(command: &str, args: &[String]) -> anyhow::Result<()> {
    let mut child = Command::new(command)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("spawning {command}"))?;

    let child_stdin = child.stdin.take().context("child stdin unavailable")?;
    let child_stdout = child.stdout.take().context("child stdout unavailable")?;

    let mut to_child = FramedWrite::new(child_stdin, LinesCodec::new());
    let mut from_child = FramedRead::new(child_stdout, LinesCodec::new());
    let mut from_client = FramedRead::new(tokio::io::stdin(), LinesCodec::new());
    let mut to_client = FramedWrite::new(tokio::io::stdout(), LinesCodec::new());

    // Request ids of in-flight tools/call requests; their responses get the
    // structuredContent patch.
    let mut tool_calls: HashSet<u64> = HashSet::new();

    loop {
        tokio::select! {
            line = from_client.next() => match line {
                Some(Ok(line)) => {
                    if let Some(id) = tool_call_request_id(&line) {
                        tool_calls.insert(id);
                    }
                    to_child.send(line).await.context("writing to mcpbridge")?;
                }
                Some(Err(e)) => {
                    warn!("client stream error: {e}");
                    break;
                }
                None => {
                    debug!("client closed stdin, shutting down");
                    break;
                }
            },
            line = from_child.next() => match line {
                Some(Ok(line)) => {
                    let line = patch_response_line(line, &mut tool_calls);
                    to_client.send(line).await.context("writing to client")?;
                }
                Some(Err(e)) => {
                    warn!("mcpbridge stream error: {e}");
                    break;
                }
                None => {
                    debug!("mcpbridge exited");
                    break;
                }
            },
        }
    }

    let _ = child.kill().await;
    Ok(())
}

/// The request id when `line` is a `tools/call` request.
fn tool_call_request_id(line: &str) -> Option<u64> {
    let message: Value = serde_json::from_str(line).ok()?;
    if message["method"] == "tools/call" {
        message["id"].as_u64()
    } else {
        None
    }
}

/// Patch a response line when it answers a tracked `tools/call`.
/// Unparseable lines pass through untouched.
fn patch_response_line(line: String, tool_calls: &mut HashSet<u64>) -> String {
    let Ok(mut message) = serde_json::from_str::<Value>(&line) else {
        return line;
    };
    let Some(id) = message["id"].as_u64() else {
        return line;
    };
    if !tool_calls.remove(&id) {
        return line;
    }
    inject_structured_content(&mut message);
    serde_json::to_string(&message).unwrap_or(line)
}

/// Add `result.structuredContent` when missing: the first text content item
/// parsed as JSON, else `{"text": …}`.
fn inject_structured_content(response: &mut Value) {
    let Some(result) = response.get_mut("result") else {
        return;
    };
    if !result.is_object() || result.get("structuredContent").is_some() {
        return;
    }
    let first_text = result["content"]
        .as_array()
        .and_then(|items| {
            items
                .iter()
                .find(|item| item["type"] == "text")
                .and_then(|item| item["text"].as_str())
        })
        .map(str::to_string);
    let Some(text) = first_text else {
        return;
    };
    let structured = match serde_json::from_str::<Value>(&text) {
        Ok(parsed) if parsed.is_object() || parsed.is_array() => parsed,
        _ => serde_json::json!({"text": text}),
    };
    result["structuredContent"] = structured;
}

// ─── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn tool_call_requests_are_tracked() {
        assert_eq!(
            tool_call_request_id(r#"{"jsonrpc":"2.0","id":7,"method":"tools/call"}"#),
            Some(7)
        );
        assert_eq!(
            tool_call_request_id(r#"{"jsonrpc":"2.0","id":7,"method":"tools/list"}"#),
            None
        );
        assert_eq!(tool_call_request_id("not json"), None);
    }

    #[test]
    fn json_text_becomes_structured_content() {
        let mut response = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {"content": [{"type": "text", "text": "{\"files\": 3}"}]},
        });
        inject_structured_content(&mut response);
        assert_eq!(response["result"]["structuredContent"], json!({"files": 3}));
    }

    #[test]
    fn plain_text_is_wrapped() {
        let mut response = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {"content": [{"type": "text", "text": "build ok"}]},
        });
        inject_structured_content(&mut response);
        assert_eq!(
            response["result"]["structuredContent"],
            json!({"text": "build ok"})
        );
    }

    #[test]
    fn existing_structured_content_is_untouched() {
        let mut response = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "content": [{"type": "text", "text": "{\"a\":1}"}],
                "structuredContent": {"keep": true},
            },
        });
        inject_structured_content(&mut response);
        assert_eq!(response["result"]["structuredContent"], json!({"keep": true}));
    }

    #[test]
    fn error_responses_pass_through() {
        let mut response = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32601, "message": "method not found"},
        });
        let before = response.clone();
        inject_structured_content(&mut response);
        assert_eq!(response, before);
    }

    #[test]
    fn only_tracked_ids_are_patched() {
        let mut tracked: HashSet<u64> = [1].into_iter().collect();
        let line = r#"{"jsonrpc":"2.0","id":2,"result":{"content":[{"type":"text","text":"x"}]}}"#;
        let out = patch_response_line(line.to_string(), &mut tracked);
        assert_eq!(out, line, "untracked response is untouched");

        let line = r#"{"jsonrpc":"2.0","id":1,"result":{"content":[{"type":"text","text":"x"}]}}"#;
        let out = patch_response_line(line.to_string(), &mut tracked);
        assert!(out.contains("structuredContent"));
        assert!(tracked.is_empty(), "id is forgotten after its response");
    }
}
