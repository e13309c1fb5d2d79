// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Deterministic session providers for tests and development.
//!
//! [`ScriptedSessionProvider`] replays a per-open script of [`MockStep`]s.
//! The interesting step is [`MockStep::CallBridge`]: it performs the same
//! HTTP tool-call the real session library's MCP client would, against the
//! `xcode-bridge` server in the session config, and then emits the returned
//! content as text, so an end-to-end test can watch a tool result travel
//! the whole loop and come back out of the SSE stream.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    SessionCommand, SessionConfig, SessionControl, SessionEvent, SessionHandle, SessionProvider,
};

/// One step of a scripted session.
#[derive(Debug, Clone)]
pub enum MockStep {
    /// Emit a text delta.
    Text(String),
    /// Announce a tool call (arguments complete).
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    /// End the assistant turn with outstanding tool calls.
    PauseTurn,
    /// Act as the session library's MCP client: POST `{name, arguments}` to
    /// the bridge's tool-call endpoint, wait for the parked reply, then emit
    /// the returned content as a text delta.
    CallBridge { name: String, arguments: Value },
    /// Park until the proxy sends follow-up input, then echo it.
    AwaitInput,
    /// Emit a usage update.
    Usage {
        input_tokens: u32,
        output_tokens: u32,
    },
    /// Emit a session error (terminal).
    Fail(String),
    /// Finish the session (terminal).
    Idle,
}

/// What the provider has been asked so far; tests assert against this.
#[derive(Default)]
pub struct SeenRequests {
    pub configs: Mutex<Vec<SessionConfig>>,
    pub prompts: Mutex<Vec<String>>,
    pub inputs: Mutex<Vec<String>>,
}

/// Replays one script per `open` call, front of the queue first.
pub struct ScriptedSessionProvider {
    scripts: Mutex<VecDeque<Vec<MockStep>>>,
    pub seen: Arc<SeenRequests>,
}

impl ScriptedSessionProvider {
    pub fn new(scripts: Vec<Vec<MockStep>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            seen: Arc::new(SeenRequests::default()),
        }
    }

    /// Convenience: a session that streams one text reply and finishes.
    pub fn always_text(reply: impl Into<String>) -> Self {
        Self::new(vec![vec![
            MockStep::Text(reply.into()),
            MockStep::Usage {
                input_tokens: 5,
                output_tokens: 5,
            },
            MockStep::Idle,
        ]])
    }

    /// Convenience: one tool round-trip through the bridge, then idle.
    /// The second turn's text is whatever the bridge returned.
    pub fn tool_round_trip(
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        input: Value,
    ) -> Self {
        let name = tool_name.into();
        Self::new(vec![vec![
            MockStep::ToolUse {
                id: tool_id.into(),
                name: name.clone(),
                input: input.clone(),
            },
            MockStep::PauseTurn,
            MockStep::CallBridge {
                name,
                arguments: input,
            },
            MockStep::Idle,
        ]])
    }
}

#[async_trait]
impl SessionProvider for ScriptedSessionProvider {
    fn name(&self) -> &str {
        "scripted-mock"
    }

    async fn open(&self, config: SessionConfig, prompt: String) -> anyhow::Result<SessionHandle> {
        let script = self
            .scripts
            .lock()
            .expect("script queue poisoned")
            .pop_front()
            .unwrap_or_else(|| vec![MockStep::Idle]);

        self.seen
            .configs
            .lock()
            .expect("seen poisoned")
            .push(config.clone());
        self.seen
            .prompts
            .lock()
            .expect("seen poisoned")
            .push(prompt);

        let (control, mut commands) = SessionControl::channel();
        let bridge_url = config.bridge_url().map(str::to_string);
        let seen = Arc::clone(&self.seen);

        let events = async_stream::stream! {
            let client = reqwest::Client::new();
            for step in script {
                match step {
                    MockStep::Text(text) => yield Ok(SessionEvent::TextDelta(text)),
                    MockStep::ToolUse { id, name, input } => {
                        yield Ok(SessionEvent::ToolUse { id, name, input });
                    }
                    MockStep::PauseTurn => yield Ok(SessionEvent::TurnPaused),
                    MockStep::CallBridge { name, arguments } => {
                        let Some(base) = bridge_url.as_deref() else {
                            yield Ok(SessionEvent::Error(
                                "no xcode-bridge server configured".to_string(),
                            ));
                            return;
                        };
                        let result = client
                            .post(format!("{base}/tool-call"))
                            .json(&serde_json::json!({"name": name, "arguments": arguments}))
                            .send()
                            .await;
                        match result {
                            Ok(response) if response.status().is_success() => {
                                let body: Value =
                                    response.json().await.unwrap_or(Value::Null);
                                let text = match &body["content"] {
                                    Value::String(s) => s.clone(),
                                    other => other.to_string(),
                                };
                                yield Ok(SessionEvent::TextDelta(text));
                            }
                            Ok(response) => {
                                let status = response.status();
                                let body = response.text().await.unwrap_or_default();
                                yield Ok(SessionEvent::Error(format!(
                                    "tool call failed ({status}): {body}"
                                )));
                                return;
                            }
                            Err(e) => {
                                yield Ok(SessionEvent::Error(e.to_string()));
                                return;
                            }
                        }
                    }
                    MockStep::AwaitInput => {
                        match commands.recv().await {
                            Some(SessionCommand::SendInput(text)) => {
                                seen.inputs
                                    .lock()
                                    .expect("seen poisoned")
                                    .push(text.clone());
                                yield Ok(SessionEvent::TextDelta(text));
                            }
                            Some(SessionCommand::Stop) | None => return,
                        }
                    }
                    MockStep::Usage { input_tokens, output_tokens } => {
                        yield Ok(SessionEvent::Usage { input_tokens, output_tokens });
                    }
                    MockStep::Fail(message) => {
                        yield Ok(SessionEvent::Error(message));
                        return;
                    }
                    MockStep::Idle => {
                        yield Ok(SessionEvent::Idle);
                        return;
                    }
                }
            }
        };

        Ok(SessionHandle {
            events: Box::pin(events),
            control,
        })
    }
}

/// Runtime `mock` provider: echoes the prompt back and finishes.  Handy for
/// poking the proxy with curl before the Copilot CLI is set up.
#[derive(Default)]
pub struct EchoSessionProvider;

#[async_trait]
impl SessionProvider for EchoSessionProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn open(&self, _config: SessionConfig, prompt: String) -> anyhow::Result<SessionHandle> {
        let (control, _commands) = SessionControl::channel();
        let events = async_stream::stream! {
            yield Ok(SessionEvent::TextDelta(format!("MOCK: {prompt}")));
            yield Ok(SessionEvent::Usage { input_tokens: 10, output_tokens: 10 });
            yield Ok(SessionEvent::Idle);
        };
        Ok(SessionHandle {
            events: Box::pin(events),
            control,
        })
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    fn bare_config() -> SessionConfig {
        use crate::{HookDecision, InfiniteSessions, PermissionDecision, SessionCallbacks};
        SessionConfig {
            model: "gpt-5-codex".into(),
            system_message: None,
            streaming: true,
            infinite_sessions: InfiniteSessions { enabled: true },
            working_directory: None,
            mcp_servers: Default::default(),
            available_tools: None,
            reasoning_effort: None,
            callbacks: SessionCallbacks {
                on_user_input_request: Arc::new(|_| String::new()),
                on_permission_request: Arc::new(|_| PermissionDecision::Approve),
                on_pre_tool_use: Arc::new(|_| HookDecision::Allow),
            },
        }
    }

    #[tokio::test]
    async fn scripted_provider_replays_steps_in_order() {
        let provider = ScriptedSessionProvider::always_text("hello");
        let mut handle = provider.open(bare_config(), "hi".into()).await.unwrap();
        let first = handle.events.next().await.unwrap().unwrap();
        assert_eq!(first, SessionEvent::TextDelta("hello".into()));
        let second = handle.events.next().await.unwrap().unwrap();
        assert!(matches!(second, SessionEvent::Usage { .. }));
        let third = handle.events.next().await.unwrap().unwrap();
        assert_eq!(third, SessionEvent::Idle);
        assert!(handle.events.next().await.is_none());
    }

    #[tokio::test]
    async fn scripted_provider_records_config_and_prompt() {
        let provider = ScriptedSessionProvider::new(vec![vec![MockStep::Idle]]);
        let _ = provider.open(bare_config(), "the prompt".into()).await.unwrap();
        assert_eq!(provider.seen.prompts.lock().unwrap()[0], "the prompt");
        assert_eq!(provider.seen.configs.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn exhausted_scripts_fall_back_to_idle() {
        let provider = ScriptedSessionProvider::new(vec![]);
        let mut handle = provider.open(bare_config(), "x".into()).await.unwrap();
        assert_eq!(
            handle.events.next().await.unwrap().unwrap(),
            SessionEvent::Idle
        );
    }

    #[tokio::test]
    async fn await_input_echoes_follow_up() {
        let provider = ScriptedSessionProvider::new(vec![vec![
            MockStep::AwaitInput,
            MockStep::Idle,
        ]]);
        let mut handle = provider.open(bare_config(), "x".into()).await.unwrap();
        assert!(handle.control.send_input("follow-up"));
        assert_eq!(
            handle.events.next().await.unwrap().unwrap(),
            SessionEvent::TextDelta("follow-up".into())
        );
        assert_eq!(provider.seen.inputs.lock().unwrap()[0], "follow-up");
    }

    #[tokio::test]
    async fn echo_provider_echoes() {
        let provider = EchoSessionProvider;
        let mut handle = provider.open(bare_config(), "ping".into()).await.unwrap();
        assert_eq!(
            handle.events.next().await.unwrap().unwrap(),
            SessionEvent::TextDelta("MOCK: ping".into())
        );
    }

    #[tokio::test]
    async fn call_bridge_without_bridge_server_errors() {
        let provider = ScriptedSessionProvider::new(vec![vec![MockStep::CallBridge {
            name: "Read".into(),
            arguments: serde_json::json!({}),
        }]]);
        let mut handle = provider.open(bare_config(), "x".into()).await.unwrap();
        match handle.events.next().await.unwrap().unwrap() {
            SessionEvent::Error(message) => assert!(message.contains("xcode-bridge")),
            other => panic!("expected error, got {other:?}"),
        }
    }
}
