// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Copilot CLI session provider.
//!
//! Spawns `copilot --server`, waits for its `CLI server listening on port N`
//! announcement, then speaks JSON-RPC over TCP with LSP-style
//! `Content-Length` framing:
//!
//! ```text
//! xcopilot ──► session.create {model, mcpServers, …}   ──► sessionId
//!          ──► session.send   {sessionId, prompt}
//!          ◄── session.event  {assistant.message_delta | assistant.tool_use
//!                              | session.turn_paused | session.usage
//!                              | session.idle | session.error}
//!          ◄── permission.request / userInput.request / hook.preToolUse
//!          ──►   (answered from the SessionConfig callbacks)
//! ```
//!
//! Tool execution never passes through here: the CLI calls the MCP servers
//! it was configured with, including the proxy's own `xcode-bridge` server.

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

use crate::{
    HookDecision, PermissionDecision, PermissionRequest, SessionCommand, SessionConfig,
    SessionControl, SessionEvent, SessionHandle, SessionProvider,
};

static REQUEST_ID: AtomicU64 = AtomicU64::new(1);

fn next_request_id() -> u64 {
    REQUEST_ID.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Copilot CLI is not authenticated: run `copilot auth login` first")]
    Unauthenticated,
    #[error("could not spawn {0}: {1}")]
    Spawn(String, std::io::Error),
    #[error("Copilot CLI exited without announcing its port")]
    NoPortAnnouncement,
    #[error("session library transport closed")]
    TransportClosed,
    #[error("session.create failed ({code}): {message}")]
    CreateFailed { code: i64, message: String },
}

/// Session provider backed by the Copilot CLI in `--server` mode.
pub struct CopilotCliProvider {
    command: String,
}

impl Default for CopilotCliProvider {
    fn default() -> Self {
        Self {
            command: "copilot".to_string(),
        }
    }
}

impl CopilotCliProvider {
    /// Use a custom executable (tests point this at a fake).
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl SessionProvider for CopilotCliProvider {
    fn name(&self) -> &str {
        "copilot"
    }

    async fn open(&self, config: SessionConfig, prompt: String) -> anyhow::Result<SessionHandle> {
        let mut transport = CliTransport::spawn(&self.command).await?;

        // session.create is the one call we wait out synchronously, because
        // its failure modes (bad model, unauthenticated CLI) must surface on
        // the originating HTTP request.
        let create_id = next_request_id();
        transport
            .send(&request(create_id, "session.create", config.wire_params()))
            .await?;
        let response = transport.read_response(create_id).await?;
        if let Some(error) = response.get("error") {
            let code = error["code"].as_i64().unwrap_or(0);
            let message = error["message"].as_str().unwrap_or("unknown").to_string();
            if message.to_ascii_lowercase().contains("not authenticated") {
                return Err(SessionError::Unauthenticated.into());
            }
            return Err(SessionError::CreateFailed { code, message }.into());
        }
        let session_id = response["result"]["sessionId"]
            .as_str()
            .ok_or(SessionError::TransportClosed)?
            .to_string();
        info!(session_id = %session_id, model = %config.model, "copilot session created");

        transport
            .send(&request(
                next_request_id(),
                "session.send",
                json!({"sessionId": session_id, "prompt": prompt}),
            ))
            .await?;

        let (control, command_rx) = SessionControl::channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        tokio::spawn(event_loop(
            transport, config, session_id, command_rx, event_tx,
        ));

        Ok(SessionHandle {
            events: UnboundedReceiverStream::new(event_rx).map(Ok).boxed(),
            control,
        })
    }
}

fn request(id: u64, method: &str, params: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params})
}

// ─── Event loop ───────────────────────────────────────────────────────────────

enum Flow {
    Continue,
    End,
}

async fn event_loop(
    transport: CliTransport,
    config: SessionConfig,
    session_id: String,
    mut commands: mpsc::UnboundedReceiver<SessionCommand>,
    events: mpsc::UnboundedSender<SessionEvent>,
) {
    let CliTransport {
        mut child,
        mut reader,
        mut writer,
    } = transport;

    // Dedicated reader task: frame reads are not cancel-safe, so they never
    // race the command channel inside a select.
    let (message_tx, mut messages) = mpsc::unbounded_channel::<anyhow::Result<Value>>();
    let reader_task = tokio::spawn(async move {
        loop {
            match read_frame(&mut reader).await {
                Ok(Some(message)) => {
                    if message_tx.send(Ok(message)).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let _ = message_tx.send(Err(e));
                    break;
                }
            }
        }
    });

    let mut saw_terminal = false;
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(SessionCommand::SendInput(text)) => {
                    let send = request(
                        next_request_id(),
                        "session.send",
                        json!({"sessionId": session_id, "prompt": text}),
                    );
                    if write_frame(&mut writer, &send).await.is_err() {
                        let _ = events.send(SessionEvent::Error(
                            SessionError::TransportClosed.to_string(),
                        ));
                        break;
                    }
                }
                Some(SessionCommand::Stop) | None => {
                    let stop = request(
                        next_request_id(),
                        "session.stop",
                        json!({"sessionId": session_id}),
                    );
                    let _ = write_frame(&mut writer, &stop).await;
                    break;
                }
            },
            message = messages.recv() => match message {
                Some(Ok(value)) => {
                    match handle_message(&mut writer, &config, &session_id, &value, &events).await {
                        Flow::Continue => {}
                        Flow::End => {
                            saw_terminal = true;
                            break;
                        }
                    }
                }
                Some(Err(e)) => {
                    let _ = events.send(SessionEvent::Error(e.to_string()));
                    break;
                }
                None => {
                    if !saw_terminal {
                        let _ = events.send(SessionEvent::Error(
                            SessionError::TransportClosed.to_string(),
                        ));
                    }
                    break;
                }
            },
        }
    }
    reader_task.abort();
    let _ = child.kill().await;
}

async fn handle_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    config: &SessionConfig,
    session_id: &str,
    message: &Value,
    events: &mpsc::UnboundedSender<SessionEvent>,
) -> Flow {
    match classify(message) {
        MessageKind::Notification => {
            if message["method"] != "session.event" {
                return Flow::Continue;
            }
            let params = &message["params"];
            if params["sessionId"] != session_id {
                return Flow::Continue;
            }
            match map_session_event(&params["event"]) {
                Some(event) => {
                    let terminal =
                        matches!(event, SessionEvent::Idle | SessionEvent::Error(_));
                    let _ = events.send(event);
                    if terminal {
                        Flow::End
                    } else {
                        Flow::Continue
                    }
                }
                None => {
                    debug!(event = %params["event"]["type"], "ignoring unknown session event");
                    Flow::Continue
                }
            }
        }
        MessageKind::IncomingRequest { id } => {
            let reply = match answer_request(config, message) {
                Value::Null => json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {
                        "code": -32601,
                        "message": format!("method not found: {}", message["method"]),
                    },
                }),
                result => json!({"jsonrpc": "2.0", "id": id, "result": result}),
            };
            if write_frame(writer, &reply).await.is_err() {
                let _ = events.send(SessionEvent::Error(
                    SessionError::TransportClosed.to_string(),
                ));
                return Flow::End;
            }
            Flow::Continue
        }
        MessageKind::Response => Flow::Continue,
    }
}

/// Answer one of the session library's inbound callbacks.
fn answer_request(config: &SessionConfig, message: &Value) -> Value {
    let params = &message["params"];
    match message["method"].as_str().unwrap_or("") {
        "permission.request" => {
            let permission = PermissionRequest {
                kind: params["kind"].as_str().unwrap_or("").to_string(),
                detail: params["detail"].as_str().map(str::to_string),
            };
            let approved = matches!(
                (config.callbacks.on_permission_request)(&permission),
                PermissionDecision::Approve
            );
            json!({"approved": approved})
        }
        "userInput.request" => {
            let prompt = params["prompt"].as_str().unwrap_or("");
            json!({"text": (config.callbacks.on_user_input_request)(prompt)})
        }
        "hook.preToolUse" => {
            let tool = params["toolName"].as_str().unwrap_or("");
            let decision = match (config.callbacks.on_pre_tool_use)(tool) {
                HookDecision::Allow => "allow",
                HookDecision::Deny => "deny",
            };
            json!({"decision": decision})
        }
        other => {
            warn!(method = other, "unknown request from session library");
            Value::Null
        }
    }
}

// ─── Message classification & mapping ─────────────────────────────────────────

/// Classification of an incoming JSON-RPC message by shape.
#[derive(Debug, PartialEq, Eq)]
enum MessageKind {
    /// A response to a request we sent (has `id`, no `method`).
    Response,
    /// An incoming request from the CLI (has `id` + `method`).
    IncomingRequest { id: u64 },
    /// A notification (has `method`, no `id`).
    Notification,
}

fn classify(message: &Value) -> MessageKind {
    let id = message.get("id").and_then(Value::as_u64);
    let method = message.get("method").and_then(Value::as_str);
    match (id, method) {
        (Some(id), Some(_)) => MessageKind::IncomingRequest { id },
        (Some(_), None) => MessageKind::Response,
        _ => MessageKind::Notification,
    }
}

/// Map one `session.event` payload to a [`SessionEvent`].
fn map_session_event(event: &Value) -> Option<SessionEvent> {
    match event["type"].as_str()? {
        "assistant.message_delta" => Some(SessionEvent::TextDelta(
            event["text"].as_str().unwrap_or("").to_string(),
        )),
        "assistant.tool_use" => Some(SessionEvent::ToolUse {
            id: event["toolCallId"].as_str()?.to_string(),
            name: event["toolName"].as_str()?.to_string(),
            input: event.get("arguments").cloned().unwrap_or(json!({})),
        }),
        "session.turn_paused" => Some(SessionEvent::TurnPaused),
        "session.usage" => Some(SessionEvent::Usage {
            input_tokens: event["inputTokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: event["outputTokens"].as_u64().unwrap_or(0) as u32,
        }),
        "session.idle" => Some(SessionEvent::Idle),
        "session.error" => Some(SessionEvent::Error(
            event["message"].as_str().unwrap_or("session error").to_string(),
        )),
        _ => None,
    }
}

// ─── Transport ────────────────────────────────────────────────────────────────

/// The spawned CLI plus its TCP connection.
struct CliTransport {
    child: Child,
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
}

impl CliTransport {
    /// Spawn `<command> --server`, parse the port announcement, connect.
    async fn spawn(command: &str) -> Result<Self, SessionError> {
        debug!(command, "spawning Copilot CLI");
        let mut child = Command::new(command)
            .arg("--server")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SessionError::Spawn(command.to_string(), e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or(SessionError::NoPortAnnouncement)?;
        let mut lines = BufReader::new(stdout).lines();
        let port: u16 = loop {
            let Ok(Some(line)) = lines.next_line().await else {
                return Err(SessionError::NoPortAnnouncement);
            };
            debug!(line = %line.trim(), "copilot cli output");
            if let Some(port) = line.trim().strip_prefix("CLI server listening on port ") {
                match port.trim().parse() {
                    Ok(p) => break p,
                    Err(_) => return Err(SessionError::NoPortAnnouncement),
                }
            }
        };

        info!(port, "connecting to Copilot CLI");
        let stream = TcpStream::connect(("127.0.0.1", port))
            .await
            .map_err(|_| SessionError::TransportClosed)?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            child,
            reader: BufReader::new(read_half),
            writer: write_half,
        })
    }

    async fn send(&mut self, message: &Value) -> anyhow::Result<()> {
        write_frame(&mut self.writer, message).await
    }

    async fn read_message(&mut self) -> anyhow::Result<Option<Value>> {
        read_frame(&mut self.reader).await
    }

    /// Read until the response for `id` arrives, dropping anything else.
    /// Only used during session setup, before the event loop starts.
    async fn read_response(&mut self, id: u64) -> anyhow::Result<Value> {
        loop {
            match self.read_message().await? {
                Some(message) if message.get("id").and_then(Value::as_u64) == Some(id) => {
                    return Ok(message);
                }
                Some(_) => continue,
                None => return Err(SessionError::TransportClosed.into()),
            }
        }
    }
}

/// Write one `Content-Length`-framed JSON message.
async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, message: &Value) -> anyhow::Result<()> {
    let body = serde_json::to_string(message)?;
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(body.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one `Content-Length`-framed JSON message; `None` on clean EOF.
async fn read_frame<R: AsyncBufRead + Unpin>(reader: &mut R) -> anyhow::Result<Option<Value>> {
    let mut line = String::new();
    let content_length: usize = loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(length) = trimmed.strip_prefix("Content-Length:") {
            if let Ok(length) = length.trim().parse() {
                break length;
            }
        }
        debug!(line = trimmed, "skipping non-header line");
    };

    // Skip the blank line terminating the headers.
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        if line.trim().is_empty() {
            break;
        }
    }

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).await?;
    Ok(Some(serde_json::from_slice(&body)?))
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
