// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::mpsc;

use crate::{SessionConfig, SessionEvent};

/// Streaming events from one session.
pub type SessionStream = Pin<Box<dyn Stream<Item = anyhow::Result<SessionEvent>> + Send>>;

/// Factory for sessions.  `copilot` spawns the Copilot CLI; `mock` replays a
/// script.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Provider name for status display.
    fn name(&self) -> &str;

    /// Open a session and send the initial prompt.
    async fn open(&self, config: SessionConfig, prompt: String) -> anyhow::Result<SessionHandle>;
}

/// A live session: the event stream (consumed by the streaming transform)
/// plus a cheap clone-able control handle.
pub struct SessionHandle {
    pub events: SessionStream,
    pub control: SessionControl,
}

/// Commands a running session accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Append a user prompt to the live session (infinite sessions).
    SendInput(String),
    /// Stop the session; the event stream ends shortly after.
    Stop,
}

/// Clone-able command handle for a session.
#[derive(Debug, Clone)]
pub struct SessionControl {
    tx: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionControl {
    /// Build a control handle plus the receiver the session task drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SessionCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Returns `false` when the session is already gone.
    pub fn send_input(&self, text: impl Into<String>) -> bool {
        self.tx.send(SessionCommand::SendInput(text.into())).is_ok()
    }

    pub fn stop(&self) {
        let _ = self.tx.send(SessionCommand::Stop);
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
