// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Per-conversation tool-bridge state.
//!
//! One [`ConversationState`] spans a new-session request and all its
//! continuations.  A single mutex guards the whole interior (three
//! interlocking maps plus lifecycle flags); contention is at most a handful
//! of requests per conversation.  Bridge endpoints hold the lock only for
//! [`register_mcp_request`](ConversationState::register_mcp_request) itself
//! and await the returned receiver outside it.
//!
//! Invariants upheld here:
//!
//! 1. Every pending call id was popped from an expected queue of this same
//!    state; an id is never in both tables at once.
//! 2. Each pending call resolves or rejects exactly once, and its timeout
//!    task is aborted on both paths.
//! 3. `session_active == false` implies both tables are empty; the
//!    inactivation transition rejects all pending with a sentinel cause.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use xcopilot_protocol::{SseFrame, ToolDefinition};

use crate::catalog::ToolCatalog;

/// How long a parked MCP tool call waits for Xcode's tool result.
pub const TOOL_CALL_TIMEOUT: Duration = Duration::from_secs(300);

/// Why a parked tool call was rejected.  The `Display` strings are load-
/// bearing: they travel through the shim's HTTP error body back into the
/// session library.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolCallError {
    #[error("No expected tool call for {0}")]
    NoExpectedCall(String),
    #[error("Tool call {0} timed out")]
    TimedOut(String),
    #[error("Session ended")]
    SessionEnded,
    #[error("Session cleanup")]
    SessionCleanup,
}

/// Result delivered to a parked bridge call.
pub type ToolCallOutcome = Result<Value, ToolCallError>;

struct PendingCall {
    tx: oneshot::Sender<ToolCallOutcome>,
    timeout: JoinHandle<()>,
}

struct Reply {
    tx: mpsc::UnboundedSender<SseFrame>,
    generation: u64,
}

#[derive(Default)]
struct Inner {
    catalog: ToolCatalog,
    expected_by_name: HashMap<String, VecDeque<String>>,
    pending_by_call_id: HashMap<String, PendingCall>,
    reply: Option<Reply>,
    reply_generation: u64,
    streaming_done: Option<oneshot::Sender<()>>,
    session_end: Option<Box<dyn FnOnce() + Send>>,
    session_active: bool,
    had_error: bool,
}

/// The central per-conversation entity.  Cheap to share: every operation
/// goes through the interior mutex.
pub struct ConversationState {
    inner: Mutex<Inner>,
    /// Back-reference for the timeout tasks; a dead `Weak` just means the
    /// conversation is already gone and the timeout has nothing to do.
    weak: Weak<ConversationState>,
}

impl ConversationState {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            inner: Mutex::new(Inner::default()),
            weak: weak.clone(),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Lock poisoning only happens after a panic elsewhere; propagating
        // it as another panic here loses nothing.
        self.inner.lock().expect("conversation state poisoned")
    }

    // ── Tool catalog ──────────────────────────────────────────────────────────

    /// Replace the cached tool catalog (done wholesale on each request).
    pub fn cache_tools(&self, tools: Vec<ToolDefinition>) {
        self.lock().catalog.cache(tools);
    }

    pub fn tools(&self) -> Vec<ToolDefinition> {
        self.lock().catalog.get().to_vec()
    }

    pub fn resolve_tool_name(&self, name: &str) -> String {
        self.lock().catalog.resolve_name(name)
    }

    pub fn normalize_args(&self, tool_name: &str, args: Value) -> Value {
        self.lock().catalog.normalize_args(tool_name, args)
    }

    // ── Expected / pending tables ─────────────────────────────────────────────

    /// Append `call_id` to the expected queue for `tool_name`.  Called by the
    /// streaming transform strictly before the `tool_use` block is emitted.
    pub fn register_expected(&self, call_id: impl Into<String>, tool_name: impl Into<String>) {
        let call_id = call_id.into();
        let tool_name = tool_name.into();
        debug!(call_id = %call_id, tool = %tool_name, "expecting tool call");
        self.lock()
            .expected_by_name
            .entry(tool_name)
            .or_default()
            .push_back(call_id);
    }

    /// Park an MCP tool call: pop the head of the expected queue for `name`,
    /// arm the timeout, and hand back the receiver the caller awaits
    /// **outside** any lock.
    pub fn register_mcp_request(
        &self,
        name: &str,
    ) -> Result<oneshot::Receiver<ToolCallOutcome>, ToolCallError> {
        let mut inner = self.lock();
        let call_id = inner
            .expected_by_name
            .get_mut(name)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| ToolCallError::NoExpectedCall(name.to_string()))?;

        let (tx, rx) = oneshot::channel();
        let state = self.weak.clone();
        let timed_out_id = call_id.clone();
        let timeout = tokio::spawn(async move {
            tokio::time::sleep(TOOL_CALL_TIMEOUT).await;
            let Some(state) = state.upgrade() else {
                return;
            };
            if state.fail_pending(&timed_out_id, ToolCallError::TimedOut(timed_out_id.clone())) {
                warn!(call_id = %timed_out_id, "tool call timed out");
            }
        });

        debug!(call_id = %call_id, tool = %name, "MCP request parked");
        inner
            .pending_by_call_id
            .insert(call_id, PendingCall { tx, timeout });
        Ok(rx)
    }

    /// Deliver a tool result to a parked call.  Returns `false` when the id
    /// is unknown (already resolved, timed out, or never registered).
    pub fn resolve_tool_call(&self, call_id: &str, result: Value) -> bool {
        let Some(pending) = self.lock().pending_by_call_id.remove(call_id) else {
            return false;
        };
        pending.timeout.abort();
        debug!(call_id = %call_id, "tool call resolved");
        let _ = pending.tx.send(Ok(result));
        true
    }

    /// Reject a single parked call.  Used by the timeout task.
    fn fail_pending(&self, call_id: &str, cause: ToolCallError) -> bool {
        let Some(pending) = self.lock().pending_by_call_id.remove(call_id) else {
            return false;
        };
        pending.timeout.abort();
        let _ = pending.tx.send(Err(cause));
        true
    }

    /// True iff any call is parked or expected.
    pub fn has_pending(&self) -> bool {
        let inner = self.lock();
        !inner.pending_by_call_id.is_empty()
            || inner.expected_by_name.values().any(|q| !q.is_empty())
    }

    pub fn has_expected_tool(&self, name: &str) -> bool {
        self.lock()
            .expected_by_name
            .get(name)
            .is_some_and(|q| !q.is_empty())
    }

    /// Whether `call_id` is known to this state, parked or still expected.
    /// The continuation router keys on this.
    pub fn contains_call_id(&self, call_id: &str) -> bool {
        let inner = self.lock();
        inner.pending_by_call_id.contains_key(call_id)
            || inner
                .expected_by_name
                .values()
                .any(|q| q.iter().any(|id| id == call_id))
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    pub fn mark_session_active(&self) {
        self.lock().session_active = true;
    }

    /// Flip to inactive: clear expected queues, reject all parked calls with
    /// "Session ended", fire (and clear) the session-end callback.
    pub fn mark_session_inactive(&self) {
        self.deactivate(ToolCallError::SessionEnded);
    }

    /// Hard teardown (client disconnect, manager removal): like inactivation
    /// but with the "Session cleanup" cause, and it also detaches the reply
    /// and releases any streaming-done waiter.
    pub fn cleanup(&self) {
        self.clear_reply();
        self.deactivate(ToolCallError::SessionCleanup);
        self.notify_streaming_done();
    }

    fn deactivate(&self, cause: ToolCallError) {
        let (drained, callback) = {
            let mut inner = self.lock();
            inner.session_active = false;
            inner.expected_by_name.clear();
            let drained: Vec<PendingCall> =
                inner.pending_by_call_id.drain().map(|(_, p)| p).collect();
            (drained, inner.session_end.take())
        };
        for pending in drained {
            pending.timeout.abort();
            let _ = pending.tx.send(Err(cause.clone()));
        }
        if let Some(callback) = callback {
            callback();
        }
    }

    pub fn session_active(&self) -> bool {
        self.lock().session_active
    }

    /// Install the single-shot notifier the manager uses for auto-removal.
    pub fn on_session_end(&self, callback: impl FnOnce() + Send + 'static) {
        self.lock().session_end = Some(Box::new(callback));
    }

    pub fn set_had_error(&self) {
        self.lock().had_error = true;
    }

    pub fn had_error(&self) -> bool {
        self.lock().had_error
    }

    // ── Streaming-done rendezvous ─────────────────────────────────────────────

    /// Arm the single-shot rendezvous and return the receiver to await.
    /// A second call replaces an unfired slot.
    pub fn wait_for_streaming_done(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.lock().streaming_done = Some(tx);
        rx
    }

    /// Fire the rendezvous.  No-op when no waiter is armed.
    pub fn notify_streaming_done(&self) {
        if let Some(tx) = self.lock().streaming_done.take() {
            let _ = tx.send(());
        }
    }

    // ── Reply attachment ──────────────────────────────────────────────────────

    /// Attach the SSE sink of the currently-open HTTP response.  Returns a
    /// generation token; a later [`Self::cleanup_if_current`] with a stale
    /// token is a no-op, so an abandoned response can never tear down the
    /// conversation its successor is using.
    pub fn set_reply(&self, tx: mpsc::UnboundedSender<SseFrame>) -> u64 {
        let mut inner = self.lock();
        inner.reply_generation += 1;
        let generation = inner.reply_generation;
        inner.reply = Some(Reply { tx, generation });
        generation
    }

    pub fn clear_reply(&self) {
        self.lock().reply = None;
    }

    pub fn has_reply(&self) -> bool {
        self.lock().reply.is_some()
    }

    /// Write one frame to the attached reply.  Returns `false` when no reply
    /// is attached or the client has gone away.
    pub fn send_frame(&self, frame: SseFrame) -> bool {
        match &self.lock().reply {
            Some(reply) => reply.tx.send(frame).is_ok(),
            None => false,
        }
    }

    /// Run [`Self::cleanup`] only if `generation` still names the attached
    /// reply.  Called from the response-body disconnect guard.
    pub fn cleanup_if_current(&self, generation: u64) {
        let is_current = matches!(
            &self.lock().reply,
            Some(reply) if reply.generation == generation
        );
        if is_current {
            self.cleanup();
        }
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
