// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Process-wide conversation registry and the continuation router.
//!
//! The router answers the one question every `/v1/messages` request poses:
//! is this a brand-new conversation, or Xcode delivering tool results for a
//! session that is still parked on the bridge?  Matching is keyed on the
//! `tool_use_id`s inside the last user message: those ids were minted by
//! the session library and registered in a conversation's expected/pending
//! tables before Xcode ever saw them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::debug;
use uuid::Uuid;

use xcopilot_protocol::Message;
use xcopilot_session::SessionControl;

use crate::conversation::ConversationState;

/// One conversation: bridge state plus the live session's control handle.
pub struct Conversation {
    pub id: String,
    pub state: Arc<ConversationState>,
    control: Mutex<Option<SessionControl>>,
    sent_message_count: AtomicUsize,
}

impl Conversation {
    /// Attach the session's control handle once it has been opened.
    pub fn set_control(&self, control: SessionControl) {
        *self.control.lock().expect("conversation poisoned") = Some(control);
    }

    pub fn control(&self) -> Option<SessionControl> {
        self.control.lock().expect("conversation poisoned").clone()
    }

    /// How many incoming messages have already been formatted into the
    /// session.  Continuations only forward the unseen tail.
    pub fn sent_message_count(&self) -> usize {
        self.sent_message_count.load(Ordering::SeqCst)
    }

    pub fn set_sent_message_count(&self, count: usize) {
        self.sent_message_count.store(count, Ordering::SeqCst);
    }
}

/// Registry of live conversations, insertion-ordered so "first match" scans
/// are deterministic.
pub struct ConversationManager {
    conversations: Mutex<Vec<Arc<Conversation>>>,
}

impl ConversationManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            conversations: Mutex::new(Vec::new()),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Arc<Conversation>>> {
        self.conversations.lock().expect("conversation registry poisoned")
    }

    /// Mint a conversation and register it.  Its state gets a session-end
    /// callback that removes it again, so a finished or cleaned-up session
    /// cannot be routed to.
    pub fn create(self: &Arc<Self>) -> Arc<Conversation> {
        let id = Uuid::new_v4().to_string();
        let state = ConversationState::new();

        let manager: Weak<Self> = Arc::downgrade(self);
        let ended_id = id.clone();
        state.on_session_end(move || {
            if let Some(manager) = manager.upgrade() {
                manager.remove(&ended_id);
            }
        });

        let conversation = Arc::new(Conversation {
            id: id.clone(),
            state,
            control: Mutex::new(None),
            sent_message_count: AtomicUsize::new(0),
        });
        debug!(conversation = %id, "conversation created");
        self.lock().push(Arc::clone(&conversation));
        conversation
    }

    pub fn get(&self, id: &str) -> Option<Arc<Conversation>> {
        self.lock().iter().find(|c| c.id == id).cloned()
    }

    /// Unregister a conversation and run its hard teardown: parked bridge
    /// calls reject with "Session cleanup".  Safe to call from the
    /// session-end callback: the registry lock is released before cleanup
    /// runs, and a second removal of the same id is a no-op.
    pub fn remove(&self, id: &str) -> Option<Arc<Conversation>> {
        let removed = {
            let mut conversations = self.lock();
            let index = conversations.iter().position(|c| c.id == id)?;
            conversations.remove(index)
        };
        debug!(conversation = %id, "conversation removed");
        removed.state.cleanup();
        Some(removed)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// All live conversations, oldest first.
    pub fn all(&self) -> Vec<Arc<Conversation>> {
        self.lock().clone()
    }

    /// The most recently created conversation (the `/internal` routes'
    /// single-conversation fallback).
    pub fn latest(&self) -> Option<Arc<Conversation>> {
        self.lock().last().cloned()
    }

    /// Decide whether `messages` continues an existing conversation.
    ///
    /// 1. The last message must be a `user` message with block content.
    /// 2. Any `tool_use_id` in its `tool_result` blocks that is known to a
    ///    conversation's expected/pending tables picks that conversation.
    /// 3. Failing that, if exactly one conversation has an active session,
    ///    the request is assumed to be an internal retry of that session.
    ///    (With several active sessions guessing would misroute; we decline
    ///    and let the caller open a fresh conversation.)
    pub fn find_by_continuation(&self, messages: &[Message]) -> Option<Arc<Conversation>> {
        let last = messages.last()?;
        if last.role != xcopilot_protocol::Role::User {
            return None;
        }
        let ids = last.tool_result_ids();
        if matches!(last.content, xcopilot_protocol::MessageContent::Text(_)) {
            return None;
        }

        let conversations = self.all();
        for id in &ids {
            if let Some(found) = conversations.iter().find(|c| c.state.contains_call_id(id)) {
                debug!(conversation = %found.id, tool_use_id = %id, "continuation matched by id");
                return Some(Arc::clone(found));
            }
        }

        let mut active = conversations.iter().filter(|c| c.state.session_active());
        match (active.next(), active.next()) {
            (Some(only), None) => {
                debug!(conversation = %only.id, "continuation matched by active session");
                Some(Arc::clone(only))
            }
            _ => None,
        }
    }

    /// First conversation expecting a call for `name` (bridge calls that
    /// arrive on the id-less `/internal` route).
    pub fn find_by_expected_tool(&self, name: &str) -> Option<Arc<Conversation>> {
        self.lock()
            .iter()
            .find(|c| c.state.has_expected_tool(name))
            .cloned()
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
