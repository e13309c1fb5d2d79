// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! SSE response plumbing.
//!
//! A reply is an unbounded channel: the streaming transform writes
//! [`SseFrame`]s through the conversation state, the response body drains
//! them.  The body is wrapped in a disconnect guard: if Xcode drops the
//! connection while this reply is still the conversation's current one, the
//! guard runs `cleanup()` (rejecting parked tool calls with "Session
//! cleanup" and removing the conversation).  A body that ends normally
//! disarms the guard first.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::{Body, Bytes};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use futures::Stream;
use tokio::sync::mpsc;

use xcopilot_bridge::Conversation;
use xcopilot_protocol::SseFrame;

/// Cleans up the conversation when dropped before [`ReplyGuard::disarm`].
pub struct ReplyGuard {
    conversation: Arc<Conversation>,
    generation: u64,
    disarmed: bool,
}

impl ReplyGuard {
    pub fn new(conversation: Arc<Conversation>, generation: u64) -> Self {
        Self {
            conversation,
            generation,
            disarmed: false,
        }
    }

    fn disarm(&mut self) {
        self.disarmed = true;
    }
}

impl Drop for ReplyGuard {
    fn drop(&mut self) {
        if !self.disarmed {
            tracing::debug!(conversation = %self.conversation.id, "client disconnected mid-reply");
            self.conversation.state.cleanup_if_current(self.generation);
        }
    }
}

/// Body stream: frames until the transform detaches the reply.
struct SseBody {
    rx: mpsc::UnboundedReceiver<SseFrame>,
    guard: ReplyGuard,
}

impl Stream for SseBody {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(frame)) => Poll::Ready(Some(Ok(Bytes::from(frame.to_wire())))),
            Poll::Ready(None) => {
                // The sender is gone: the transform ended this reply.  That is
                // the normal completion path, not a disconnect.
                this.guard.disarm();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Assemble the streaming response with the SSE headers Xcode expects.
pub fn sse_response(rx: mpsc::UnboundedReceiver<SseFrame>, guard: ReplyGuard) -> Response {
    use axum::http::HeaderValue;
    let mut response = Body::from_stream(SseBody { rx, guard }).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert("X-Accel-Buffering", HeaderValue::from_static("no"));
    response
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
