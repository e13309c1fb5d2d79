// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! `xcopilot-protocol` — the Anthropic Messages API as Xcode speaks it.
//!
//! Two halves:
//!
//! - [`messages`] — request-side types (`POST /v1/messages` bodies, content
//!   blocks, tool definitions) plus the error envelope and the models list.
//! - [`sse`] — response-side `text/event-stream` frames (`message_start`
//!   through `message_stop`).
//!
//! Everything here is plain serde data; no I/O.

pub mod messages;
pub mod sse;

pub use messages::*;
pub use sse::*;
