// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! `xcopilot-session` — the seam between the proxy and the session library.
//!
//! The session library is the GitHub Copilot CLI running in `--server` mode:
//! it owns the model conversation, runs tools through the MCP servers it is
//! configured with, and streams events back.  This crate defines the
//! interface the rest of xcopilot programs against:
//!
//! - [`SessionEvent`] — the event vocabulary the streaming transform consumes.
//! - [`SessionConfig`] / [`build_session_config`] — what a session is opened
//!   with, including the synthetic `xcode-bridge` MCP server that routes tool
//!   execution back through the proxy.
//! - [`SessionProvider`] — the factory trait, with two implementations:
//!   [`copilot::CopilotCliProvider`] (the real thing) and the deterministic
//!   providers in [`mock`] for tests and development.

pub mod builder;
pub mod catalog;
pub mod config;
pub mod copilot;
pub mod event;
pub mod mock;
pub mod provider;

pub use builder::{build_session_config, SessionParams};
pub use catalog::{lookup_model, model_catalog, ModelCatalogEntry};
pub use config::{
    HookDecision, InfiniteSessions, McpServerConfig, PermissionDecision, PermissionRequest,
    SessionCallbacks, SessionConfig,
};
pub use event::SessionEvent;
pub use provider::{
    SessionCommand, SessionControl, SessionHandle, SessionProvider, SessionStream,
};

use std::sync::Arc;

/// Build the session provider named by the config (`copilot` or `mock`).
pub fn provider_for(config: &xcopilot_config::Config) -> anyhow::Result<Arc<dyn SessionProvider>> {
    match config.session_provider.as_str() {
        "copilot" => Ok(Arc::new(copilot::CopilotCliProvider::default())),
        "mock" => Ok(Arc::new(mock::EchoSessionProvider::default())),
        other => anyhow::bail!("unknown session provider {other:?} (expected copilot or mock)"),
    }
}
