// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! `xcopilot-server` — the HTTP face of the proxy.
//!
//! ```text
//! Xcode ──► POST /v1/messages ──► messages handler ──► session ──► transform ──► SSE
//!   ▲                                     │ tool_use registered
//!   │ executes tool locally               ▼
//!   └──◄── tool_use block ◄── streaming transform
//!   │
//!   └──► POST /v1/messages (tool_result) ──► resolve parked bridge call
//!
//! shim  ──► GET  /mcp/:conv/tools      ──► cached catalog
//!       ──► POST /mcp/:conv/tool-call  ──► parks until the tool_result lands
//! ```
//!
//! `/v1/*` routes are Xcode-only (user-agent check); `/mcp/*` and
//! `/internal/*` serve the MCP shim.  Everything binds to loopback.

pub mod guard;
pub mod redact;
pub mod reply;
pub mod routes;
pub mod state;
pub mod stream;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{info, warn};

pub use state::{AppContext, SharedContext};

/// Build the full router.
pub fn app(ctx: SharedContext) -> Router {
    let api = Router::new()
        .route("/v1/messages", post(routes::messages::handle))
        .route("/v1/models", get(routes::models::list))
        .layer(middleware::from_fn(guard::require_xcode_user_agent));

    let bridge = Router::new()
        .route("/mcp/:conversation_id/tools", get(routes::bridge::tools))
        .route(
            "/mcp/:conversation_id/tool-call",
            post(routes::bridge::tool_call),
        )
        .route("/internal/tools", get(routes::bridge::tools_global))
        .route("/internal/tool-call", post(routes::bridge::tool_call_global));

    Router::new()
        .merge(api)
        .merge(bridge)
        .layer(RequestBodyLimitLayer::new(ctx.config.body_limit))
        .with_state(ctx)
}

/// Bind the configured loopback port and serve until `shutdown` resolves,
/// then stop outstanding sessions (3-second cap).
pub async fn serve(
    config: xcopilot_config::Config,
    provider: Arc<dyn xcopilot_session::SessionProvider>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", config.port)).await?;
    let port = listener.local_addr()?.port();
    let ctx = AppContext::new(config, provider, port);

    info!(port, provider = ctx.provider.name(), "xcopilot listening");
    axum::serve(listener, app(Arc::clone(&ctx)))
        .with_graceful_shutdown(shutdown)
        .await?;

    stop_sessions(&ctx).await;
    Ok(())
}

/// Best-effort session teardown after the listener has closed.
async fn stop_sessions(ctx: &SharedContext) {
    let conversations = ctx.manager.all();
    if conversations.is_empty() {
        return;
    }
    info!(count = conversations.len(), "stopping outstanding sessions");
    let waiters: Vec<_> = conversations
        .iter()
        .map(|c| c.state.wait_for_streaming_done())
        .collect();
    for conversation in &conversations {
        if let Some(control) = conversation.control() {
            control.stop();
        }
    }
    let drain = async {
        for waiter in waiters {
            let _ = waiter.await;
        }
    };
    if tokio::time::timeout(Duration::from_secs(3), drain).await.is_err() {
        warn!("session teardown exceeded 3s, shutting down anyway");
        for conversation in conversations {
            conversation.state.cleanup();
        }
    }
}
