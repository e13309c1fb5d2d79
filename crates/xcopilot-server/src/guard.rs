// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! User-agent guard for the `/v1/*` routes.
//!
//! The proxy is loopback-only; the only client it is written for is Xcode,
//! which always identifies as `Xcode/<version>`.  Everything else gets a
//! `403 {"error":"Forbidden"}` so a stray local process cannot burn through
//! the user's Copilot quota.

use axum::extract::Request;
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use tracing::warn;

pub async fn require_xcode_user_agent(request: Request, next: Next) -> Response {
    let agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if is_xcode(agent) {
        next.run(request).await
    } else {
        warn!(user_agent = agent, path = %request.uri().path(), "rejected non-Xcode client");
        (StatusCode::FORBIDDEN, Json(json!({"error": "Forbidden"}))).into_response()
    }
}

fn is_xcode(user_agent: &str) -> bool {
    user_agent.starts_with("Xcode/")
}

// ─── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xcode_agents_pass() {
        assert!(is_xcode("Xcode/16.0"));
        assert!(is_xcode("Xcode/26.1 (macOS)"));
    }

    #[test]
    fn other_agents_fail() {
        assert!(!is_xcode("curl/8.0"));
        assert!(!is_xcode("xcode/16.0"));
        assert!(!is_xcode(""));
    }
}
