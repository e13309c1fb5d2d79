// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Workspace-level wiring tests: config → provider registry → session seam
//! → server lifecycle.  The HTTP behaviour itself is covered by the server
//! crate's own integration tests.

use std::io::Write;

use futures::StreamExt;
use xcopilot_config::Config;
use xcopilot_session::{build_session_config, SessionEvent, SessionParams};

fn mock_config() -> Config {
    Config {
        session_provider: "mock".to_string(),
        port: 0,
        ..Config::default()
    }
}

#[test]
fn provider_registry_knows_its_backends() {
    assert_eq!(
        xcopilot_session::provider_for(&mock_config()).unwrap().name(),
        "mock"
    );
    assert_eq!(
        xcopilot_session::provider_for(&Config::default()).unwrap().name(),
        "copilot"
    );
    let bad = Config {
        session_provider: "chatgpt".to_string(),
        ..Config::default()
    };
    assert!(xcopilot_session::provider_for(&bad).is_err());
}

#[tokio::test]
async fn config_file_drives_the_session_seam() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "sessionProvider: mock\nallowedCliTools: [\"grep\"]\nreasoningEffort: high"
    )
    .unwrap();
    let config = xcopilot_config::load(Some(file.path())).unwrap();

    let session_config = build_session_config(SessionParams {
        model: "gpt-5-codex",
        system_message: None,
        config: &config,
        supports_reasoning_effort: true,
        working_directory: None,
        has_tool_bridge: true,
        port: 8123,
        conversation_id: "conv",
    });
    assert!(session_config.bridge_url().is_some());
    assert_eq!(
        session_config.reasoning_effort,
        Some(xcopilot_config::ReasoningEffort::High)
    );

    let provider = xcopilot_session::provider_for(&config).unwrap();
    let mut handle = provider
        .open(session_config, "hello there".to_string())
        .await
        .unwrap();
    let first = handle.events.next().await.unwrap().unwrap();
    assert_eq!(
        first,
        SessionEvent::TextDelta("MOCK: hello there".to_string())
    );
}

#[tokio::test]
async fn serve_shuts_down_cleanly() {
    let config = mock_config();
    let provider = xcopilot_session::provider_for(&config).unwrap();
    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();

    let server = tokio::spawn(xcopilot_server::serve(config, provider, async move {
        let _ = stopped.await;
    }));

    // Give the listener a moment to come up, then pull the plug.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    stop.send(()).unwrap();
    server.await.unwrap().unwrap();
}
