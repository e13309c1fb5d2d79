// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};

fn main() -> std::process::ExitCode {
    match run() {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("xcopilot: {e:#}");
            std::process::ExitCode::FAILURE
        }
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let runtime = tokio::runtime::Runtime::new().context("starting tokio runtime")?;
    runtime.block_on(async {
        match cli.command {
            Some(Commands::McpShim { port, conversation }) => {
                run_mcp_shim(port, conversation).await
            }
            Some(Commands::McpbridgeShim { command, args }) => {
                xcopilot_shim::mcpbridge::run(&command, &args).await
            }
            Some(Commands::Completions { shell }) => {
                cli::print_completions(shell);
                Ok(())
            }
            Some(Commands::ShowConfig) => {
                let config = xcopilot_config::load(cli.config.as_deref())?;
                println!("{}", serde_yaml::to_string(&config)?);
                Ok(())
            }
            Some(Commands::Serve { port }) => run_serve(cli.config.as_deref(), port).await,
            None => run_serve(cli.config.as_deref(), None).await,
        }
    })
}

// ── Serve ─────────────────────────────────────────────────────────────────────

async fn run_serve(config_path: Option<&std::path::Path>, port: Option<u16>) -> anyhow::Result<()> {
    let mut config = xcopilot_config::load(config_path)?;
    if let Some(port) = port {
        config.port = port;
    }
    let provider = xcopilot_session::provider_for(&config)?;
    xcopilot_server::serve(config, provider, shutdown_signal()).await
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(_) => {
                ctrl_c.await;
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate.recv() => {},
        }
    }
    #[cfg(not(unix))]
    ctrl_c.await;
}

// ── Shims ─────────────────────────────────────────────────────────────────────

async fn run_mcp_shim(port: Option<u16>, conversation: Option<String>) -> anyhow::Result<()> {
    let shim = match port {
        Some(port) => {
            let url = match conversation {
                Some(conversation) => format!("http://127.0.0.1:{port}/mcp/{conversation}"),
                None => format!("http://127.0.0.1:{port}/internal"),
            };
            xcopilot_shim::PassthroughShim::new(url)
        }
        None => xcopilot_shim::PassthroughShim::from_env()
            .context("mcp-shim needs --port or MCP_SERVER_PORT")?,
    };
    xcopilot_shim::serve_stdio(shim).await
}

// ── Logging ───────────────────────────────────────────────────────────────────

/// Logs go to stderr: stdout belongs to the shims' JSON-RPC streams.
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env("XCOPILOT_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}
