// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};

#[derive(Parser, Debug)]
#[command(
    name = "xcopilot",
    version,
    about = "Local proxy that connects Xcode's AI assistant to a Copilot-backed model",
    long_about = "xcopilot listens on loopback and translates Xcode's Anthropic-style \
                  messages API into Copilot CLI sessions.  Tool calls the model makes are \
                  routed back to Xcode through an MCP bridge, so Xcode keeps executing \
                  its own tools."
)]
pub struct Cli {
    /// Explicit config file, merged over the discovered layers
    /// (/etc/xcopilot, ~/.config/xcopilot, workspace-local).
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Verbose logging to stderr (XCOPILOT_LOG overrides).
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the proxy (the default when no subcommand is given).
    Serve {
        /// Override the configured listen port.
        #[arg(long, short = 'p')]
        port: Option<u16>,
    },

    /// Run the MCP passthrough shim on stdio.
    ///
    /// The session library spawns this as a child process; it forwards
    /// `tools/list` and `tools/call` to the proxy's tool bridge over HTTP.
    McpShim {
        /// Bridge port (normally provided by the session library).
        #[arg(long, env = "MCP_SERVER_PORT")]
        port: Option<u16>,
        /// Conversation id for the per-conversation bridge routes; without
        /// it the shim uses the single-conversation /internal routes.
        #[arg(long, env = "MCP_CONVERSATION_ID")]
        conversation: Option<String>,
    },

    /// Wrap `xcrun mcpbridge`, injecting structuredContent into tool
    /// results that lack it.
    McpbridgeShim {
        /// Executable to wrap.
        #[arg(long, default_value = "xcrun")]
        command: String,
        /// Arguments for the wrapped executable.
        #[arg(default_values_t = vec!["mcpbridge".to_string()])]
        args: Vec<String>,
    },

    /// Print the merged configuration and exit.
    ShowConfig,

    /// Generate shell completions.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

pub fn print_completions(shell: Shell) {
    generate(shell, &mut Cli::command(), "xcopilot", &mut std::io::stdout());
}

// ─── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_defaults() {
        let cli = Cli::parse_from(["xcopilot"]);
        assert!(cli.command.is_none());
        assert!(!cli.verbose);
    }

    #[test]
    fn serve_port_override_parses() {
        let cli = Cli::parse_from(["xcopilot", "serve", "--port", "9000"]);
        match cli.command {
            Some(Commands::Serve { port }) => assert_eq!(port, Some(9000)),
            other => panic!("expected serve, got {other:?}"),
        }
    }

    #[test]
    fn mcpbridge_shim_defaults_to_xcrun() {
        let cli = Cli::parse_from(["xcopilot", "mcpbridge-shim"]);
        match cli.command {
            Some(Commands::McpbridgeShim { command, args }) => {
                assert_eq!(command, "xcrun");
                assert_eq!(args, vec!["mcpbridge".to_string()]);
            }
            other => panic!("expected mcpbridge-shim, got {other:?}"),
        }
    }
}
