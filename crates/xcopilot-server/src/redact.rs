// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Code-fence redaction and prompt formatting.
//!
//! Xcode pastes whole files into fenced code blocks, info line first
//! (` ```swift Sources/App/Secrets.swift `).  `excludedFilePatterns` are
//! regex fragments matched against that info line; matching fences are
//! dropped from the prompt before it reaches the model.

use regex::Regex;
use tracing::warn;

use xcopilot_protocol::{Message, Role};

/// Compiled `excludedFilePatterns`.
pub struct Redactor {
    patterns: Vec<Regex>,
}

impl Redactor {
    /// Compile the configured fragments; invalid ones are logged and skipped
    /// rather than failing startup.
    pub fn new(fragments: &[String]) -> Self {
        let patterns = fragments
            .iter()
            .filter_map(|fragment| match Regex::new(fragment) {
                Ok(regex) => Some(regex),
                Err(e) => {
                    warn!(pattern = %fragment, "ignoring invalid excludedFilePatterns entry: {e}");
                    None
                }
            })
            .collect();
        Self { patterns }
    }

    /// Strip fenced code blocks whose info line matches any pattern.
    pub fn redact(&self, text: &str) -> String {
        if self.patterns.is_empty() {
            return text.to_string();
        }
        let mut out = Vec::new();
        let mut lines = text.lines();
        while let Some(line) = lines.next() {
            let trimmed = line.trim_start();
            if let Some(info) = trimmed.strip_prefix("```") {
                let excluded = self.patterns.iter().any(|p| p.is_match(info.trim()));
                if excluded {
                    // Swallow the block, closing fence included.
                    for inner in lines.by_ref() {
                        if inner.trim_start().starts_with("```") {
                            break;
                        }
                    }
                    out.push("[file contents omitted]".to_string());
                    continue;
                }
            }
            out.push(line.to_string());
        }
        out.join("\n")
    }
}

/// Format a slice of incoming messages into one prompt for the session
/// library, redacting user text on the way.  Tool blocks are skipped; tool
/// results travel through the bridge, not the prompt.
pub fn format_prompt(messages: &[Message], redactor: &Redactor) -> String {
    let mut sections = Vec::new();
    for message in messages {
        let text = message.text();
        if text.trim().is_empty() {
            continue;
        }
        match message.role {
            Role::User => sections.push(format!("## User\n\n{}", redactor.redact(&text))),
            Role::Assistant => sections.push(format!("## Assistant\n\n{text}")),
            // System text travels separately as the session's system prompt;
            // tool role messages never carry prompt-worthy text.
            Role::System | Role::Tool => {}
        }
    }
    sections.join("\n\n")
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
