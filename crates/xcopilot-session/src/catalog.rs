// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Static model catalog.
//!
//! The session library has no list-models endpoint worth proxying, so the
//! proxy owns the catalog: the ids Xcode may request, their display names,
//! and whether the model accepts a reasoning-effort parameter.

/// One model the proxy will open sessions for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelCatalogEntry {
    pub id: &'static str,
    pub display_name: &'static str,
    pub supports_reasoning_effort: bool,
}

/// All models, catalog order.  The first entry is the default.
pub fn model_catalog() -> &'static [ModelCatalogEntry] {
    &[
        ModelCatalogEntry {
            id: "gpt-5-codex",
            display_name: "GPT-5-Codex",
            supports_reasoning_effort: true,
        },
        ModelCatalogEntry {
            id: "gpt-5-mini",
            display_name: "GPT-5 mini",
            supports_reasoning_effort: true,
        },
        ModelCatalogEntry {
            id: "claude-sonnet-4.5",
            display_name: "Claude Sonnet 4.5",
            supports_reasoning_effort: false,
        },
        ModelCatalogEntry {
            id: "gemini-2.5-pro",
            display_name: "Gemini 2.5 Pro",
            supports_reasoning_effort: false,
        },
        ModelCatalogEntry {
            id: "o4-mini",
            display_name: "o4-mini",
            supports_reasoning_effort: true,
        },
    ]
}

/// Find a model by id.
pub fn lookup_model(id: &str) -> Option<&'static ModelCatalogEntry> {
    model_catalog().iter().find(|m| m.id == id)
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
