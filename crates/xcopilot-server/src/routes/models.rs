// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use axum::response::Json;

use xcopilot_protocol::ModelList;
use xcopilot_session::model_catalog;

/// `GET /v1/models` — the static catalog in Anthropic list shape.
pub async fn list() -> Json<ModelList> {
    Json(ModelList::new(model_catalog().iter().map(|m| {
        (m.id.to_string(), m.display_name.to_string())
    })))
}
