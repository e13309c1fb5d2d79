// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use xcopilot_bridge::ConversationManager;
use xcopilot_config::Config;
use xcopilot_session::SessionProvider;

use crate::redact::Redactor;

/// Dependency-injected application root, threaded through every handler as
/// axum state.  No global statics.
pub struct AppContext {
    pub config: Config,
    pub manager: Arc<ConversationManager>,
    pub provider: Arc<dyn SessionProvider>,
    /// The port the listener actually bound (config may say 0 in tests).
    /// Baked into the bridge URL handed to each session.
    pub port: u16,
    pub redactor: Redactor,
}

pub type SharedContext = Arc<AppContext>;

impl AppContext {
    pub fn new(config: Config, provider: Arc<dyn SessionProvider>, port: u16) -> SharedContext {
        let redactor = Redactor::new(&config.excluded_file_patterns);
        Arc::new(Self {
            config,
            manager: ConversationManager::new(),
            provider,
            port,
            redactor,
        })
    }
}
