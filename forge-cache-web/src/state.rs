use std::sync::Arc;

use forge_cache_auth::AuthValidator;
use forge_cache_core::CacheOrchestrator;

/// Shared state threaded through every axum handler.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<CacheOrchestrator>,
    pub auth: Arc<AuthValidator>,
    /// Scheme used for `GenerateArchiveURL` when the request carries no
    /// `X-Forwarded-Proto` header (spec.md §4.5).
    pub default_scheme: String,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<CacheOrchestrator>,
        auth: Arc<AuthValidator>,
        default_scheme: impl Into<String>,
    ) -> Self {
        Self {
            orchestrator,
            auth,
            default_scheme: default_scheme.into(),
        }
    }
}
