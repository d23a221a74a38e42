//! Application state shared across all request handlers.

use std::sync::Arc;

use crate::chat::core::config::ChatConfig;
use crate::chat::core::errors::ChatResult;
use crate::chat::lifecycle::manager::{ChatBackends, SessionLifecycleManager};
use crate::server::rate_limit::RateLimiter;

/// Shared application state.
pub struct AppState {
    /// Session lifecycle orchestration.
    pub manager: SessionLifecycleManager,
    /// Per-user request throttling for chat and retrieval endpoints.
    pub rate_limiter: RateLimiter,
}

impl AppState {
    /// Assemble state from already-built parts.
    #[must_use]
    pub fn new(manager: SessionLifecycleManager, rate_limiter: RateLimiter) -> Arc<Self> {
        Arc::new(Self {
            manager,
            rate_limiter,
        })
    }

    /// Build production state: `SQLite` store plus HTTP gateways.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or a backend
    /// cannot be initialized.
    pub async fn from_config(config: ChatConfig) -> ChatResult<Arc<Self>> {
        let backends = ChatBackends::sqlite(&config).await?;
        let rate_limiter = RateLimiter::new(config.rate_limit);
        let manager = SessionLifecycleManager::new(config, backends)?;

        Ok(Self::new(manager, rate_limiter))
    }
}
