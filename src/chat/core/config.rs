//! Configuration for the chat subsystem.

use std::path::PathBuf;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::chat::core::errors::{ChatError, ChatResult};

/// Top-level configuration for the chat backend.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChatConfig {
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Storage settings.
    pub storage: StorageConfig,
    /// Retrieval (RAG) gateway settings.
    pub rag: RagConfig,
    /// Generation gateway settings.
    pub generation: GenerationConfig,
    /// Per-user request throttling.
    pub rate_limit: RateLimitConfig,
    /// History listing settings.
    pub history: HistoryConfig,
}

impl ChatConfig {
    /// Build a configuration from defaults plus `CONVERSE_*` environment
    /// overrides.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(port) = env_parse("CONVERSE_PORT") {
            config.server.port = port;
        }
        if let Ok(path) = std::env::var("CONVERSE_DB_PATH") {
            config.storage.sqlite_path = PathBuf::from(path);
        }
        if let Ok(url) = std::env::var("CONVERSE_RAG_URL") {
            config.rag.base_url = url;
        }
        if let Ok(url) = std::env::var("CONVERSE_GENERATION_URL") {
            config.generation.base_url = url;
        }
        if let Ok(model) = std::env::var("CONVERSE_MODEL") {
            config.generation.model = model;
        }
        if let Ok(key) = std::env::var("CONVERSE_GEMINI_API_KEY") {
            config.generation.api_key = Some(key);
        }
        config
    }

    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> ChatResult<()> {
        if self.rag.top_k == 0 {
            return Err(ChatError::InvalidConfig(
                "rag.top_k must be > 0".to_string(),
            ));
        }
        if self.rag.max_context_chars == 0 {
            return Err(ChatError::InvalidConfig(
                "rag.max_context_chars must be > 0".to_string(),
            ));
        }
        if self.generation.retry.max_attempts == 0 {
            return Err(ChatError::InvalidConfig(
                "generation.retry.max_attempts must be > 0".to_string(),
            ));
        }
        if self.generation.retry.backoff_multiplier < 1.0 {
            return Err(ChatError::InvalidConfig(
                "generation.retry.backoff_multiplier must be >= 1.0".to_string(),
            ));
        }
        if self.rate_limit.max_requests == 0 {
            return Err(ChatError::InvalidConfig(
                "rate_limit.max_requests must be > 0".to_string(),
            ));
        }
        if self.rate_limit.window_secs == 0 {
            return Err(ChatError::InvalidConfig(
                "rate_limit.window_secs must be > 0".to_string(),
            ));
        }
        if self.history.preview_chars == 0 {
            return Err(ChatError::InvalidConfig(
                "history.preview_chars must be > 0".to_string(),
            ));
        }
        if self.history.default_page_size == 0 {
            return Err(ChatError::InvalidConfig(
                "history.default_page_size must be > 0".to_string(),
            ));
        }

        Url::parse(&self.rag.base_url)?;
        Url::parse(&self.generation.base_url)?;

        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|value| value.parse().ok())
}

/// HTTP server settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 3000 }
    }
}

/// Storage configuration for session data.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `SQLite` database path.
    pub sqlite_path: PathBuf,
    /// Sessions table name.
    pub sessions_table: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("converse.sqlite"),
            sessions_table: "chat_sessions".to_string(),
        }
    }
}

/// Retrieval gateway settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RagConfig {
    /// Base URL of the retrieval service.
    pub base_url: String,
    /// Documents requested per query.
    pub top_k: usize,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Maximum characters of concatenated document context per turn.
    pub max_context_chars: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            top_k: 5,
            timeout_secs: 30,
            connect_timeout_secs: 5,
            max_context_chars: 5000,
        }
    }
}

/// Generation gateway settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Base URL of the generative-text API.
    pub base_url: String,
    /// Model name routed to.
    pub model: String,
    /// Optional API key appended to requests.
    pub api_key: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Retry policy for transient upstream failures.
    pub retry: RetryPolicy,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            model: "gemini-1.5-flash".to_string(),
            api_key: None,
            timeout_secs: 60,
            retry: RetryPolicy::default(),
        }
    }
}

/// Named bounded-retry policy for upstream calls.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (initial call included).
    pub max_attempts: u32,
    /// Initial delay between attempts in milliseconds.
    pub initial_delay_ms: u64,
    /// Exponential backoff multiplier.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to retry delays.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following `attempt` (0-indexed).
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let delay_ms = if self.jitter {
            // Up to 25% jitter so synchronized clients fan out
            let factor: f64 = rand::thread_rng().gen_range(0.0..1.0);
            base_delay + base_delay * 0.25 * factor
        } else {
            base_delay
        };
        Duration::from_millis(delay_ms as u64)
    }
}

/// Per-user request throttling: fixed window, fixed quota.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Window length in seconds.
    pub window_secs: u64,
    /// Requests admitted per window per user.
    pub max_requests: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            // 15 minutes, 100 requests
            window_secs: 15 * 60,
            max_requests: 100,
        }
    }
}

/// History listing settings.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Characters of preview text per session entry.
    pub preview_chars: usize,
    /// Page size when the caller does not supply one.
    pub default_page_size: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            preview_chars: 75,
            default_page_size: 20,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(ChatConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_top_k_is_rejected() {
        let mut config = ChatConfig::default();
        config.rag.top_k = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_base_url_is_rejected() {
        let mut config = ChatConfig::default();
        config.rag.base_url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn retry_delay_grows_exponentially() {
        let policy = RetryPolicy {
            max_attempts: 4,
            initial_delay_ms: 100,
            backoff_multiplier: 2.0,
            jitter: false,
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
    }

    #[test]
    fn jitter_stays_bounded() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_delay_ms: 100,
            backoff_multiplier: 2.0,
            jitter: true,
        };
        for attempt in 0..3 {
            let base = 100.0 * 2.0_f64.powi(attempt);
            let delay = policy.delay_for_attempt(attempt.try_into().unwrap());
            let millis = delay.as_millis() as f64;
            assert!(millis >= base);
            assert!(millis <= base * 1.25 + 1.0);
        }
    }
}
