//! Error types for the chat subsystem.

use thiserror::Error;

/// Chat subsystem error type.
///
/// `Display` output is user-facing: the HTTP layer serializes it verbatim
/// into the `{"message": ...}` error envelope.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Malformed or missing input (HTTP 400).
    #[error("{0}")]
    Validation(String),
    /// Missing or invalid user identity (HTTP 401).
    #[error("{0}")]
    Auth(String),
    /// Session absent or not owned by the caller (HTTP 404).
    #[error("{0}")]
    NotFound(String),
    /// Per-user request quota exceeded (HTTP 429).
    #[error("Too many requests, please try again later.")]
    RateLimited,
    /// Retrieval service unreachable or timed out (HTTP 503).
    ///
    /// The chat path degrades to an empty retrieval result instead of
    /// surfacing this; only the standalone retrieval endpoint propagates it.
    #[error("retrieval service unavailable: {0}")]
    RagUnavailable(String),
    /// Invalid configuration or unsupported values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// `SQLite` storage error (sync).
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// `SQLite` storage error (async).
    #[error("tokio-rusqlite error: {0}")]
    TokioSqlite(#[from] tokio_rusqlite::Error),
    /// Corrupt or inconsistent stored data.
    #[error("storage error: {0}")]
    Storage(String),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// URL parse error.
    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
    /// HTTP client construction error.
    #[error("http client error: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Convenience result alias for chat operations.
pub type ChatResult<T> = Result<T, ChatError>;

/// Failure classes of the generation gateway.
///
/// These never cross the HTTP boundary as errors: the lifecycle manager
/// converts them into synthesized chat messages.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// The upstream rejected the request as invalid (4xx other than 429).
    ///
    /// The upstream message is surfaced verbatim to the user.
    #[error("{0}")]
    InvalidRequest(String),
    /// Connect failure, timeout, or 429/5xx that survived the retry budget.
    #[error("generation service unavailable: {0}")]
    Unavailable(String),
    /// The response parsed but carried no usable candidate text.
    #[error("malformed generation response: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_user_facing() {
        let err = ChatError::Validation("Message text required.".to_string());
        assert_eq!(err.to_string(), "Message text required.");

        let err = ChatError::RateLimited;
        assert_eq!(
            err.to_string(),
            "Too many requests, please try again later."
        );
    }

    #[test]
    fn invalid_request_surfaces_upstream_message() {
        let err = GenerationError::InvalidRequest("content blocked".to_string());
        assert_eq!(err.to_string(), "content blocked");
    }
}
