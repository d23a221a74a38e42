//! Core chat types and identifiers.

pub mod config;
pub mod errors;
pub mod ids;
pub mod message;
pub mod session;

pub use config::{
    ChatConfig, GenerationConfig, HistoryConfig, RagConfig, RateLimitConfig, RetryPolicy,
    ServerConfig, StorageConfig,
};
pub use errors::{ChatError, ChatResult, GenerationError};
pub use ids::{SessionId, UserId};
pub use message::{Message, MessagePart, MessageRole};
pub use session::SessionRecord;
