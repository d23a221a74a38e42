//! Chat subsystem for the Converse backend.
//!
//! This module owns the chat-session lifecycle, organized into:
//! - `core`: Configuration, errors, IDs, messages, and session records
//! - `store`: Session persistence with a SQLite backend
//! - `gateway`: Clients for the external retrieval and generation services
//! - `lifecycle`: Orchestration of conversation turns and session rotation

pub mod core;
pub mod gateway;
pub mod lifecycle;
pub mod store;

// Re-export commonly used types for convenience
pub use core::{
    ChatConfig, ChatError, ChatResult, GenerationConfig, GenerationError, HistoryConfig, Message,
    MessagePart, MessageRole, RagConfig, RateLimitConfig, RetryPolicy, ServerConfig, SessionId,
    SessionRecord, StorageConfig, UserId,
};
pub use gateway::{
    DocumentRetriever, GatewayFuture, HttpGenerationGateway, HttpRagGateway, RetrievedDoc,
    TextGenerator,
};
pub use lifecycle::{
    ChatBackends, DateGroup, PageInfo, RotationOutcome, SessionLifecycleManager, SessionListing,
    SessionSummary,
};
pub use store::{SessionStore, SqliteSessionStore, StoreFuture};
