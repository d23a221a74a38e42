//! Conversation-turn orchestration and session rotation.

pub mod manager;
pub mod rag_context;

pub use manager::{
    ChatBackends, DateGroup, PageInfo, RotationOutcome, SessionLifecycleManager, SessionListing,
    SessionSummary,
};
pub use rag_context::build_rag_context;
