//! Session record: one logical conversation owned by one user.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chat::core::ids::{SessionId, UserId};
use crate::chat::core::message::Message;

/// Fallback preview label for sessions whose first message has no text.
const EMPTY_PREVIEW_LABEL: &str = "Chat Session";

/// Persistent record of a chat session.
///
/// Messages are append-only; the whole record is written back as one
/// document on every save, so concurrent writers resolve to
/// last-write-wins on the full session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Opaque session identifier, unique process-wide.
    pub session_id: SessionId,
    /// Owning user.
    pub user_id: UserId,
    /// Conversation history in insertion order.
    pub messages: Vec<Message>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time; refreshed on every append and replace.
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Create an empty session for a user.
    #[must_use]
    pub fn new(session_id: SessionId, user_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            user_id,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a message and refresh `updated_at`.
    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
        self.updated_at = Utc::now();
    }

    /// Replace the whole history (rotation persists the caller's copy
    /// verbatim) and refresh `updated_at`.
    pub fn replace_messages(&mut self, messages: Vec<Message>) {
        self.messages = messages;
        self.updated_at = Utc::now();
    }

    /// Number of messages in the session.
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Short preview: the first `max_chars` characters of the first
    /// message's text, or a fixed label for sessions without one.
    #[must_use]
    pub fn preview(&self, max_chars: usize) -> String {
        self.messages
            .first()
            .and_then(Message::first_text)
            .filter(|text| !text.is_empty())
            .map_or_else(
                || EMPTY_PREVIEW_LABEL.to_string(),
                |text| text.chars().take(max_chars).collect(),
            )
    }
}
