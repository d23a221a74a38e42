//! Message model for chat conversations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::chat::core::errors::ChatError;

/// Role of a chat message.
///
/// The set is closed: a conversation alternates user input and model
/// replies, nothing else is persisted.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// User input.
    User,
    /// Generated model reply (including synthesized failure replies).
    Model,
}

impl MessageRole {
    /// Stable string form for storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Model => "model",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "user" => Ok(Self::User),
            "model" => Ok(Self::Model),
            _ => Err(value.to_string()),
        }
    }
}

/// One text fragment of a message.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct MessagePart {
    /// Fragment text.
    pub text: String,
}

impl MessagePart {
    /// Build a part from text.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// A single chat message: role, ordered text parts, timestamp.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who produced the message.
    pub role: MessageRole,
    /// Ordered text parts; at least one part must carry non-empty text.
    pub parts: Vec<MessagePart>,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Build a user message with a single text part.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            parts: vec![MessagePart::new(text)],
            timestamp: Utc::now(),
        }
    }

    /// Build a model message with a single text part.
    #[must_use]
    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Model,
            parts: vec![MessagePart::new(text)],
            timestamp: Utc::now(),
        }
    }

    /// Text of the first part, if any.
    ///
    /// Session previews are derived from this.
    #[must_use]
    pub fn first_text(&self) -> Option<&str> {
        self.parts.first().map(|part| part.text.as_str())
    }

    /// Check the message invariant: at least one non-empty text part.
    ///
    /// # Errors
    /// Returns `ChatError::Validation` if the message carries no usable text.
    pub fn validate(&self) -> Result<(), ChatError> {
        if self.parts.iter().any(|part| !part.text.trim().is_empty()) {
            Ok(())
        } else {
            Err(ChatError::Validation(
                "Message must contain at least one non-empty text part.".to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_roundtrip() {
        assert_eq!("user".parse::<MessageRole>().unwrap(), MessageRole::User);
        assert_eq!("model".parse::<MessageRole>().unwrap(), MessageRole::Model);
        assert!("assistant".parse::<MessageRole>().is_err());
        assert_eq!(MessageRole::Model.to_string(), "model");
    }

    #[test]
    fn constructors_set_role_and_text() {
        let msg = Message::user("hello");
        assert_eq!(msg.role, MessageRole::User);
        assert_eq!(msg.first_text(), Some("hello"));
        assert!(msg.validate().is_ok());
    }

    #[test]
    fn empty_parts_fail_validation() {
        let mut msg = Message::model("x");
        msg.parts.clear();
        assert!(msg.validate().is_err());

        let blank = Message::user("   ");
        assert!(blank.validate().is_err());
    }

    #[test]
    fn serde_role_is_lowercase() {
        let msg = Message::model("ok");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "model");
        assert_eq!(json["parts"][0]["text"], "ok");
    }
}
