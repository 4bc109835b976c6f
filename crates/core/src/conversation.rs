//! Conversation turns exchanged with the query responder

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role of the message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    /// Human/user message
    #[serde(alias = "human")]
    User,
    /// Assistant/AI response
    Assistant,
    /// System prompt (if exported)
    System,
}

impl std::fmt::Display for TurnRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TurnRole::User => write!(f, "user"),
            TurnRole::Assistant => write!(f, "assistant"),
            TurnRole::System => write!(f, "system"),
        }
    }
}

/// A single message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationTurn {
    #[serde(alias = "sender")]
    pub role: TurnRole,

    #[serde(alias = "text")]
    pub content: String,

    /// When the message was sent (if the client tracks it)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
            timestamp: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
            timestamp: None,
        }
    }
}

/// The last `limit` turns of a history
pub fn recent_turns(history: &[ConversationTurn], limit: usize) -> &[ConversationTurn] {
    &history[history.len().saturating_sub(limit)..]
}
