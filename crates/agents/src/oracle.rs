//! Extraction oracle contract
//!
//! The oracle takes an ordered list of role-tagged messages and returns a
//! single text payload, expected to be JSON. `Ok(None)` is the signaled
//! "no response" case; `Err` is reserved for transport failures.

use crate::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OracleRole {
    System,
    User,
    Assistant,
}

impl From<flowgraph_core::TurnRole> for OracleRole {
    fn from(role: flowgraph_core::TurnRole) -> Self {
        match role {
            flowgraph_core::TurnRole::User => OracleRole::User,
            flowgraph_core::TurnRole::Assistant => OracleRole::Assistant,
            flowgraph_core::TurnRole::System => OracleRole::System,
        }
    }
}

/// One piece of message content
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPart {
    Text(String),
    /// Base64-encoded JPEG
    Image(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleMessage {
    pub role: OracleRole,
    pub parts: Vec<ContentPart>,
}

impl OracleMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self::text(OracleRole::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text(OracleRole::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text(OracleRole::Assistant, text)
    }

    pub fn text(role: OracleRole, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![ContentPart::Text(text.into())],
        }
    }

    /// A user message carrying an image followed by a caption
    pub fn user_with_image(jpeg_base64: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: OracleRole::User,
            parts: vec![
                ContentPart::Image(jpeg_base64.into()),
                ContentPart::Text(text.into()),
            ],
        }
    }

    /// Concatenated text parts
    pub fn text_content(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text(text) => Some(text.as_str()),
                ContentPart::Image(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn images(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(|part| match part {
            ContentPart::Image(data) => Some(data.as_str()),
            ContentPart::Text(_) => None,
        })
    }
}

/// Something that answers oracle requests
#[async_trait]
pub trait ExtractionOracle: Send + Sync {
    /// Send the conversation; `Ok(None)` when the oracle gave no reply
    async fn complete(&self, messages: Vec<OracleMessage>) -> Result<Option<String>>;
}

/// Strip a surrounding ```json fence, if present
pub fn strip_json_fence(payload: &str) -> &str {
    let trimmed = payload.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```JSON"))
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}

/// Parse an oracle reply as JSON after removing any fence
pub fn parse_reply<T: DeserializeOwned>(reply: &str) -> serde_json::Result<T> {
    serde_json::from_str(strip_json_fence(reply))
}
