//! History message schema.
//!
//! Partial records and finalized history entries share this schema; the
//! `partial` flag in [`MessageMetadata`] tells them apart.

use serde::{Deserialize, Serialize};

use crate::errors::ErrorKind;
use crate::parts::Part;
use crate::usage::TokenUsage;

/// Author of a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// End user.
    User,
    /// Model output.
    Assistant,
    /// System instructions.
    System,
}

/// Metadata persisted alongside a message's parts.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    /// Durable position in the workspace history (allocated externally).
    pub history_sequence: u64,
    /// Model that produced the message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Session start time, milliseconds since epoch.
    #[serde(default)]
    pub timestamp: u64,
    /// `true` while the message is still being generated (or was interrupted).
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub partial: bool,
    /// Failure message for error-tagged records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Failure category for error-tagged records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Cumulative usage across all steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    /// Last step's usage (current context size).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_usage: Option<TokenUsage>,
    /// Cumulative cost in USD, when pricing is known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    /// Wall-clock session duration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// A message as stored in workspace history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryMessage {
    /// Message id.
    pub id: String,
    /// Author.
    pub role: Role,
    /// Ordered content parts.
    pub parts: Vec<Part>,
    /// Persisted metadata.
    pub metadata: MessageMetadata,
}

impl HistoryMessage {
    /// Build a single-text user message.
    pub fn user(id: impl Into<String>, text: impl Into<String>, history_sequence: u64) -> Self {
        Self {
            id: id.into(),
            role: Role::User,
            parts: vec![Part::text(text, 0)],
            metadata: MessageMetadata {
                history_sequence,
                ..MessageMetadata::default()
            },
        }
    }

    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}
