//! Provider call configuration.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strand_core::messages::HistoryMessage;

/// Tool offered to the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON Schema of the input.
    pub parameters: Value,
}

/// How the model may choose tools.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolChoice {
    /// Model decides.
    #[default]
    Auto,
    /// Model must call some tool.
    Required,
    /// Tools disabled for this call.
    None,
    /// Model must call the named tool.
    Tool {
        /// Tool name.
        name: String,
    },
}

impl ToolChoice {
    /// Whether the model is forced to call a tool.
    pub fn is_forced(&self) -> bool {
        matches!(self, Self::Required | Self::Tool { .. })
    }
}

/// Extended thinking budget.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingLevel {
    /// No extended thinking.
    #[default]
    Off,
    /// Small budget.
    Low,
    /// Medium budget.
    Medium,
    /// Large budget.
    High,
}

/// Per-call options.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamOptions {
    /// Server-side conversation handle from a prior call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuation_handle: Option<String>,
    /// Tool selection policy.
    #[serde(default)]
    pub tool_choice: ToolChoice,
    /// Extended thinking level.
    #[serde(default)]
    pub thinking: ThinkingLevel,
    /// System prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Output token cap per step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

/// A complete provider call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRequest {
    /// Model id.
    pub model: String,
    /// Conversation so far.
    pub messages: Vec<HistoryMessage>,
    /// Tools offered to the model.
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    /// Call options.
    #[serde(default)]
    pub options: StreamOptions,
}

impl StreamRequest {
    /// Request with default options and no tools.
    pub fn new(model: impl Into<String>, messages: Vec<HistoryMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: Vec::new(),
            options: StreamOptions::default(),
        }
    }
}
