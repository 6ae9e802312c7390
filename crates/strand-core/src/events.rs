//! Event types for session streaming.
//!
//! Two event families:
//!
//! - **[`StreamEvent`]**: Typed content units produced by a model provider
//!   (text/reasoning deltas, tool invocations and results, step boundaries,
//!   fatal errors).
//! - **[`SessionEvent`]**: Observer-facing events with workspace context
//!   (session start/end/abort, content deltas, tool call lifecycle, usage).
//!
//! `StreamEvent` is purely in-memory. `SessionEvent` is broadcast to
//! observers and re-created verbatim on replay, so it carries no wall-clock
//! fields: every timestamp is a logical Part timestamp or the fixed session
//! start time.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ErrorKind;
use crate::ids::{SessionToken, WorkspaceId};
use crate::parts::{NestedToolCall, Part};
use crate::usage::TokenUsage;

// ─────────────────────────────────────────────────────────────────────────────
// StreamEvent: provider content units
// ─────────────────────────────────────────────────────────────────────────────

/// Content unit emitted by a provider's multi-step streaming call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Incremental assistant text.
    TextDelta {
        /// Text fragment.
        delta: String,
    },

    /// Incremental reasoning text. An empty `delta` with a `signature`
    /// signs the reasoning block already streamed.
    ReasoningDelta {
        /// Reasoning fragment.
        delta: String,
        /// Verification signature fragment.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },

    /// Reasoning block finished.
    ReasoningEnd,

    /// Tool invocation with its complete input.
    ToolCallStart {
        /// Provider call id.
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        /// Tool name.
        name: String,
        /// Tool input.
        input: Value,
    },

    /// Streaming fragment of a tool call's arguments.
    ToolCallDelta {
        /// Provider call id.
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        /// Tool name.
        name: String,
        /// Argument JSON fragment.
        delta: String,
    },

    /// Sub-call made from inside a running tool.
    NestedToolCall {
        /// Call id of the enclosing tool.
        #[serde(rename = "parentCallId")]
        parent_call_id: String,
        /// The sub-call.
        call: NestedToolCall,
    },

    /// Tool finished successfully.
    ToolResult {
        /// Provider call id.
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        /// Tool name.
        name: String,
        /// Tool output.
        output: Value,
    },

    /// Tool failed.
    ToolError {
        /// Provider call id.
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        /// Tool name.
        name: String,
        /// Failure message.
        error: String,
    },

    /// One model step finished.
    StepFinish {
        /// Usage for this step only.
        usage: TokenUsage,
        /// Provider-specific step metadata.
        #[serde(
            rename = "providerMetadata",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        provider_metadata: Option<Value>,
    },

    /// Fatal error reported in-band.
    Error {
        /// Error message.
        message: String,
        /// HTTP status, when the failure came from an API response.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<u16>,
        /// Structured error body.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<Value>,
    },

    /// A unit type this engine does not understand. Logged and skipped.
    Unrecognized {
        /// Provider's type tag.
        kind: String,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// SessionEvent: observer events
// ─────────────────────────────────────────────────────────────────────────────

/// Common fields for all session events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventBase {
    /// Workspace the session belongs to.
    pub workspace_id: WorkspaceId,
    /// Id of the assistant message being generated.
    pub message_id: String,
}

impl EventBase {
    /// Create a base for the given workspace and message.
    pub fn new(workspace_id: WorkspaceId, message_id: impl Into<String>) -> Self {
        Self {
            workspace_id,
            message_id: message_id.into(),
        }
    }
}

/// Channel of a content delta.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentChannel {
    /// Assistant text.
    Text,
    /// Extended thinking.
    Reasoning,
}

/// How a session was stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AbortMode {
    /// Immediate cancellation; the caller waited for cleanup.
    Hard,
    /// Deferred to the next content boundary.
    Soft,
}

impl AbortMode {
    /// Lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hard => "hard",
            Self::Soft => "soft",
        }
    }
}

/// Declarative macro that generates [`SessionEvent`], its `base()` and
/// `event_type()` accessors, and a compile-time `VARIANT_COUNT`.
///
/// Adding a new variant requires ONE edit (inside this invocation).
/// The compiler enforces exhaustive matching everywhere else.
macro_rules! session_events {
    ($(
        $(#[doc = $doc:literal])*
        $variant:ident {
            $(
                $(#[$fmeta:meta])*
                $field:ident : $ty:ty
            ),*
            $(,)?
        } => $rename:literal
    ),* $(,)?) => {
        /// Observer-facing session event.
        ///
        /// Live streaming and replay produce these through the same
        /// projection, so equal events serialize to equal bytes.
        #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
        #[serde(tag = "type")]
        #[allow(missing_docs)]
        pub enum SessionEvent {
            $(
                $(#[doc = $doc])*
                #[serde(rename = $rename)]
                $variant {
                    #[serde(flatten)]
                    base: EventBase,
                    $(
                        $(#[$fmeta])*
                        $field: $ty,
                    )*
                },
            )*
        }

        impl SessionEvent {
            /// Get the base event fields.
            #[must_use]
            pub fn base(&self) -> &EventBase {
                match self {
                    $(Self::$variant { base, .. } => base,)*
                }
            }

            /// Get the event type string (for type discrimination).
            #[must_use]
            pub fn event_type(&self) -> &str {
                match self {
                    $(Self::$variant { .. } => $rename,)*
                }
            }
        }

        /// Number of `SessionEvent` variants (compile-time constant for tests).
        #[cfg(test)]
        pub(crate) const VARIANT_COUNT: usize = [$($rename),*].len();
    };
}

session_events! {
    // -- Session lifecycle --

    /// Session entered the streaming state.
    SessionStart {
        token: SessionToken,
        model: String,
        #[serde(rename = "historySequence")]
        history_sequence: u64,
        #[serde(rename = "startTime")]
        start_time: u64,
    } => "session-start",

    /// Session completed; final content has been persisted.
    SessionEnd {
        parts: Vec<Part>,
        usage: TokenUsage,
        #[serde(rename = "contextUsage", skip_serializing_if = "Option::is_none")]
        context_usage: Option<TokenUsage>,
        #[serde(skip_serializing_if = "Option::is_none")]
        cost: Option<f64>,
        #[serde(rename = "durationMs")]
        duration_ms: u64,
    } => "session-end",

    /// Session was cancelled; partial content has been persisted.
    SessionAbort {
        mode: AbortMode,
        usage: TokenUsage,
        #[serde(skip_serializing_if = "Option::is_none")]
        cost: Option<f64>,
        #[serde(rename = "durationMs")]
        duration_ms: u64,
    } => "session-abort",

    // -- Content --

    /// Text or reasoning content.
    ContentDelta {
        channel: ContentChannel,
        delta: String,
        timestamp: u64,
    } => "content-delta",

    // -- Tool calls --

    /// Tool invoked.
    ToolCallStart {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        input: Value,
        timestamp: u64,
    } => "tool-call-start",

    /// Tool call argument fragment (live only).
    ToolCallDelta {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        delta: String,
        timestamp: u64,
    } => "tool-call-delta",

    /// Tool completed; its result has been persisted.
    ToolCallEnd {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        input: Value,
        output: Value,
        timestamp: u64,
        #[serde(rename = "nestedCalls", default, skip_serializing_if = "Vec::is_empty")]
        nested_calls: Vec<NestedToolCall>,
    } => "tool-call-end",

    // -- Usage --

    /// Step boundary usage update (live only).
    UsageDelta {
        step: u32,
        usage: TokenUsage,
        #[serde(rename = "cumulativeUsage")]
        cumulative_usage: TokenUsage,
        #[serde(rename = "cumulativeCost", skip_serializing_if = "Option::is_none")]
        cumulative_cost: Option<f64>,
    } => "usage-delta",

    // -- Error --

    /// Terminal failure; an error-tagged partial record has been persisted.
    Error {
        error: String,
        #[serde(rename = "errorKind")]
        error_kind: ErrorKind,
    } => "error",
}

impl SessionEvent {
    /// Workspace this event belongs to.
    pub fn workspace_id(&self) -> &WorkspaceId {
        &self.base().workspace_id
    }

    /// Whether this event ends the session's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::SessionEnd { .. } | Self::SessionAbort { .. } | Self::Error { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base() -> EventBase {
        EventBase::new(WorkspaceId::new("ws"), "msg-1")
    }

    #[test]
    fn variant_count_matches_named_events() {
        assert_eq!(VARIANT_COUNT, 9);
    }

    #[test]
    fn base_is_flattened() {
        let event = SessionEvent::ContentDelta {
            base: base(),
            channel: ContentChannel::Text,
            delta: "hi".into(),
            timestamp: 5,
        };
        let v = serde_json::to_value(&event).unwrap();
        assert_eq!(v["type"], "content-delta");
        assert_eq!(v["workspaceId"], "ws");
        assert_eq!(v["messageId"], "msg-1");
        assert_eq!(v["channel"], "text");
        assert_eq!(event.event_type(), "content-delta");
        assert_eq!(event.workspace_id().as_str(), "ws");
    }

    #[test]
    fn tool_call_end_roundtrip() {
        let event = SessionEvent::ToolCallEnd {
            base: base(),
            tool_call_id: "c1".into(),
            tool_name: "bash".into(),
            input: json!({"cmd": "ls"}),
            output: json!({"ok": true}),
            timestamp: 9,
            nested_calls: vec![],
        };
        let s = serde_json::to_string(&event).unwrap();
        assert!(!s.contains("nestedCalls"));
        let back: SessionEvent = serde_json::from_str(&s).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn terminal_events() {
        let end = SessionEvent::Error {
            base: base(),
            error: "x".into(),
            error_kind: ErrorKind::Unknown,
        };
        assert!(end.is_terminal());
        let delta = SessionEvent::ContentDelta {
            base: base(),
            channel: ContentChannel::Reasoning,
            delta: String::new(),
            timestamp: 1,
        };
        assert!(!delta.is_terminal());
    }

    #[test]
    fn stream_event_tags() {
        let e = StreamEvent::StepFinish {
            usage: TokenUsage::new(1, 2),
            provider_metadata: None,
        };
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["type"], "step_finish");
        assert_eq!(v["usage"]["inputTokens"], 1);
    }
}
