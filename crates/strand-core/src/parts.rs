//! Content parts accumulated by a session.
//!
//! A [`Part`] is append-only within a session. The two permitted mutations are
//! attaching a late reasoning signature and completing a tool call
//! (`input-available` → `output-available`, at most once).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle state of a tool part.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolState {
    /// Invocation received, no result yet.
    InputAvailable,
    /// Result (or error) recorded. Input and output are frozen.
    OutputAvailable,
}

/// A sub-call made from inside a running tool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NestedToolCall {
    /// Sub-call id.
    pub call_id: String,
    /// Sub-call tool name.
    pub name: String,
    /// Sub-call input.
    pub input: Value,
    /// Sub-call output, once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

/// One unit of generated or tool content.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Part {
    /// Assistant text.
    Text {
        /// Text content.
        text: String,
        /// Logical timestamp.
        timestamp: u64,
    },
    /// Extended-thinking content.
    Reasoning {
        /// Reasoning text.
        text: String,
        /// Logical timestamp.
        timestamp: u64,
        /// Provider verification signature, possibly attached later.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    /// A tool invocation and, once complete, its result.
    Tool {
        /// Provider call id, unique within the session.
        #[serde(rename = "callId")]
        call_id: String,
        /// Tool name.
        name: String,
        /// Lifecycle state.
        state: ToolState,
        /// Tool input.
        input: Value,
        /// Tool output (present once `output-available`).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
        /// Logical timestamp of the invocation.
        timestamp: u64,
        /// Logical timestamp of the transition to `output-available`.
        #[serde(
            rename = "completedAt",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        completed_at: Option<u64>,
        /// Sub-calls made while the tool ran.
        #[serde(rename = "nestedCalls", default, skip_serializing_if = "Vec::is_empty")]
        nested_calls: Vec<NestedToolCall>,
    },
}

impl Part {
    /// Create a text part.
    pub fn text(text: impl Into<String>, timestamp: u64) -> Self {
        Self::Text {
            text: text.into(),
            timestamp,
        }
    }

    /// Create a reasoning part.
    pub fn reasoning(text: impl Into<String>, timestamp: u64) -> Self {
        Self::Reasoning {
            text: text.into(),
            timestamp,
            signature: None,
        }
    }

    /// Create an `input-available` tool part.
    pub fn tool_call(
        call_id: impl Into<String>,
        name: impl Into<String>,
        input: Value,
        timestamp: u64,
    ) -> Self {
        Self::Tool {
            call_id: call_id.into(),
            name: name.into(),
            state: ToolState::InputAvailable,
            input,
            output: None,
            timestamp,
            completed_at: None,
            nested_calls: Vec::new(),
        }
    }

    /// Logical timestamp at which the part was appended.
    pub fn timestamp(&self) -> u64 {
        match self {
            Self::Text { timestamp, .. }
            | Self::Reasoning { timestamp, .. }
            | Self::Tool { timestamp, .. } => *timestamp,
        }
    }

    /// Timestamp an observer last saw this part change.
    ///
    /// Completed tool parts report their completion time; everything else
    /// reports its append time.
    pub fn observed_at(&self) -> u64 {
        match self {
            Self::Tool {
                completed_at: Some(done),
                ..
            } => *done,
            other => other.timestamp(),
        }
    }

    /// Tool call id, if this is a tool part.
    pub fn call_id(&self) -> Option<&str> {
        match self {
            Self::Tool { call_id, .. } => Some(call_id),
            _ => None,
        }
    }

    /// Whether this is a tool part still waiting for its result.
    pub fn is_pending_tool(&self) -> bool {
        matches!(
            self,
            Self::Tool {
                state: ToolState::InputAvailable,
                ..
            }
        )
    }

    /// Record a tool result. Returns `false` (and changes nothing) if this is
    /// not a tool part or it already holds a result.
    pub fn complete_tool(&mut self, result: Value, at: u64) -> bool {
        match self {
            Self::Tool {
                state,
                output,
                completed_at,
                ..
            } if *state == ToolState::InputAvailable => {
                *state = ToolState::OutputAvailable;
                *output = Some(result);
                *completed_at = Some(at);
                true
            }
            _ => false,
        }
    }
}

/// Merge adjacent text parts and adjacent reasoning parts.
///
/// The merged part keeps the first timestamp and the latest signature. Tool
/// parts are never merged.
pub fn compact_parts(parts: &[Part]) -> Vec<Part> {
    let mut out: Vec<Part> = Vec::with_capacity(parts.len());
    for part in parts {
        match (out.last_mut(), part) {
            (Some(Part::Text { text, .. }), Part::Text { text: next, .. }) => {
                text.push_str(next);
            }
            (
                Some(Part::Reasoning {
                    text, signature, ..
                }),
                Part::Reasoning {
                    text: next,
                    signature: next_sig,
                    ..
                },
            ) => {
                text.push_str(next);
                if next_sig.is_some() {
                    signature.clone_from(next_sig);
                }
            }
            _ => out.push(part.clone()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn tool_completes_at_most_once() {
        let mut part = Part::tool_call("c1", "bash", json!({"cmd": "ls"}), 10);
        assert!(part.is_pending_tool());
        assert!(part.complete_tool(json!({"ok": true}), 20));
        assert!(!part.is_pending_tool());
        assert!(!part.complete_tool(json!({"ok": false}), 30));
        assert_matches!(
            &part,
            Part::Tool { output: Some(out), completed_at: Some(20), .. } if out["ok"] == true
        );
    }

    #[test]
    fn complete_tool_on_text_is_rejected() {
        let mut part = Part::text("hi", 1);
        assert!(!part.complete_tool(json!(null), 2));
    }

    #[test]
    fn observed_at_prefers_completion_time() {
        let mut part = Part::tool_call("c1", "bash", json!({}), 10);
        assert_eq!(part.observed_at(), 10);
        let _ = part.complete_tool(json!("done"), 42);
        assert_eq!(part.timestamp(), 10);
        assert_eq!(part.observed_at(), 42);
    }

    #[test]
    fn tool_part_wire_format() {
        let part = Part::tool_call("c1", "bash", json!({"cmd": "ls"}), 7);
        let v = serde_json::to_value(&part).unwrap();
        assert_eq!(v["type"], "tool");
        assert_eq!(v["callId"], "c1");
        assert_eq!(v["state"], "input-available");
        assert!(v.get("output").is_none());
        assert!(v.get("nestedCalls").is_none());
    }

    #[test]
    fn compact_merges_adjacent_runs() {
        let mut reasoning_tail = Part::reasoning("b", 3);
        if let Part::Reasoning { signature, .. } = &mut reasoning_tail {
            *signature = Some("sig".into());
        }
        let parts = vec![
            Part::reasoning("a", 1),
            reasoning_tail,
            Part::text("hel", 4),
            Part::text("lo", 5),
            Part::tool_call("c1", "bash", json!({}), 6),
            Part::text("bye", 7),
        ];
        let compacted = compact_parts(&parts);
        assert_eq!(compacted.len(), 4);
        assert_matches!(
            &compacted[0],
            Part::Reasoning { text, timestamp: 1, signature: Some(s) } if text == "ab" && s == "sig"
        );
        assert_matches!(&compacted[1], Part::Text { text, timestamp: 4 } if text == "hello");
        assert_matches!(&compacted[2], Part::Tool { .. });
        assert_matches!(&compacted[3], Part::Text { text, .. } if text == "bye");
    }
}
