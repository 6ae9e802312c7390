//! Part → event projection shared by live emission and replay.
//!
//! Live streaming and replay both call [`project`], so a reconnecting
//! observer receives exactly the events a live observer saw for each part's
//! current state.

use strand_core::events::{ContentChannel, EventBase, SessionEvent};
use strand_core::parts::{Part, ToolState};
use serde_json::Value;

/// The observable event for a part in its current state.
///
/// Text and reasoning parts map to `content-delta`. A tool part maps to
/// `tool-call-start` while waiting for its result and to `tool-call-end`
/// (stamped with its completion time) once the result is recorded.
/// Reasoning signatures are not projected.
pub fn project(base: &EventBase, part: &Part) -> SessionEvent {
    match part {
        Part::Text { text, timestamp } => SessionEvent::ContentDelta {
            base: base.clone(),
            channel: ContentChannel::Text,
            delta: text.clone(),
            timestamp: *timestamp,
        },
        Part::Reasoning {
            text, timestamp, ..
        } => SessionEvent::ContentDelta {
            base: base.clone(),
            channel: ContentChannel::Reasoning,
            delta: text.clone(),
            timestamp: *timestamp,
        },
        Part::Tool {
            call_id,
            name,
            state: ToolState::InputAvailable,
            input,
            timestamp,
            ..
        } => SessionEvent::ToolCallStart {
            base: base.clone(),
            tool_call_id: call_id.clone(),
            tool_name: name.clone(),
            input: input.clone(),
            timestamp: *timestamp,
        },
        Part::Tool {
            call_id,
            name,
            state: ToolState::OutputAvailable,
            input,
            output,
            timestamp,
            completed_at,
            nested_calls,
        } => SessionEvent::ToolCallEnd {
            base: base.clone(),
            tool_call_id: call_id.clone(),
            tool_name: name.clone(),
            input: input.clone(),
            output: output.clone().unwrap_or(Value::Null),
            timestamp: completed_at.unwrap_or(*timestamp),
            nested_calls: nested_calls.clone(),
        },
    }
}
