//! Step-boundary stop conditions for the multi-step loop.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use strand_core::parts::{Part, ToolState};

/// Caller predicate reporting that a new user message is queued.
pub type QueuedPredicate = Arc<dyn Fn() -> bool + Send + Sync>;

/// Why the loop ended the provider call early.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// Step cap reached.
    MaxSteps,
    /// The caller has a message waiting.
    MessageQueued,
    /// The designated tool returned a successful result.
    RequiredToolSucceeded,
}

impl StopReason {
    /// snake_case label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MaxSteps => "max_steps",
            Self::MessageQueued => "message_queued",
            Self::RequiredToolSucceeded => "required_tool_succeeded",
        }
    }
}

/// Conditions checked after every step.
#[derive(Clone)]
pub struct StopConditions {
    max_steps: u32,
    queued: Option<QueuedPredicate>,
    required_tool: Option<String>,
}

impl StopConditions {
    /// Stop after `max_steps` steps.
    pub fn new(max_steps: u32) -> Self {
        Self {
            max_steps,
            queued: None,
            required_tool: None,
        }
    }

    /// Also stop once `predicate` returns `true`.
    #[must_use]
    pub fn with_queued(mut self, predicate: Option<QueuedPredicate>) -> Self {
        self.queued = predicate;
        self
    }

    /// Also stop once `tool` succeeds.
    #[must_use]
    pub fn with_required_tool(mut self, tool: Option<String>) -> Self {
        self.required_tool = tool;
        self
    }

    /// Evaluate after step `steps` finished with `step_parts` produced.
    pub fn check(&self, steps: u32, step_parts: &[Part]) -> Option<StopReason> {
        if steps >= self.max_steps {
            return Some(StopReason::MaxSteps);
        }
        if self.queued.as_ref().is_some_and(|queued| queued()) {
            return Some(StopReason::MessageQueued);
        }
        let required = self.required_tool.as_deref()?;
        step_parts
            .iter()
            .any(|part| match part {
                Part::Tool {
                    name,
                    state: ToolState::OutputAvailable,
                    output: Some(output),
                    ..
                } => name == required && is_success_result(output),
                _ => false,
            })
            .then_some(StopReason::RequiredToolSucceeded)
    }
}

impl fmt::Debug for StopConditions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopConditions")
            .field("max_steps", &self.max_steps)
            .field("queued", &self.queued.is_some())
            .field("required_tool", &self.required_tool)
            .finish()
    }
}

/// Whether a tool result reads as success.
///
/// An explicit boolean `success` or `ok` field decides. Otherwise any object
/// that does not look like an error counts.
pub fn is_success_result(output: &Value) -> bool {
    let Some(object) = output.as_object() else {
        return false;
    };
    for marker in ["success", "ok"] {
        if let Some(flag) = object.get(marker).and_then(Value::as_bool) {
            return flag;
        }
    }
    let is_error = object.get("isError").and_then(Value::as_bool) == Some(true);
    let has_error = object.get("error").is_some_and(|e| !e.is_null());
    !(is_error || has_error)
}
