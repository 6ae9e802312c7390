//! Scripted provider for driving the session engine in tests.
//!
//! Each [`Provider::stream`] call pops the next [`Script`]. A script either
//! rejects the call up front or plays a list of [`ScriptStep`]s, honoring the
//! cancellation token between steps.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use strand_core::events::StreamEvent;
use strand_core::usage::TokenUsage;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::errors::{ProviderError, ProviderResult};
use crate::provider::{Provider, ProviderStream, StreamMetadata};
use crate::request::StreamRequest;

/// One step of a scripted stream.
#[derive(Debug)]
pub enum ScriptStep {
    /// Yield a content unit.
    Event(StreamEvent),
    /// Yield an error item and end the stream.
    Fail(ProviderError),
    /// Yield an undecodable item and keep going.
    Malformed(serde_json::Error),
    /// Sleep (cancellable).
    Pause(Duration),
    /// Wait for a permit on the notifier (cancellable). Use `notify_one`.
    WaitFor(Arc<Notify>),
    /// Block until cancelled, then end the stream.
    Hang,
}

impl ScriptStep {
    /// Text delta.
    pub fn text(delta: &str) -> Self {
        Self::Event(StreamEvent::TextDelta {
            delta: delta.to_owned(),
        })
    }

    /// Reasoning delta.
    pub fn reasoning(delta: &str) -> Self {
        Self::Event(StreamEvent::ReasoningDelta {
            delta: delta.to_owned(),
            signature: None,
        })
    }

    /// Tool invocation.
    pub fn tool_call(id: &str, name: &str, input: Value) -> Self {
        Self::Event(StreamEvent::ToolCallStart {
            tool_call_id: id.to_owned(),
            name: name.to_owned(),
            input,
        })
    }

    /// Tool result.
    pub fn tool_result(id: &str, name: &str, output: Value) -> Self {
        Self::Event(StreamEvent::ToolResult {
            tool_call_id: id.to_owned(),
            name: name.to_owned(),
            output,
        })
    }

    /// Step boundary with input/output usage.
    pub fn step(input_tokens: u64, output_tokens: u64) -> Self {
        Self::Event(StreamEvent::StepFinish {
            usage: TokenUsage::new(input_tokens, output_tokens),
            provider_metadata: None,
        })
    }

    /// Item whose payload failed to decode as `raw`.
    ///
    /// Panics if `raw` is valid JSON.
    pub fn malformed(raw: &str) -> Self {
        Self::Malformed(serde_json::from_str::<Value>(raw).expect_err("payload must be invalid JSON"))
    }

    /// In-band continuation-loss error unit.
    pub fn continuation_lost() -> Self {
        Self::Event(StreamEvent::Error {
            message: "Previous response with id 'resp_stale' not found.".into(),
            status: Some(400),
            body: Some(json!({
                "error": {"type": "invalid_request_error", "code": "previous_response_not_found"}
            })),
        })
    }
}

/// Script for one provider call.
#[derive(Debug)]
pub enum Script {
    /// Reject the call before a stream opens.
    Reject(ProviderError),
    /// Open a stream that plays these steps.
    Stream(Vec<ScriptStep>),
}

#[derive(Default)]
struct Shared {
    scripts: VecDeque<Script>,
    requests: Vec<StreamRequest>,
    total_usage: Option<TokenUsage>,
    metadata_delay: Option<Duration>,
}

/// Provider that plays queued scripts.
#[derive(Clone)]
pub struct ScriptedProvider {
    name: String,
    shared: Arc<Mutex<Shared>>,
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedProvider {
    /// Provider named `scripted`.
    pub fn new() -> Self {
        Self::named("scripted")
    }

    /// Provider with a specific family name.
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            shared: Arc::new(Mutex::new(Shared::default())),
        }
    }

    /// Queue a streaming script.
    #[must_use]
    pub fn with_stream(self, steps: Vec<ScriptStep>) -> Self {
        self.push(Script::Stream(steps));
        self
    }

    /// Queue a rejection.
    #[must_use]
    pub fn with_reject(self, error: ProviderError) -> Self {
        self.push(Script::Reject(error));
        self
    }

    /// Report this from `total_usage()`.
    #[must_use]
    pub fn with_total_usage(self, usage: TokenUsage) -> Self {
        self.shared.lock().total_usage = Some(usage);
        self
    }

    /// Delay every metadata call by `delay`.
    #[must_use]
    pub fn with_metadata_delay(self, delay: Duration) -> Self {
        self.shared.lock().metadata_delay = Some(delay);
        self
    }

    /// Queue a script.
    pub fn push(&self, script: Script) {
        self.shared.lock().scripts.push_back(script);
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<StreamRequest> {
        self.shared.lock().requests.clone()
    }

    /// Number of `stream` calls made.
    pub fn call_count(&self) -> usize {
        self.shared.lock().requests.len()
    }
}

struct ScriptedMetadata {
    total_usage: Option<TokenUsage>,
    delay: Option<Duration>,
}

#[async_trait]
impl StreamMetadata for ScriptedMetadata {
    async fn total_usage(&self) -> ProviderResult<Option<TokenUsage>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.total_usage)
    }

    async fn steps(&self) -> ProviderResult<Vec<Value>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(Vec::new())
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream(
        &self,
        request: &StreamRequest,
        cancel: CancellationToken,
    ) -> ProviderResult<ProviderStream> {
        let (script, metadata) = {
            let mut shared = self.shared.lock();
            shared.requests.push(request.clone());
            let metadata = ScriptedMetadata {
                total_usage: shared.total_usage,
                delay: shared.metadata_delay,
            };
            (shared.scripts.pop_front(), metadata)
        };

        let steps = match script {
            Some(Script::Stream(steps)) => steps,
            Some(Script::Reject(error)) => return Err(error),
            None => {
                return Err(ProviderError::Other {
                    message: "scripted provider has no script left".into(),
                });
            }
        };

        let events = async_stream::stream! {
            for step in steps {
                if cancel.is_cancelled() {
                    return;
                }
                match step {
                    ScriptStep::Event(event) => yield Ok(event),
                    ScriptStep::Fail(error) => {
                        yield Err(error);
                        return;
                    }
                    ScriptStep::Malformed(error) => {
                        yield Err(ProviderError::Json(error));
                    }
                    ScriptStep::Pause(duration) => {
                        tokio::select! {
                            () = cancel.cancelled() => return,
                            () = tokio::time::sleep(duration) => {}
                        }
                    }
                    ScriptStep::WaitFor(notify) => {
                        tokio::select! {
                            () = cancel.cancelled() => return,
                            () = notify.notified() => {}
                        }
                    }
                    ScriptStep::Hang => {
                        cancel.cancelled().await;
                        return;
                    }
                }
            }
        };

        Ok(ProviderStream::new(Box::pin(events)).with_metadata(Arc::new(metadata)))
    }
}
