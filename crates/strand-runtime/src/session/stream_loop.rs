//! The per-session loop: consume provider events, accumulate parts, emit
//! session events, persist, and finalize exactly once.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::{FutureExt, StreamExt};
use metrics::{counter, gauge, histogram};
use serde_json::{Value, json};
use strand_core::errors::ErrorKind;
use strand_core::events::{AbortMode, SessionEvent, StreamEvent};
use strand_core::parts::{NestedToolCall, Part, compact_parts};
use strand_core::usage::TokenUsage;
use strand_llm::{Provider, ProviderError, ProviderResult, ProviderStream, StreamMetadata, StreamRequest};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::handle::{SessionCore, SessionHandle};
use super::part_writer::PartialSource;
use super::projector::project;
use super::retry::{RetryContext, RetryCoordinator, RetryDecision};
use super::state::SessionState;
use super::stop_conditions::{StopConditions, StopReason};
use crate::background::BackgroundTasks;
use crate::config::EngineConfig;
use crate::event_emitter::EventEmitter;
use crate::history::HistoryStore;
use crate::registry::{SlotTable, WorkspaceSlot};
use crate::scratch::ScratchRuntime;

/// Shared collaborators a session loop runs against.
#[derive(Clone)]
pub(crate) struct LoopDeps {
    pub provider: Arc<dyn Provider>,
    pub history: Arc<dyn HistoryStore>,
    pub scratch: Arc<dyn ScratchRuntime>,
    pub emitter: Arc<EventEmitter>,
    pub tasks: Arc<BackgroundTasks>,
    pub config: Arc<EngineConfig>,
    pub slots: Arc<SlotTable>,
}

/// How the loop ended.
#[derive(Debug)]
enum Outcome {
    Completed(Option<StopReason>),
    Aborted(AbortMode),
    Failed { error: String, kind: ErrorKind },
}

enum Flow {
    Continue,
    Exit(Outcome),
}

enum Next {
    Cancelled,
    Item(Option<ProviderResult<StreamEvent>>),
}

pub(crate) struct SessionLoop {
    deps: LoopDeps,
    handle: Arc<SessionHandle>,
    slot: Arc<WorkspaceSlot>,
    request: StreamRequest,
    stop: StopConditions,
    retry: RetryCoordinator,
    provider_cancel: CancellationToken,
    step_start: usize,
    orphan_results: u32,
}

impl SessionLoop {
    pub fn new(
        deps: LoopDeps,
        handle: Arc<SessionHandle>,
        slot: Arc<WorkspaceSlot>,
        request: StreamRequest,
        stop: StopConditions,
        provider_cancel: CancellationToken,
    ) -> Self {
        Self {
            deps,
            handle,
            slot,
            request,
            stop,
            retry: RetryCoordinator::new(),
            provider_cancel,
            step_start: 0,
            orphan_results: 0,
        }
    }

    /// Spawn the loop on the tracker. A panic still releases the workspace
    /// and wakes waiters.
    pub fn spawn(self, stream: ProviderStream) {
        let tasks = Arc::clone(&self.deps.tasks);
        let slots = Arc::clone(&self.deps.slots);
        let slot = Arc::clone(&self.slot);
        let handle = Arc::clone(&self.handle);
        tasks.spawn("session_loop", async move {
            let workspace_id = handle.core.workspace_id.clone();
            let panicked = AssertUnwindSafe(self.run(stream)).catch_unwind().await.is_err();
            if panicked {
                let _ = slot.release(&handle.core.token);
                handle.writer.close().await;
                gauge!("stream_sessions_active").decrement(1.0);
                handle.abort.mark_drained();
            }
            drop(slot);
            drop(handle);
            slots.prune(&workspace_id);
            if panicked {
                return Err(format!("session loop for workspace {workspace_id} panicked"));
            }
            Ok(())
        });
    }

    #[instrument(skip_all, fields(workspace_id = %self.handle.core.workspace_id, token = %self.handle.core.token))]
    async fn run(mut self, stream: ProviderStream) {
        let (outcome, metadata) = self.drive(stream).await;
        if !self.handle.abort.claim_cleanup() {
            return;
        }
        match outcome {
            Outcome::Completed(reason) => self.complete(reason, metadata).await,
            Outcome::Aborted(mode) => self.aborted(mode).await,
            Outcome::Failed { error, kind } => self.failed(error, kind).await,
        }
        self.release();
    }

    fn core(&self) -> &SessionCore {
        &self.handle.core
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.deps.emitter.emit(event);
    }

    fn abort_outcome(&self) -> Outcome {
        Outcome::Aborted(self.handle.abort.mode().unwrap_or(AbortMode::Hard))
    }

    /// Soft stop check at a content boundary.
    fn at_boundary(&self) -> Flow {
        if self.handle.abort.soft_pending() {
            Flow::Exit(Outcome::Aborted(AbortMode::Soft))
        } else {
            Flow::Continue
        }
    }

    async fn flush(&self) {
        if let Err(e) = self.handle.writer.flush().await {
            warn!(workspace_id = %self.core().workspace_id, error = %e, "partial flush failed");
        }
    }

    // ── Drive ──

    async fn drive(&mut self, mut stream: ProviderStream) -> (Outcome, Arc<dyn StreamMetadata>) {
        self.core().set_state(SessionState::Streaming);
        self.emit(self.core().start_event());

        loop {
            let next = tokio::select! {
                biased;
                () = self.handle.abort.token().cancelled() => Next::Cancelled,
                item = stream.events.next() => Next::Item(item),
            };
            let flow = match next {
                Next::Cancelled => Flow::Exit(self.abort_outcome()),
                Next::Item(None) => Flow::Exit(Outcome::Completed(None)),
                Next::Item(Some(Ok(StreamEvent::Error {
                    message,
                    status,
                    body,
                }))) => {
                    let err = ProviderError::from_stream_error(message, status, body);
                    self.on_error(err, &mut stream).await
                }
                Next::Item(Some(Ok(event))) => self.on_event(event).await,
                Next::Item(Some(Err(ProviderError::Json(e)))) => {
                    warn!(workspace_id = %self.core().workspace_id, error = %e, "skipping malformed stream item");
                    Flow::Continue
                }
                Next::Item(Some(Err(err))) => self.on_error(err, &mut stream).await,
            };
            if let Flow::Exit(outcome) = flow {
                self.provider_cancel.cancel();
                return (outcome, stream.metadata);
            }
        }
    }

    async fn on_event(&mut self, event: StreamEvent) -> Flow {
        match event {
            StreamEvent::TextDelta { delta } => {
                if !delta.is_empty() {
                    self.append_content(|ts| Part::text(delta, ts));
                }
                Flow::Continue
            }
            StreamEvent::ReasoningDelta { delta, signature } => {
                if delta.is_empty() {
                    if let Some(signature) = signature {
                        self.attach_signature(&signature);
                    }
                } else {
                    self.append_content(|ts| Part::Reasoning {
                        text: delta,
                        timestamp: ts,
                        signature,
                    });
                }
                Flow::Continue
            }
            StreamEvent::ReasoningEnd => self.at_boundary(),
            StreamEvent::ToolCallStart {
                tool_call_id,
                name,
                input,
            } => {
                self.on_tool_start(tool_call_id, name, input).await;
                Flow::Continue
            }
            StreamEvent::ToolCallDelta {
                tool_call_id,
                name,
                delta,
            } => {
                let timestamp = self.core().with_data(|d| d.clock.tick());
                self.emit(SessionEvent::ToolCallDelta {
                    base: self.core().base(),
                    tool_call_id,
                    tool_name: name,
                    delta,
                    timestamp,
                });
                Flow::Continue
            }
            StreamEvent::NestedToolCall {
                parent_call_id,
                call,
            } => {
                self.on_nested_call(&parent_call_id, call);
                Flow::Continue
            }
            StreamEvent::ToolResult {
                tool_call_id,
                name,
                output,
            } => self.on_tool_end(tool_call_id, name, output).await,
            StreamEvent::ToolError {
                tool_call_id,
                name,
                error,
            } => {
                self.on_tool_end(tool_call_id, name, json!({ "error": error }))
                    .await
            }
            StreamEvent::StepFinish {
                usage,
                provider_metadata,
            } => self.on_step_finish(usage, provider_metadata),
            StreamEvent::Unrecognized { kind } => {
                warn!(workspace_id = %self.core().workspace_id, kind = %kind, "skipping unrecognized stream event");
                Flow::Continue
            }
            // Routed to `on_error` by the caller.
            StreamEvent::Error { message, .. } => Flow::Exit(Outcome::Failed {
                error: message,
                kind: ErrorKind::Unknown,
            }),
        }
    }

    // ── Content ──

    fn append_content(&self, make: impl FnOnce(u64) -> Part) {
        let base = self.core().base();
        let event = self.core().with_data(|d| {
            let part = make(d.clock.tick());
            let event = project(&base, &part);
            d.parts.push(part);
            event
        });
        self.emit(event);
        self.handle.writer.schedule();
    }

    fn attach_signature(&self, signature: &str) {
        let attached = self.core().with_data(|d| {
            let last = d.parts.iter_mut().rev().find_map(|p| match p {
                Part::Reasoning { signature, .. } => Some(signature),
                _ => None,
            });
            match last {
                Some(Some(existing)) => {
                    existing.push_str(signature);
                    true
                }
                Some(slot) => {
                    *slot = Some(signature.to_owned());
                    true
                }
                None => false,
            }
        });
        if attached {
            self.handle.writer.schedule();
        } else {
            debug!(workspace_id = %self.core().workspace_id, "reasoning signature without reasoning part");
        }
    }

    // ── Tools ──

    async fn on_tool_start(&self, tool_call_id: String, name: String, input: Value) {
        let base = self.core().base();
        let event = self.core().with_data(|d| {
            if d.parts.iter().any(|p| p.call_id() == Some(tool_call_id.as_str())) {
                return None;
            }
            let part = Part::tool_call(tool_call_id.clone(), name.clone(), input, d.clock.tick());
            let event = project(&base, &part);
            d.parts.push(part);
            Some(event)
        });
        let Some(event) = event else {
            warn!(workspace_id = %self.core().workspace_id, tool_call_id = %tool_call_id, "duplicate tool call start ignored");
            return;
        };
        if self.deps.config.is_blocking_tool(&name) {
            // The caller may act on this event right away, so the invocation
            // must already be durable.
            self.flush().await;
        } else {
            self.handle.writer.schedule();
        }
        self.emit(event);
    }

    fn on_nested_call(&self, parent_call_id: &str, call: NestedToolCall) {
        let attached = self.core().with_data(|d| {
            match d.parts.iter_mut().find(|p| p.call_id() == Some(parent_call_id)) {
                Some(Part::Tool { nested_calls, .. }) => {
                    nested_calls.push(call);
                    true
                }
                _ => false,
            }
        });
        if attached {
            self.handle.writer.schedule();
        } else {
            debug!(workspace_id = %self.core().workspace_id, parent_call_id, "nested call for unknown parent dropped");
        }
    }

    async fn on_tool_end(&mut self, tool_call_id: String, name: String, output: Value) -> Flow {
        let base = self.core().base();
        let (event, orphan) = self.core().with_data(|d| {
            let (index, orphan) = match d
                .parts
                .iter()
                .position(|p| p.call_id() == Some(tool_call_id.as_str()))
            {
                Some(index) => (index, false),
                None => {
                    let ts = d.clock.tick();
                    d.parts
                        .push(Part::tool_call(tool_call_id.clone(), name.clone(), Value::Null, ts));
                    (d.parts.len() - 1, true)
                }
            };
            let at = d.clock.tick();
            let part = &mut d.parts[index];
            let event = part.complete_tool(output, at).then(|| project(&base, part));
            (event, orphan)
        });

        if orphan {
            self.orphan_results += 1;
            counter!("stream_orphan_tool_results_total").increment(1);
            if self.orphan_results <= self.deps.config.orphan_warning_cap {
                warn!(workspace_id = %self.core().workspace_id, tool_call_id = %tool_call_id, tool_name = %name, "tool result without a matching invocation");
            } else {
                debug!(workspace_id = %self.core().workspace_id, tool_call_id = %tool_call_id, tool_name = %name, "tool result without a matching invocation");
            }
        }
        let Some(event) = event else {
            warn!(workspace_id = %self.core().workspace_id, tool_call_id = %tool_call_id, "duplicate tool result ignored");
            return Flow::Continue;
        };

        // Persist before anyone can observe the completion.
        self.flush().await;
        self.emit(event);
        self.at_boundary()
    }

    // ── Steps ──

    fn on_step_finish(&mut self, usage: TokenUsage, provider_metadata: Option<Value>) -> Flow {
        let step_start = self.step_start;
        let (step, step_parts) = self.core().with_data(|d| {
            let step = d.usage.record_step(usage, provider_metadata.as_ref());
            let step_parts = d.parts.get(step_start..).map(<[Part]>::to_vec).unwrap_or_default();
            (step, step_parts)
        });
        self.step_start += step_parts.len();
        self.emit(SessionEvent::UsageDelta {
            base: self.core().base(),
            step: step.step,
            usage: step.usage,
            cumulative_usage: step.cumulative,
            cumulative_cost: step.cumulative_cost,
        });

        if let Flow::Exit(outcome) = self.at_boundary() {
            return Flow::Exit(outcome);
        }
        match self.stop.check(step.step, &step_parts) {
            Some(reason) => {
                info!(workspace_id = %self.core().workspace_id, step = step.step, reason = reason.as_str(), "stop condition met");
                Flow::Exit(Outcome::Completed(Some(reason)))
            }
            None => Flow::Continue,
        }
    }

    // ── Errors ──

    async fn on_error(&mut self, err: ProviderError, stream: &mut ProviderStream) -> Flow {
        if self.handle.abort.is_cancelled() {
            return Flow::Exit(self.abort_outcome());
        }
        let step_parts = self
            .core()
            .with_data(|d| d.parts.len().saturating_sub(self.step_start));
        let ctx = RetryContext {
            cancelled: false,
            soft_pending: self.handle.abort.soft_pending(),
            step_parts,
        };
        match self.retry.evaluate(&err, ctx) {
            RetryDecision::Terminal(kind) => Flow::Exit(Outcome::Failed {
                error: err.to_string(),
                kind,
            }),
            RetryDecision::Retry => self.restart(err, stream).await,
        }
    }

    async fn restart(&mut self, cause: ProviderError, stream: &mut ProviderStream) -> Flow {
        counter!("stream_retries_total").increment(1);
        warn!(workspace_id = %self.core().workspace_id, error = %cause, "continuation handle lost, restarting provider call");

        let in_progress = self.core().with_data(|d| {
            d.usage.mark_retried();
            !d.parts.is_empty()
        });
        let in_progress = in_progress.then(|| self.core().partial_record());
        let request = RetryCoordinator::restart_request(&self.request, in_progress);

        self.provider_cancel.cancel();
        self.provider_cancel = self.handle.abort.child_token();
        let provider = Arc::clone(&self.deps.provider);
        let cancel = self.provider_cancel.clone();
        let opened = tokio::select! {
            biased;
            () = self.handle.abort.token().cancelled() => None,
            result = provider.stream(&request, cancel) => Some(result),
        };
        match opened {
            None => Flow::Exit(self.abort_outcome()),
            Some(Ok(next)) => {
                *stream = next;
                self.request = request;
                Flow::Continue
            }
            Some(Err(e)) => Flow::Exit(Outcome::Failed {
                error: e.to_string(),
                kind: ErrorKind::RetryFailed,
            }),
        }
    }

    // ── Finalization ──

    async fn complete(&self, reason: Option<StopReason>, metadata: Arc<dyn StreamMetadata>) {
        let core = self.core();
        let ws = &core.workspace_id;
        self.flush().await;
        self.handle.writer.close().await;

        let retried = core.with_data(|d| d.usage.retried());
        let (total, steps) = if retried {
            (None, Vec::new())
        } else {
            self.fetch_metadata(metadata.as_ref()).await
        };
        let (usage, parts) = core.with_data(|d| (d.usage.resolve(total, &steps), compact_parts(&d.parts)));
        let message = core.final_message(parts.clone(), &usage);

        if let Err(e) = self.deps.history.update_history(ws, &message).await {
            error!(workspace_id = %ws, error = %e, "history commit failed; keeping partial record");
            let kind = ErrorKind::Unknown;
            core.set_failure(e.to_string(), kind);
            if let Err(e) = self.deps.history.write_partial(ws, &core.partial_record()).await {
                error!(workspace_id = %ws, error = %e, "partial record write failed");
            }
            core.set_state(SessionState::Error);
            counter!("stream_errors_total", "kind" => kind.as_str()).increment(1);
            self.emit(SessionEvent::Error {
                base: core.base(),
                error: format!("failed to commit history: {e}"),
                error_kind: kind,
            });
            return;
        }
        if let Err(e) = self.deps.history.delete_partial(ws).await {
            warn!(workspace_id = %ws, error = %e, "partial record delete failed");
        }

        core.set_state(SessionState::Completed);
        info!(
            workspace_id = %ws,
            parts = parts.len(),
            input_tokens = usage.usage.input_tokens,
            output_tokens = usage.usage.output_tokens,
            stop_reason = reason.map(StopReason::as_str),
            "session completed"
        );
        self.emit(SessionEvent::SessionEnd {
            base: core.base(),
            parts,
            usage: usage.usage,
            context_usage: usage.context_usage,
            cost: usage.cost,
            duration_ms: core.duration_ms(),
        });
    }

    async fn fetch_metadata(
        &self,
        metadata: &dyn StreamMetadata,
    ) -> (Option<TokenUsage>, Vec<Value>) {
        let limit = self.deps.config.metadata_timeout;
        let ws = &self.core().workspace_id;
        let (total, steps) = tokio::join!(
            tokio::time::timeout(limit, metadata.total_usage()),
            tokio::time::timeout(limit, metadata.steps()),
        );
        let total = match total {
            Ok(Ok(total)) => total,
            Ok(Err(e)) => {
                debug!(workspace_id = %ws, error = %e, "provider usage unavailable");
                None
            }
            Err(_) => {
                warn!(workspace_id = %ws, "provider usage fetch timed out");
                None
            }
        };
        let steps = match steps {
            Ok(Ok(steps)) => steps,
            Ok(Err(e)) => {
                debug!(workspace_id = %ws, error = %e, "provider step metadata unavailable");
                Vec::new()
            }
            Err(_) => {
                warn!(workspace_id = %ws, "provider step metadata fetch timed out");
                Vec::new()
            }
        };
        (total, steps)
    }

    async fn aborted(&self, mode: AbortMode) {
        let core = self.core();
        core.set_state(SessionState::Stopping);
        self.flush().await;
        self.handle.writer.close().await;

        let usage = core.with_data(|d| d.usage.snapshot());
        counter!("stream_aborts_total", "mode" => mode.as_str()).increment(1);
        info!(workspace_id = %core.workspace_id, mode = mode.as_str(), "session aborted");
        self.emit(SessionEvent::SessionAbort {
            base: core.base(),
            mode,
            usage: usage.usage,
            cost: usage.cost,
            duration_ms: core.duration_ms(),
        });
    }

    async fn failed(&self, error: String, kind: ErrorKind) {
        let core = self.core();
        core.set_failure(error.clone(), kind);
        core.set_state(SessionState::Error);
        self.flush().await;
        self.handle.writer.close().await;

        counter!("stream_errors_total", "kind" => kind.as_str()).increment(1);
        warn!(workspace_id = %core.workspace_id, error_kind = kind.as_str(), error = %error, "session failed");
        self.emit(SessionEvent::Error {
            base: core.base(),
            error,
            error_kind: kind,
        });
    }

    fn release(&self) {
        let core = self.core();
        let _ = self.slot.release(&core.token);
        gauge!("stream_sessions_active").decrement(1.0);
        histogram!("stream_session_duration_seconds").record(core.started.elapsed().as_secs_f64());

        let scratch = Arc::clone(&self.deps.scratch);
        let dir = core.scratch_dir.clone();
        self.deps.tasks.spawn("scratch_cleanup", async move {
            scratch.remove_dir(&dir).await
        });
        self.handle.abort.mark_drained();
    }
}
