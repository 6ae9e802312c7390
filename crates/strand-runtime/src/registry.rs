//! Session registry: per-workspace admission, stop, replay, and queries.
//!
//! Each workspace owns a slot with an async admission lock. `start_stream`
//! holds that lock for the whole handoff: it hard-stops and drains any
//! prior session, runs setup, and registers the new session, so at most one
//! session is ever live per workspace and the old session's terminal event
//! always precedes the new session's start event. Stops never take the
//! admission lock; they reach a session still in setup through the slot's
//! pending coordinator.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use metrics::{counter, gauge};
use parking_lot::Mutex;
use strand_core::clock::now_ms;
use strand_core::events::{AbortMode, SessionEvent};
use strand_core::ids::{SessionToken, WorkspaceId};
use strand_core::messages::HistoryMessage;
use strand_llm::compat::apply_provider_compat;
use strand_llm::{Provider, ProviderStream, StreamOptions, StreamRequest, ToolDefinition};
use strand_settings::{StrandSettings, strand_home};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::background::BackgroundTasks;
use crate::config::EngineConfig;
use crate::errors::RuntimeError;
use crate::event_emitter::EventEmitter;
use crate::history::{FileHistoryStore, HistoryStore};
use crate::scratch::{LocalScratch, ScratchRuntime};
use crate::session::abort::AbortCoordinator;
use crate::session::handle::{SessionCore, SessionHandle, SessionIdentity};
use crate::session::part_writer::{PartWriter, PartialSource};
use crate::session::replay::replay;
use crate::session::state::{SessionInfo, SessionState};
use crate::session::stop_conditions::{QueuedPredicate, StopConditions};
use crate::session::stream_loop::{LoopDeps, SessionLoop};

// ─────────────────────────────────────────────────────────────────────────────
// Start request
// ─────────────────────────────────────────────────────────────────────────────

/// Everything needed to start a session.
#[derive(Clone)]
pub struct StartRequest {
    /// Model id.
    pub model: String,
    /// Conversation so far.
    pub messages: Vec<HistoryMessage>,
    /// Tools the model may call.
    pub tools: Vec<ToolDefinition>,
    /// Provider call options.
    pub options: StreamOptions,
    /// History position for the assistant message. Allocated from the
    /// history store when absent.
    pub history_sequence: Option<u64>,
    /// Assistant message id. Generated when absent.
    pub message_id: Option<String>,
    /// Scratch directory. Resolved from the session token when absent.
    pub scratch_dir: Option<PathBuf>,
    /// Stop once this tool returns a successful result.
    pub required_tool: Option<String>,
    /// Stop at the next step boundary once this returns `true`.
    pub message_queued: Option<QueuedPredicate>,
}

impl StartRequest {
    /// Request with default options.
    pub fn new(model: impl Into<String>, messages: Vec<HistoryMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: Vec::new(),
            options: StreamOptions::default(),
            history_sequence: None,
            message_id: None,
            scratch_dir: None,
            required_tool: None,
            message_queued: None,
        }
    }

    /// Offer `tools` to the model.
    #[must_use]
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    /// Replace the provider options.
    #[must_use]
    pub fn with_options(mut self, options: StreamOptions) -> Self {
        self.options = options;
        self
    }

    /// Pin the history sequence.
    #[must_use]
    pub fn with_history_sequence(mut self, sequence: u64) -> Self {
        self.history_sequence = Some(sequence);
        self
    }

    /// Pin the assistant message id.
    #[must_use]
    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    /// Use a caller-provided scratch directory.
    #[must_use]
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    /// Stop once `tool` succeeds.
    #[must_use]
    pub fn with_required_tool(mut self, tool: impl Into<String>) -> Self {
        self.required_tool = Some(tool.into());
        self
    }

    /// Stop once `predicate` reports a queued message.
    #[must_use]
    pub fn with_message_queued(mut self, predicate: QueuedPredicate) -> Self {
        self.message_queued = Some(predicate);
        self
    }
}

impl std::fmt::Debug for StartRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartRequest")
            .field("model", &self.model)
            .field("messages", &self.messages.len())
            .field("tools", &self.tools.len())
            .field("history_sequence", &self.history_sequence)
            .field("required_tool", &self.required_tool)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Workspace slot
// ─────────────────────────────────────────────────────────────────────────────

/// Per-workspace admission state.
///
/// Lock order: `pending` before `active`.
#[derive(Default)]
pub(crate) struct WorkspaceSlot {
    admission: tokio::sync::Mutex<()>,
    active: Mutex<Option<Arc<SessionHandle>>>,
    pending: Mutex<Option<Arc<AbortCoordinator>>>,
}

impl WorkspaceSlot {
    fn active(&self) -> Option<Arc<SessionHandle>> {
        self.active.lock().clone()
    }

    fn is_idle(&self) -> bool {
        let pending = self.pending.lock();
        pending.is_none() && self.active.lock().is_none()
    }

    /// Clear the active entry if it still belongs to `token`.
    pub(crate) fn release(&self, token: &SessionToken) -> bool {
        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|h| &h.core.token == token) {
            *active = None;
            true
        } else {
            false
        }
    }
}

/// Slots by workspace. A slot is dropped once it is idle and nothing
/// outside the table holds it; every lookup goes through the table lock, so
/// a dropped slot can never be reached again.
#[derive(Default)]
pub(crate) struct SlotTable {
    slots: Mutex<HashMap<WorkspaceId, Arc<WorkspaceSlot>>>,
}

impl SlotTable {
    fn get_or_insert(&self, workspace_id: &WorkspaceId) -> Arc<WorkspaceSlot> {
        Arc::clone(self.slots.lock().entry(workspace_id.clone()).or_default())
    }

    fn get(&self, workspace_id: &WorkspaceId) -> Option<Arc<WorkspaceSlot>> {
        self.slots.lock().get(workspace_id).cloned()
    }

    fn all(&self) -> Vec<(WorkspaceId, Arc<WorkspaceSlot>)> {
        self.slots
            .lock()
            .iter()
            .map(|(id, slot)| (id.clone(), Arc::clone(slot)))
            .collect()
    }

    fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Drop the workspace's slot if it is idle and unreferenced.
    pub(crate) fn prune(&self, workspace_id: &WorkspaceId) {
        let mut slots = self.slots.lock();
        if slots
            .get(workspace_id)
            .is_some_and(|slot| Arc::strong_count(slot) == 1 && slot.is_idle())
        {
            let _ = slots.remove(workspace_id);
        }
    }

    fn prune_all(&self) {
        self.slots
            .lock()
            .retain(|_, slot| Arc::strong_count(slot) > 1 || !slot.is_idle());
    }
}

enum StopTarget {
    Active(Arc<SessionHandle>),
    Pending(Arc<AbortCoordinator>),
}

/// Setup result handed to the session loop.
struct Prepared {
    history_sequence: u64,
    request: StreamRequest,
    stream: ProviderStream,
    provider_cancel: CancellationToken,
}

/// Run `fut` unless `abort` fires first.
async fn unless_cancelled<F: Future>(abort: &AbortCoordinator, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        () = abort.token().cancelled() => None,
        out = fut => Some(out),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Owner of every live session.
pub struct SessionRegistry {
    deps: LoopDeps,
    shutting_down: AtomicBool,
}

impl SessionRegistry {
    /// Registry over explicit collaborators.
    pub fn new(
        provider: Arc<dyn Provider>,
        history: Arc<dyn HistoryStore>,
        scratch: Arc<dyn ScratchRuntime>,
        config: EngineConfig,
    ) -> Self {
        Self {
            deps: LoopDeps {
                provider,
                history,
                scratch,
                emitter: Arc::new(EventEmitter::new()),
                tasks: Arc::new(BackgroundTasks::new()),
                config: Arc::new(config),
                slots: Arc::new(SlotTable::default()),
            },
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Registry with file-backed history and local scratch directories
    /// rooted as configured (defaulting under the strand home).
    pub fn from_settings(provider: Arc<dyn Provider>, settings: &StrandSettings) -> Self {
        let home = strand_home();
        let history_root = settings
            .history
            .root
            .as_ref()
            .map_or_else(|| home.join("sessions"), PathBuf::from);
        let scratch_root = settings
            .engine
            .scratch_root
            .as_ref()
            .map_or_else(|| home.join("scratch"), PathBuf::from);
        Self::new(
            provider,
            Arc::new(FileHistoryStore::new(history_root)),
            Arc::new(LocalScratch::new(scratch_root)),
            EngineConfig::from_settings(settings),
        )
    }

    /// Subscribe to every session's events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.deps.emitter.subscribe()
    }

    /// The event emitter.
    pub fn emitter(&self) -> &Arc<EventEmitter> {
        &self.deps.emitter
    }

    /// Background task tracker (partial writes, scratch cleanup, loops).
    pub fn background(&self) -> &Arc<BackgroundTasks> {
        &self.deps.tasks
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.deps.config
    }

    fn slot(&self, workspace_id: &WorkspaceId) -> Arc<WorkspaceSlot> {
        self.deps.slots.get_or_insert(workspace_id)
    }

    fn existing_slot(&self, workspace_id: &WorkspaceId) -> Option<Arc<WorkspaceSlot>> {
        self.deps.slots.get(workspace_id)
    }

    /// Release our reference to `slot` and drop it if nothing else needs it.
    fn done_with(&self, workspace_id: &WorkspaceId, slot: Arc<WorkspaceSlot>) {
        drop(slot);
        self.deps.slots.prune(workspace_id);
    }

    fn stop_target(slot: &WorkspaceSlot) -> Option<StopTarget> {
        let pending = slot.pending.lock();
        if let Some(handle) = slot.active() {
            return Some(StopTarget::Active(handle));
        }
        pending.clone().map(StopTarget::Pending)
    }

    // ── Start ──

    /// Start a session for `workspace_id`, replacing any live one.
    ///
    /// Returns the new session's token. If a stop arrives while the session
    /// is still being set up, the token is returned but the session never
    /// streams and emits no events.
    #[instrument(skip(self, request), fields(workspace_id = %workspace_id, model = %request.model))]
    pub async fn start_stream(
        &self,
        workspace_id: &WorkspaceId,
        request: StartRequest,
    ) -> Result<SessionToken, RuntimeError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(RuntimeError::ShuttingDown);
        }
        let slot = self.slot(workspace_id);
        let result = self.start_in_slot(workspace_id, &slot, request).await;
        self.done_with(workspace_id, slot);
        result
    }

    async fn start_in_slot(
        &self,
        workspace_id: &WorkspaceId,
        slot: &Arc<WorkspaceSlot>,
        request: StartRequest,
    ) -> Result<SessionToken, RuntimeError> {
        let _admission = slot.admission.lock().await;

        if let Some(prior) = slot.active() {
            info!(workspace_id = %workspace_id, token = %prior.core.token, "replacing active session");
            Self::hard_stop(&prior).await;
        }
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(RuntimeError::ShuttingDown);
        }

        let token = SessionToken::generate();
        let abort = Arc::new(AbortCoordinator::new());
        *slot.pending.lock() = Some(Arc::clone(&abort));

        let scratch_dir = request
            .scratch_dir
            .clone()
            .unwrap_or_else(|| self.deps.scratch.resolve(&token));
        let prepared = match self.prepare(workspace_id, &request, &scratch_dir, &abort).await {
            Ok(Some(prepared)) => prepared,
            Ok(None) => {
                debug!(workspace_id = %workspace_id, token = %token, "stopped during setup");
                self.abandon_setup(slot, &abort, scratch_dir);
                return Ok(token);
            }
            Err(e) => {
                warn!(workspace_id = %workspace_id, error = %e, category = e.category(), "session setup failed");
                self.abandon_setup(slot, &abort, scratch_dir);
                return Err(e);
            }
        };

        let core = Arc::new(SessionCore::new(SessionIdentity {
            workspace_id: workspace_id.clone(),
            token: token.clone(),
            message_id: request
                .message_id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::now_v7().to_string()),
            model: request.model.clone(),
            history_sequence: prepared.history_sequence,
            start_time: now_ms(),
            scratch_dir,
        }));
        let writer = PartWriter::new(
            workspace_id.clone(),
            Arc::clone(&self.deps.history),
            Arc::clone(&core) as Arc<dyn PartialSource>,
            Arc::clone(&self.deps.tasks),
            self.deps.config.partial_write_interval,
        );
        let handle = Arc::new(SessionHandle {
            core,
            writer,
            abort: Arc::clone(&abort),
        });

        {
            let mut pending = slot.pending.lock();
            *pending = None;
            if abort.is_cancelled() || self.shutting_down.load(Ordering::SeqCst) {
                drop(pending);
                debug!(workspace_id = %workspace_id, token = %token, "stopped before registration");
                prepared.provider_cancel.cancel();
                self.abandon_setup(slot, &abort, handle.core.scratch_dir.clone());
                return Ok(token);
            }
            *slot.active.lock() = Some(Arc::clone(&handle));
        }

        gauge!("stream_sessions_active").increment(1.0);
        counter!("stream_sessions_started_total").increment(1);
        info!(
            workspace_id = %workspace_id,
            token = %token,
            history_sequence = prepared.history_sequence,
            "session started"
        );

        let stop = StopConditions::new(self.deps.config.max_steps)
            .with_queued(request.message_queued.clone())
            .with_required_tool(request.required_tool.clone());
        SessionLoop::new(
            self.deps.clone(),
            handle,
            Arc::clone(slot),
            prepared.request,
            stop,
            prepared.provider_cancel,
        )
        .spawn(prepared.stream);
        Ok(token)
    }

    /// Scratch, sequence, and provider call. `None` when stopped midway.
    async fn prepare(
        &self,
        workspace_id: &WorkspaceId,
        request: &StartRequest,
        scratch_dir: &std::path::Path,
        abort: &AbortCoordinator,
    ) -> Result<Option<Prepared>, RuntimeError> {
        let Some(ensured) = unless_cancelled(abort, self.deps.scratch.ensure_dir(scratch_dir)).await
        else {
            return Ok(None);
        };
        ensured?;

        let history_sequence = match request.history_sequence {
            Some(sequence) => sequence,
            None => {
                let Some(sequence) =
                    unless_cancelled(abort, self.deps.history.next_sequence(workspace_id)).await
                else {
                    return Ok(None);
                };
                sequence?
            }
        };

        let mut options = request.options.clone();
        let _ = apply_provider_compat(self.deps.provider.name(), &mut options);
        let stream_request = StreamRequest {
            model: request.model.clone(),
            messages: request.messages.clone(),
            tools: request.tools.clone(),
            options,
        };

        let provider_cancel = abort.child_token();
        let Some(opened) = unless_cancelled(
            abort,
            self.deps.provider.stream(&stream_request, provider_cancel.clone()),
        )
        .await
        else {
            return Ok(None);
        };
        let stream = opened?;

        Ok(Some(Prepared {
            history_sequence,
            request: stream_request,
            stream,
            provider_cancel,
        }))
    }

    fn abandon_setup(&self, slot: &WorkspaceSlot, abort: &AbortCoordinator, scratch_dir: PathBuf) {
        {
            let mut pending = slot.pending.lock();
            if pending.as_ref().is_some_and(|p| std::ptr::eq(Arc::as_ptr(p), abort)) {
                *pending = None;
            }
        }
        let scratch = Arc::clone(&self.deps.scratch);
        self.deps.tasks.spawn("scratch_cleanup", async move {
            scratch.remove_dir(&scratch_dir).await
        });
        abort.mark_drained();
    }

    // ── Stop ──

    /// Mark stopping, persist, cancel, and wait for cleanup.
    async fn hard_stop(handle: &SessionHandle) {
        handle.core.set_state(SessionState::Stopping);
        if let Err(e) = handle.writer.flush().await {
            warn!(workspace_id = %handle.core.workspace_id, error = %e, "partial flush before stop failed");
        }
        handle.abort.request_hard();
        handle.abort.wait_drained().await;
    }

    /// Stop the workspace's session.
    ///
    /// A hard stop returns once the session has been persisted, announced,
    /// and unregistered. A soft stop returns immediately; the session ends at
    /// its next content boundary. Returns `false` when nothing was running.
    #[instrument(skip(self), fields(workspace_id = %workspace_id, mode = mode.as_str()))]
    pub async fn stop_stream(
        &self,
        workspace_id: &WorkspaceId,
        mode: AbortMode,
    ) -> Result<bool, RuntimeError> {
        let Some(slot) = self.existing_slot(workspace_id) else {
            return Ok(false);
        };
        let target = Self::stop_target(&slot);
        self.done_with(workspace_id, slot);
        match (target, mode) {
            (None, _) => Ok(false),
            (Some(StopTarget::Active(handle)), AbortMode::Hard) => {
                info!(workspace_id = %workspace_id, token = %handle.core.token, "hard stop requested");
                Self::hard_stop(&handle).await;
                Ok(true)
            }
            (Some(StopTarget::Active(handle)), AbortMode::Soft) => {
                info!(workspace_id = %workspace_id, token = %handle.core.token, "soft stop requested");
                handle.abort.request_soft();
                Ok(true)
            }
            (Some(StopTarget::Pending(abort)), mode) => {
                debug!(workspace_id = %workspace_id, "stopping session still in setup");
                abort.request_hard();
                if mode == AbortMode::Hard {
                    abort.wait_drained().await;
                }
                Ok(true)
            }
        }
    }

    // ── Replay ──

    /// Catch-up events for the workspace's live session, or `None` if there
    /// is none. See [`replay`].
    pub fn replay_stream(&self, workspace_id: &WorkspaceId, cursor: Option<u64>) -> Option<Vec<SessionEvent>> {
        let handle = self.existing_slot(workspace_id)?.active()?;
        let core = &handle.core;
        Some(replay(core.start_event(), &core.base(), &core.parts(), cursor))
    }

    // ── Queries ──

    /// Lifecycle state of the workspace's session.
    pub fn get_state(&self, workspace_id: &WorkspaceId) -> SessionState {
        let Some(slot) = self.existing_slot(workspace_id) else {
            return SessionState::Idle;
        };
        if let Some(handle) = slot.active() {
            return handle.core.state();
        }
        if slot.pending.lock().is_some() {
            SessionState::Starting
        } else {
            SessionState::Idle
        }
    }

    /// Whether a session is registered for the workspace.
    pub fn is_active(&self, workspace_id: &WorkspaceId) -> bool {
        self.existing_slot(workspace_id)
            .is_some_and(|slot| slot.active.lock().is_some())
    }

    /// Summary of the workspace's live session.
    pub fn get_active_session_info(&self, workspace_id: &WorkspaceId) -> Option<SessionInfo> {
        self.existing_slot(workspace_id)?
            .active()
            .map(|handle| handle.core.info())
    }

    /// Workspaces with a registered session, sorted.
    pub fn list_active_workspaces(&self) -> Vec<WorkspaceId> {
        let mut active: Vec<_> = self
            .deps
            .slots
            .all()
            .into_iter()
            .filter(|(_, slot)| slot.active.lock().is_some())
            .map(|(id, _)| id)
            .collect();
        active.sort();
        active
    }

    // ── Recovery ──

    /// Commit a partial record left behind by an interrupted session.
    ///
    /// The record is stored at its own history sequence with the partial
    /// flag kept, then the partial record is removed. Fails with
    /// [`RuntimeError::SessionActive`] while a session is live.
    #[instrument(skip(self), fields(workspace_id = %workspace_id))]
    pub async fn recover_interrupted(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Option<HistoryMessage>, RuntimeError> {
        let slot = self.slot(workspace_id);
        let result = self.recover_in_slot(workspace_id, &slot).await;
        self.done_with(workspace_id, slot);
        result
    }

    async fn recover_in_slot(
        &self,
        workspace_id: &WorkspaceId,
        slot: &WorkspaceSlot,
    ) -> Result<Option<HistoryMessage>, RuntimeError> {
        let _admission = slot.admission.lock().await;
        if Self::stop_target(slot).is_some() {
            return Err(RuntimeError::SessionActive(workspace_id.to_string()));
        }
        let Some(partial) = self.deps.history.read_partial(workspace_id).await? else {
            return Ok(None);
        };
        self.deps.history.update_history(workspace_id, &partial).await?;
        self.deps.history.delete_partial(workspace_id).await?;
        info!(
            workspace_id = %workspace_id,
            message_id = %partial.id,
            parts = partial.parts.len(),
            "recovered interrupted message"
        );
        Ok(Some(partial))
    }

    // ── Shutdown ──

    /// Refuse new sessions, hard-stop every live one, and wait for all
    /// background work to finish.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let targets: Vec<_> = self
            .deps
            .slots
            .all()
            .iter()
            .filter_map(|(_, slot)| Self::stop_target(slot))
            .collect();
        info!(sessions = targets.len(), "shutting down session registry");

        let stops = targets.into_iter().map(|target| async move {
            match target {
                StopTarget::Active(handle) => Self::hard_stop(&handle).await,
                StopTarget::Pending(abort) => {
                    abort.request_hard();
                    abort.wait_drained().await;
                }
            }
        });
        let _ = futures::future::join_all(stops).await;
        self.deps.tasks.wait_idle().await;
        self.deps.slots.prune_all();
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("provider", &self.deps.provider.name())
            .field("workspaces", &self.deps.slots.len())
            .field("shutting_down", &self.shutting_down.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}
