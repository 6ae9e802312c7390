//! Live session identity and accumulated data.
//!
//! [`SessionCore`] owns everything that is read by more than one party: the
//! loop appends parts, the partial writer snapshots them, replay projects
//! them, and queries summarize them. All mutable data sits behind one lock
//! so a snapshot never observes a half-applied event.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use strand_core::clock::LogicalClock;
use strand_core::errors::ErrorKind;
use strand_core::events::{EventBase, SessionEvent};
use strand_core::ids::{SessionToken, WorkspaceId};
use strand_core::messages::{HistoryMessage, MessageMetadata, Role};
use strand_core::parts::Part;
use tokio::time::Instant;

use super::abort::AbortCoordinator;
use super::part_writer::{PartWriter, PartialSource};
use super::state::{SessionInfo, SessionState};
use super::usage::{FinalUsage, UsageAggregator};

/// Mutable per-session data.
#[derive(Debug)]
pub(crate) struct SessionData {
    pub parts: Vec<Part>,
    pub clock: LogicalClock,
    pub usage: UsageAggregator,
    pub failure: Option<(String, ErrorKind)>,
}

/// Identity plus guarded data of one session.
#[derive(Debug)]
pub(crate) struct SessionCore {
    pub workspace_id: WorkspaceId,
    pub token: SessionToken,
    pub message_id: String,
    pub model: String,
    pub history_sequence: u64,
    pub start_time: u64,
    pub started: Instant,
    pub scratch_dir: PathBuf,
    state: Mutex<SessionState>,
    data: Mutex<SessionData>,
}

/// Fields fixed at admission.
pub(crate) struct SessionIdentity {
    pub workspace_id: WorkspaceId,
    pub token: SessionToken,
    pub message_id: String,
    pub model: String,
    pub history_sequence: u64,
    pub start_time: u64,
    pub scratch_dir: PathBuf,
}

impl SessionCore {
    pub fn new(identity: SessionIdentity) -> Self {
        let usage = UsageAggregator::new(identity.model.clone());
        Self {
            workspace_id: identity.workspace_id,
            token: identity.token,
            message_id: identity.message_id,
            model: identity.model,
            history_sequence: identity.history_sequence,
            start_time: identity.start_time,
            started: Instant::now(),
            scratch_dir: identity.scratch_dir,
            state: Mutex::new(SessionState::Starting),
            data: Mutex::new(SessionData {
                parts: Vec::new(),
                clock: LogicalClock::new(),
                usage,
                failure: None,
            }),
        }
    }

    pub fn base(&self) -> EventBase {
        EventBase::new(self.workspace_id.clone(), self.message_id.clone())
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Move to `next` unless the session already ended.
    pub fn set_state(&self, next: SessionState) {
        let mut state = self.state.lock();
        if !state.is_terminal() {
            *state = next;
        }
    }

    pub fn with_data<R>(&self, f: impl FnOnce(&mut SessionData) -> R) -> R {
        f(&mut self.data.lock())
    }

    pub fn parts(&self) -> Vec<Part> {
        self.data.lock().parts.clone()
    }

    pub fn set_failure(&self, error: String, kind: ErrorKind) {
        self.data.lock().failure = Some((error, kind));
    }

    pub fn duration_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    pub fn start_event(&self) -> SessionEvent {
        SessionEvent::SessionStart {
            base: self.base(),
            token: self.token.clone(),
            model: self.model.clone(),
            history_sequence: self.history_sequence,
            start_time: self.start_time,
        }
    }

    pub fn info(&self) -> SessionInfo {
        let (part_count, usage) = self.with_data(|d| (d.parts.len(), d.usage.cumulative()));
        SessionInfo {
            token: self.token.clone(),
            message_id: self.message_id.clone(),
            model: self.model.clone(),
            state: self.state(),
            start_time: self.start_time,
            part_count,
            history_sequence: self.history_sequence,
            scratch_dir: self.scratch_dir.clone(),
            usage,
        }
    }

    fn metadata(&self) -> MessageMetadata {
        MessageMetadata {
            history_sequence: self.history_sequence,
            model: Some(self.model.clone()),
            timestamp: self.start_time,
            ..MessageMetadata::default()
        }
    }

    /// The committed history entry for a clean finish.
    pub fn final_message(&self, parts: Vec<Part>, usage: &FinalUsage) -> HistoryMessage {
        HistoryMessage {
            id: self.message_id.clone(),
            role: Role::Assistant,
            parts,
            metadata: MessageMetadata {
                usage: Some(usage.usage),
                context_usage: usage.context_usage,
                cost: usage.cost,
                duration_ms: Some(self.duration_ms()),
                ..self.metadata()
            },
        }
    }
}

impl PartialSource for SessionCore {
    fn partial_record(&self) -> HistoryMessage {
        let data = self.data.lock();
        let cumulative = data.usage.cumulative();
        let (error, error_kind) = match &data.failure {
            Some((error, kind)) => (Some(error.clone()), Some(*kind)),
            None => (None, None),
        };
        HistoryMessage {
            id: self.message_id.clone(),
            role: Role::Assistant,
            parts: data.parts.clone(),
            metadata: MessageMetadata {
                partial: true,
                error,
                error_kind,
                usage: (!cumulative.is_zero()).then_some(cumulative),
                context_usage: data.usage.last_step(),
                cost: data.usage.cumulative_cost(),
                ..self.metadata()
            },
        }
    }
}

/// Registry entry for a live session.
pub(crate) struct SessionHandle {
    pub core: Arc<SessionCore>,
    pub writer: Arc<PartWriter>,
    pub abort: Arc<AbortCoordinator>,
}
