//! Shared harness for registry integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use strand_core::events::SessionEvent;
use strand_core::ids::{SessionToken, WorkspaceId};
use strand_core::messages::HistoryMessage;
use strand_llm::testutil::ScriptedProvider;
use strand_runtime::{
    EngineConfig, InMemoryHistoryStore, LocalScratch, ScratchError, ScratchRuntime,
    SessionRegistry, StartRequest,
};
use tempfile::TempDir;
use tokio::sync::{Notify, broadcast};

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Harness {
    pub registry: Arc<SessionRegistry>,
    pub provider: ScriptedProvider,
    pub history: Arc<InMemoryHistoryStore>,
    pub events: broadcast::Receiver<SessionEvent>,
    pub dir: TempDir,
}

pub fn config() -> EngineConfig {
    EngineConfig {
        partial_write_interval: Duration::from_millis(20),
        metadata_timeout: Duration::from_millis(200),
        ..EngineConfig::default()
    }
}

pub fn harness(provider: ScriptedProvider) -> Harness {
    harness_with(provider, config(), None)
}

pub fn harness_with(
    provider: ScriptedProvider,
    config: EngineConfig,
    scratch: Option<Arc<dyn ScratchRuntime>>,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let history = Arc::new(InMemoryHistoryStore::new());
    let scratch =
        scratch.unwrap_or_else(|| Arc::new(LocalScratch::new(dir.path().join("scratch"))));
    let registry = Arc::new(SessionRegistry::new(
        Arc::new(provider.clone()),
        Arc::clone(&history) as _,
        scratch,
        config,
    ));
    let events = registry.subscribe();
    Harness {
        registry,
        provider,
        history,
        events,
        dir,
    }
}

pub fn ws(name: &str) -> WorkspaceId {
    WorkspaceId::new(name)
}

pub fn request() -> StartRequest {
    StartRequest::new("test-model", vec![HistoryMessage::user("u1", "hello", 1)])
        .with_history_sequence(2)
}

pub async fn next_event(rx: &mut broadcast::Receiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(EVENT_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Events up to and including the first terminal one.
pub async fn collect_until_terminal(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    loop {
        let event = next_event(rx).await;
        let done = event.is_terminal();
        events.push(event);
        if done {
            return events;
        }
    }
}

/// Events up to and including the first one of `event_type`.
pub async fn collect_until(
    rx: &mut broadcast::Receiver<SessionEvent>,
    event_type: &str,
) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    loop {
        let event = next_event(rx).await;
        let done = event.event_type() == event_type;
        events.push(event);
        if done {
            return events;
        }
    }
}

pub fn types(events: &[SessionEvent]) -> Vec<&str> {
    events.iter().map(SessionEvent::event_type).collect()
}

/// Scratch runtime whose `ensure_dir` blocks until released.
pub struct GatedScratch {
    root: PathBuf,
    pub gate: Arc<Notify>,
}

impl GatedScratch {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            gate: Arc::new(Notify::new()),
        }
    }
}

#[async_trait]
impl ScratchRuntime for GatedScratch {
    fn resolve(&self, token: &SessionToken) -> PathBuf {
        self.root.join(token.as_str())
    }

    async fn ensure_dir(&self, _path: &Path) -> Result<(), ScratchError> {
        self.gate.notified().await;
        Ok(())
    }

    async fn remove_dir(&self, _path: &Path) -> Result<(), ScratchError> {
        Ok(())
    }
}
