//! Throttled, serialized persistence of a session's partial record.
//!
//! Content deltas call [`PartWriter::schedule`], which coalesces into at
//! most one pending write per interval. Tool boundaries call
//! [`PartWriter::flush`] for an immediate write. Writes are serialized by an
//! async lock, so two writes for one workspace never overlap, and each write
//! snapshots the source at the moment it acquires the lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use strand_core::ids::WorkspaceId;
use strand_core::messages::HistoryMessage;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::background::BackgroundTasks;
use crate::errors::HistoryError;
use crate::history::HistoryStore;

/// Produces the partial record to persist.
pub trait PartialSource: Send + Sync {
    /// Snapshot of the in-flight message.
    fn partial_record(&self) -> HistoryMessage;
}

struct PendingTimer {
    id: u64,
    cancel: CancellationToken,
}

/// Partial-record writer for one session.
pub struct PartWriter {
    workspace_id: WorkspaceId,
    store: Arc<dyn HistoryStore>,
    source: Arc<dyn PartialSource>,
    tasks: Arc<BackgroundTasks>,
    interval: Duration,
    write_lock: tokio::sync::Mutex<()>,
    timer: Mutex<Option<PendingTimer>>,
    next_timer: AtomicU64,
    last_write: Mutex<Instant>,
    closed: AtomicBool,
    shutdown: CancellationToken,
    writes: AtomicU64,
}

impl PartWriter {
    /// Writer for `workspace_id`, snapshotting `source`.
    pub fn new(
        workspace_id: WorkspaceId,
        store: Arc<dyn HistoryStore>,
        source: Arc<dyn PartialSource>,
        tasks: Arc<BackgroundTasks>,
        interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            workspace_id,
            store,
            source,
            tasks,
            interval,
            write_lock: tokio::sync::Mutex::new(()),
            timer: Mutex::new(None),
            next_timer: AtomicU64::new(0),
            last_write: Mutex::new(Instant::now()),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            writes: AtomicU64::new(0),
        })
    }

    /// Request a write no sooner than one interval after the previous one.
    /// Coalesces with an already pending write.
    pub fn schedule(self: &Arc<Self>) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let mut timer = self.timer.lock();
        if timer.is_some() {
            return;
        }
        let delay = self
            .interval
            .saturating_sub(self.last_write.lock().elapsed());
        let id = self.next_timer.fetch_add(1, Ordering::Relaxed);
        let cancel = self.shutdown.child_token();
        *timer = Some(PendingTimer {
            id,
            cancel: cancel.clone(),
        });
        drop(timer);

        let writer = Arc::clone(self);
        self.tasks.spawn("partial_write", async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(()),
                () = tokio::time::sleep(delay) => {}
            }
            writer.clear_timer(id);
            writer.write().await
        });
    }

    /// Write now, superseding any pending throttled write.
    pub async fn flush(&self) -> Result<(), HistoryError> {
        if let Some(pending) = self.timer.lock().take() {
            pending.cancel.cancel();
        }
        self.write().await
    }

    /// Stop accepting writes. Waits for an in-flight write to finish.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.shutdown.cancel();
        let _ = self.timer.lock().take();
        let _guard = self.write_lock.lock().await;
    }

    /// Whether [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Completed writes.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    fn clear_timer(&self, id: u64) {
        let mut timer = self.timer.lock();
        if timer.as_ref().is_some_and(|t| t.id == id) {
            *timer = None;
        }
    }

    async fn write(&self) -> Result<(), HistoryError> {
        let _guard = self.write_lock.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        let record = self.source.partial_record();
        *self.last_write.lock() = Instant::now();
        self.store.write_partial(&self.workspace_id, &record).await?;
        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(
            workspace_id = %self.workspace_id,
            parts = record.parts.len(),
            writes,
            "partial record written"
        );
        Ok(())
    }
}
