//! In-memory history store with an operation log.
//!
//! Used by tests and embedders that persist elsewhere. Every mutation is
//! appended to an ordered log so callers can assert on write ordering, and
//! concurrent writes per store are counted to detect interleaving.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use strand_core::ids::WorkspaceId;
use strand_core::messages::HistoryMessage;

use super::HistoryStore;
use crate::errors::HistoryError;

/// A recorded store mutation.
#[derive(Clone, Debug, PartialEq)]
pub enum HistoryOp {
    /// `write_partial`.
    WritePartial {
        /// Workspace.
        workspace: WorkspaceId,
        /// Record written.
        message: HistoryMessage,
    },
    /// `delete_partial`.
    DeletePartial {
        /// Workspace.
        workspace: WorkspaceId,
    },
    /// `update_history`.
    UpdateHistory {
        /// Workspace.
        workspace: WorkspaceId,
        /// Entry written.
        message: HistoryMessage,
    },
}

impl HistoryOp {
    /// Workspace the op touched.
    pub fn workspace(&self) -> &WorkspaceId {
        match self {
            Self::WritePartial { workspace, .. }
            | Self::DeletePartial { workspace }
            | Self::UpdateHistory { workspace, .. } => workspace,
        }
    }

    /// Message id carried by the op, if any.
    pub fn message_id(&self) -> Option<&str> {
        match self {
            Self::WritePartial { message, .. } | Self::UpdateHistory { message, .. } => {
                Some(&message.id)
            }
            Self::DeletePartial { .. } => None,
        }
    }
}

#[derive(Default)]
struct Inner {
    partials: HashMap<WorkspaceId, HistoryMessage>,
    history: HashMap<WorkspaceId, BTreeMap<u64, HistoryMessage>>,
    sequences: HashMap<WorkspaceId, u64>,
    ops: Vec<HistoryOp>,
    fail_writes: bool,
}

/// History store kept in memory.
#[derive(Default)]
pub struct InMemoryHistoryStore {
    inner: Mutex<Inner>,
    write_delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl InMemoryHistoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose writes take `delay` to complete.
    pub fn with_write_delay(delay: Duration) -> Self {
        Self {
            write_delay: Some(delay),
            ..Self::default()
        }
    }

    /// Make every subsequent write fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.lock().fail_writes = fail;
    }

    /// Mutations so far, in order.
    pub fn ops(&self) -> Vec<HistoryOp> {
        self.inner.lock().ops.clone()
    }

    /// Partial records written so far for `workspace`.
    pub fn partial_writes(&self, workspace: &WorkspaceId) -> Vec<HistoryMessage> {
        self.inner
            .lock()
            .ops
            .iter()
            .filter_map(|op| match op {
                HistoryOp::WritePartial { workspace: ws, message } if ws == workspace => {
                    Some(message.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Highest number of writes observed in flight at once.
    pub fn max_concurrent_writes(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn write<F>(&self, op: HistoryOp, apply: F) -> Result<(), HistoryError>
    where
        F: FnOnce(&mut Inner),
    {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }
        let result = {
            let mut inner = self.inner.lock();
            if inner.fail_writes {
                Err(HistoryError::Store("injected write failure".into()))
            } else {
                apply(&mut inner);
                inner.ops.push(op);
                Ok(())
            }
        };
        let _ = self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

impl std::fmt::Debug for InMemoryHistoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryHistoryStore")
            .field("ops", &self.inner.lock().ops.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn write_partial(
        &self,
        workspace: &WorkspaceId,
        message: &HistoryMessage,
    ) -> Result<(), HistoryError> {
        let op = HistoryOp::WritePartial {
            workspace: workspace.clone(),
            message: message.clone(),
        };
        self.write(op, |inner| {
            let _ = inner.partials.insert(workspace.clone(), message.clone());
        })
        .await
    }

    async fn read_partial(
        &self,
        workspace: &WorkspaceId,
    ) -> Result<Option<HistoryMessage>, HistoryError> {
        Ok(self.inner.lock().partials.get(workspace).cloned())
    }

    async fn delete_partial(&self, workspace: &WorkspaceId) -> Result<(), HistoryError> {
        let op = HistoryOp::DeletePartial {
            workspace: workspace.clone(),
        };
        self.write(op, |inner| {
            let _ = inner.partials.remove(workspace);
        })
        .await
    }

    async fn update_history(
        &self,
        workspace: &WorkspaceId,
        message: &HistoryMessage,
    ) -> Result<(), HistoryError> {
        let op = HistoryOp::UpdateHistory {
            workspace: workspace.clone(),
            message: message.clone(),
        };
        self.write(op, |inner| {
            let _ = inner
                .history
                .entry(workspace.clone())
                .or_default()
                .insert(message.metadata.history_sequence, message.clone());
        })
        .await
    }

    async fn read_history(
        &self,
        workspace: &WorkspaceId,
    ) -> Result<Vec<HistoryMessage>, HistoryError> {
        Ok(self
            .inner
            .lock()
            .history
            .get(workspace)
            .map(|entries| entries.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn next_sequence(&self, workspace: &WorkspaceId) -> Result<u64, HistoryError> {
        let mut inner = self.inner.lock();
        let stored = inner
            .history
            .get(workspace)
            .and_then(|entries| entries.keys().next_back().copied())
            .unwrap_or(0);
        let slot = inner.sequences.entry(workspace.clone()).or_insert(0);
        *slot = (*slot).max(stored) + 1;
        Ok(*slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn ws() -> WorkspaceId {
        WorkspaceId::new("ws")
    }

    #[tokio::test]
    async fn records_ops_in_order() {
        let store = InMemoryHistoryStore::new();
        let msg = HistoryMessage::user("m1", "hi", 1);
        store.write_partial(&ws(), &msg).await.unwrap();
        store.update_history(&ws(), &msg).await.unwrap();
        store.delete_partial(&ws()).await.unwrap();

        let ops = store.ops();
        assert_eq!(ops.len(), 3);
        assert_matches!(ops[0], HistoryOp::WritePartial { .. });
        assert_matches!(ops[1], HistoryOp::UpdateHistory { .. });
        assert_matches!(ops[2], HistoryOp::DeletePartial { .. });
        assert_eq!(ops[0].message_id(), Some("m1"));
        assert!(store.read_partial(&ws()).await.unwrap().is_none());
        assert_eq!(store.read_history(&ws()).await.unwrap(), vec![msg]);
    }

    #[tokio::test]
    async fn injected_failures_leave_state_untouched() {
        let store = InMemoryHistoryStore::new();
        store.set_fail_writes(true);
        let msg = HistoryMessage::user("m1", "hi", 1);
        assert!(store.write_partial(&ws(), &msg).await.is_err());
        assert!(store.ops().is_empty());
        assert!(store.read_partial(&ws()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sequences_increase() {
        let store = InMemoryHistoryStore::new();
        assert_eq!(store.next_sequence(&ws()).await.unwrap(), 1);
        store
            .update_history(&ws(), &HistoryMessage::user("m", "x", 5))
            .await
            .unwrap();
        assert_eq!(store.next_sequence(&ws()).await.unwrap(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn counts_concurrent_writes() {
        let store = InMemoryHistoryStore::with_write_delay(Duration::from_millis(10));
        let msg = HistoryMessage::user("m1", "hi", 1);
        let ws = ws();
        let (a, b) = tokio::join!(store.write_partial(&ws, &msg), store.write_partial(&ws, &msg));
        a.unwrap();
        b.unwrap();
        assert_eq!(store.max_concurrent_writes(), 2);
    }
}
