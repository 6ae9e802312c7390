//! History and partial-record persistence consumed by the engine.
//!
//! The store owns two records per workspace: at most one partial record
//! (the crash-recoverable snapshot of an in-flight message) and the ordered
//! history entries keyed by sequence number. Stores serialize writes per
//! workspace; the engine never issues two writes for one workspace
//! concurrently.

mod file;
mod memory;

pub use file::FileHistoryStore;
pub use memory::{HistoryOp, InMemoryHistoryStore};

use async_trait::async_trait;
use strand_core::ids::WorkspaceId;
use strand_core::messages::HistoryMessage;

use crate::errors::HistoryError;

/// Durable history collaborator.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Replace the workspace's partial record.
    async fn write_partial(
        &self,
        workspace: &WorkspaceId,
        message: &HistoryMessage,
    ) -> Result<(), HistoryError>;

    /// Current partial record, if any.
    async fn read_partial(
        &self,
        workspace: &WorkspaceId,
    ) -> Result<Option<HistoryMessage>, HistoryError>;

    /// Remove the partial record. Succeeds if there is none.
    async fn delete_partial(&self, workspace: &WorkspaceId) -> Result<(), HistoryError>;

    /// Store `message` at `message.metadata.history_sequence`, replacing any
    /// entry already there.
    async fn update_history(
        &self,
        workspace: &WorkspaceId,
        message: &HistoryMessage,
    ) -> Result<(), HistoryError>;

    /// All history entries in sequence order.
    async fn read_history(
        &self,
        workspace: &WorkspaceId,
    ) -> Result<Vec<HistoryMessage>, HistoryError>;

    /// Allocate the next sequence number for the workspace.
    async fn next_sequence(&self, workspace: &WorkspaceId) -> Result<u64, HistoryError>;
}
