//! File-backed history store.
//!
//! Layout under the root, per workspace:
//!
//! ```text
//! <root>/<workspace>/partial.json
//! <root>/<workspace>/history/<sequence, 20 digits>.json
//! ```
//!
//! Every write goes to a temp file in the same directory and is renamed
//! into place, so readers never observe a torn record.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use strand_core::ids::WorkspaceId;
use strand_core::messages::HistoryMessage;
use tracing::debug;

use super::HistoryStore;
use crate::errors::HistoryError;

const PARTIAL_FILE: &str = "partial.json";
const HISTORY_DIR: &str = "history";

/// History store persisting JSON records under a root directory.
#[derive(Debug)]
pub struct FileHistoryStore {
    root: PathBuf,
    /// Highest sequence handed out per workspace in this process.
    allocated: Mutex<HashMap<WorkspaceId, u64>>,
}

impl FileHistoryStore {
    /// Store rooted at `root`. Directories are created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            allocated: Mutex::new(HashMap::new()),
        }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn workspace_dir(&self, workspace: &WorkspaceId) -> PathBuf {
        let safe: String = workspace
            .as_str()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.root.join(safe)
    }

    fn partial_path(&self, workspace: &WorkspaceId) -> PathBuf {
        self.workspace_dir(workspace).join(PARTIAL_FILE)
    }

    fn history_dir(&self, workspace: &WorkspaceId) -> PathBuf {
        self.workspace_dir(workspace).join(HISTORY_DIR)
    }

    fn entry_path(&self, workspace: &WorkspaceId, sequence: u64) -> PathBuf {
        self.history_dir(workspace).join(format!("{sequence:020}.json"))
    }

    /// Highest sequence number present on disk.
    async fn max_sequence_on_disk(&self, workspace: &WorkspaceId) -> Result<u64, HistoryError> {
        let dir = self.history_dir(workspace);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(io_error(&dir, e)),
        };
        let mut max = 0;
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(&dir, e))? {
            if let Some(seq) = parse_sequence(&entry.path()) {
                max = max.max(seq);
            }
        }
        Ok(max)
    }
}

fn io_error(path: &Path, source: std::io::Error) -> HistoryError {
    HistoryError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn parse_sequence(path: &Path) -> Option<u64> {
    if path.extension()? != "json" {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}

/// Write `bytes` to `path` via a sibling temp file and rename.
async fn write_atomic(path: &Path, bytes: Vec<u8>) -> Result<(), HistoryError> {
    let dir = path
        .parent()
        .ok_or_else(|| HistoryError::Store(format!("{} has no parent", path.display())))?;
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| io_error(dir, e))?;
    let tmp = dir.join(format!(".{}.tmp", uuid::Uuid::now_v7()));
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| io_error(&tmp, e))?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(io_error(path, e));
    }
    Ok(())
}

async fn read_message(path: &Path) -> Result<Option<HistoryMessage>, HistoryError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_error(path, e)),
    }
}

#[async_trait]
impl HistoryStore for FileHistoryStore {
    async fn write_partial(
        &self,
        workspace: &WorkspaceId,
        message: &HistoryMessage,
    ) -> Result<(), HistoryError> {
        let bytes = serde_json::to_vec(message)?;
        write_atomic(&self.partial_path(workspace), bytes).await
    }

    async fn read_partial(
        &self,
        workspace: &WorkspaceId,
    ) -> Result<Option<HistoryMessage>, HistoryError> {
        read_message(&self.partial_path(workspace)).await
    }

    async fn delete_partial(&self, workspace: &WorkspaceId) -> Result<(), HistoryError> {
        let path = self.partial_path(workspace);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    async fn update_history(
        &self,
        workspace: &WorkspaceId,
        message: &HistoryMessage,
    ) -> Result<(), HistoryError> {
        let path = self.entry_path(workspace, message.metadata.history_sequence);
        let bytes = serde_json::to_vec_pretty(message)?;
        write_atomic(&path, bytes).await?;
        debug!(
            workspace_id = %workspace,
            sequence = message.metadata.history_sequence,
            "history entry written"
        );
        Ok(())
    }

    async fn read_history(
        &self,
        workspace: &WorkspaceId,
    ) -> Result<Vec<HistoryMessage>, HistoryError> {
        let dir = self.history_dir(workspace);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&dir, e)),
        };
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(&dir, e))? {
            let path = entry.path();
            if let Some(seq) = parse_sequence(&path) {
                paths.push((seq, path));
            }
        }
        paths.sort_by_key(|(seq, _)| *seq);

        let mut messages = Vec::with_capacity(paths.len());
        for (_, path) in paths {
            if let Some(message) = read_message(&path).await? {
                messages.push(message);
            }
        }
        Ok(messages)
    }

    async fn next_sequence(&self, workspace: &WorkspaceId) -> Result<u64, HistoryError> {
        let on_disk = self.max_sequence_on_disk(workspace).await?;
        let mut allocated = self.allocated.lock();
        let slot = allocated.entry(workspace.clone()).or_insert(0);
        *slot = (*slot).max(on_disk) + 1;
        Ok(*slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_core::parts::Part;

    fn ws() -> WorkspaceId {
        WorkspaceId::new("team/ws-1")
    }

    fn assistant(seq: u64, text: &str, partial: bool) -> HistoryMessage {
        let mut msg = HistoryMessage::user(format!("m{seq}"), text, seq);
        msg.role = strand_core::messages::Role::Assistant;
        msg.metadata.partial = partial;
        msg
    }

    #[tokio::test]
    async fn partial_roundtrip_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileHistoryStore::new(dir.path());

        assert!(store.read_partial(&ws()).await.unwrap().is_none());
        let msg = assistant(3, "draft", true);
        store.write_partial(&ws(), &msg).await.unwrap();
        assert_eq!(store.read_partial(&ws()).await.unwrap(), Some(msg));

        store.delete_partial(&ws()).await.unwrap();
        assert!(store.read_partial(&ws()).await.unwrap().is_none());
        // Deleting again is a no-op.
        store.delete_partial(&ws()).await.unwrap();
    }

    #[tokio::test]
    async fn workspace_ids_are_path_safe() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileHistoryStore::new(dir.path());
        store
            .write_partial(&ws(), &assistant(1, "x", true))
            .await
            .unwrap();
        assert!(dir.path().join("team_ws-1").join(PARTIAL_FILE).exists());
    }

    #[tokio::test]
    async fn history_is_ordered_and_replaceable() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileHistoryStore::new(dir.path());

        store.update_history(&ws(), &assistant(10, "ten", false)).await.unwrap();
        store.update_history(&ws(), &assistant(2, "two", false)).await.unwrap();
        store.update_history(&ws(), &assistant(2, "two v2", false)).await.unwrap();

        let history = store.read_history(&ws()).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].text(), "two v2");
        assert_eq!(history[1].text(), "ten");
        assert!(matches!(history[1].parts[0], Part::Text { .. }));
    }

    #[tokio::test]
    async fn next_sequence_follows_disk_and_prior_allocations() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileHistoryStore::new(dir.path());

        assert_eq!(store.next_sequence(&ws()).await.unwrap(), 1);
        assert_eq!(store.next_sequence(&ws()).await.unwrap(), 2);
        store.update_history(&ws(), &assistant(7, "x", false)).await.unwrap();
        assert_eq!(store.next_sequence(&ws()).await.unwrap(), 8);

        // A fresh store picks up where the disk left off.
        let reopened = FileHistoryStore::new(dir.path());
        assert_eq!(reopened.next_sequence(&ws()).await.unwrap(), 8);
    }

    #[tokio::test]
    async fn no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileHistoryStore::new(dir.path());
        for i in 0..5 {
            store
                .write_partial(&ws(), &assistant(1, &format!("v{i}"), true))
                .await
                .unwrap();
        }
        let mut names = Vec::new();
        let mut rd = tokio::fs::read_dir(dir.path().join("team_ws-1")).await.unwrap();
        while let Some(e) = rd.next_entry().await.unwrap() {
            names.push(e.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec![PARTIAL_FILE.to_string()]);
    }
}
