//! Per-session scratch directories for tool execution.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use strand_core::ids::SessionToken;

use crate::errors::ScratchError;

/// Directory management consumed from the tool-execution runtime.
#[async_trait]
pub trait ScratchRuntime: Send + Sync {
    /// Default scratch path for a session token.
    fn resolve(&self, token: &SessionToken) -> PathBuf;

    /// Create `path` (and parents). Succeeds if it already exists.
    async fn ensure_dir(&self, path: &Path) -> Result<(), ScratchError>;

    /// Remove `path` recursively. Succeeds if it is already gone.
    async fn remove_dir(&self, path: &Path) -> Result<(), ScratchError>;
}

/// Scratch directories on the local filesystem under one root.
#[derive(Clone, Debug)]
pub struct LocalScratch {
    root: PathBuf,
}

impl LocalScratch {
    /// Scratch runtime rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn io_error(path: &Path, source: std::io::Error) -> ScratchError {
        ScratchError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

#[async_trait]
impl ScratchRuntime for LocalScratch {
    fn resolve(&self, token: &SessionToken) -> PathBuf {
        self.root.join(token.as_str())
    }

    async fn ensure_dir(&self, path: &Path) -> Result<(), ScratchError> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| Self::io_error(path, e))
    }

    async fn remove_dir(&self, path: &Path) -> Result<(), ScratchError> {
        // Only directories this runtime hands out are removed.
        if !path.starts_with(&self.root) || path == self.root {
            return Err(ScratchError::OutsideRoot {
                path: path.display().to_string(),
            });
        }
        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::io_error(path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn ensure_is_idempotent_and_remove_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = LocalScratch::new(dir.path());
        let path = scratch.resolve(&SessionToken::new("abcd1234"));
        assert_eq!(path, dir.path().join("abcd1234"));

        scratch.ensure_dir(&path).await.unwrap();
        scratch.ensure_dir(&path).await.unwrap();
        tokio::fs::write(path.join("out.txt"), b"x").await.unwrap();
        assert!(path.is_dir());

        scratch.remove_dir(&path).await.unwrap();
        assert!(!path.exists());
        // Already gone is fine.
        scratch.remove_dir(&path).await.unwrap();
    }

    #[tokio::test]
    async fn refuses_to_remove_outside_root() {
        let dir = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let scratch = LocalScratch::new(dir.path());
        assert_matches!(
            scratch.remove_dir(other.path()).await,
            Err(ScratchError::OutsideRoot { .. })
        );
        assert_matches!(
            scratch.remove_dir(dir.path()).await,
            Err(ScratchError::OutsideRoot { .. })
        );
        assert!(other.path().exists());
    }
}
