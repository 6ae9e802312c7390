//! Runtime error types.

use strand_core::errors::ErrorKind;
use strand_llm::ProviderError;

/// Errors from a history store.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// Filesystem failure.
    #[error("history I/O error at {path}: {source}")]
    Io {
        /// Path involved.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Record could not be (de)serialized.
    #[error("history record is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Store-specific failure.
    #[error("history store error: {0}")]
    Store(String),
}

/// Errors from the scratch-directory runtime.
#[derive(Debug, thiserror::Error)]
pub enum ScratchError {
    /// Filesystem failure.
    #[error("scratch I/O error at {path}: {source}")]
    Io {
        /// Path involved.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Path lies outside the scratch root.
    #[error("scratch path {path} is outside the scratch root")]
    OutsideRoot {
        /// Offending path.
        path: String,
    },
}

/// Errors surfaced by the session registry.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The provider rejected the call before streaming began.
    #[error("provider rejected the call: {0}")]
    Provider(#[from] ProviderError),

    /// History collaborator failure.
    #[error(transparent)]
    History(#[from] HistoryError),

    /// Scratch directory could not be prepared.
    #[error(transparent)]
    Scratch(#[from] ScratchError),

    /// The operation needs the workspace to be idle.
    #[error("workspace {0} has an active session")]
    SessionActive(String),

    /// The registry no longer admits sessions.
    #[error("session registry is shutting down")]
    ShuttingDown,
}

impl RuntimeError {
    /// Stable snake_case category for logs and metrics.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Provider(_) => "provider",
            Self::History(_) => "history",
            Self::Scratch(_) => "scratch",
            Self::SessionActive(_) => "session_active",
            Self::ShuttingDown => "shutting_down",
        }
    }

    /// Failure taxonomy value.
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            Self::Provider(e) => e.kind(),
            _ => ErrorKind::Unknown,
        }
    }
}
