//! Session lifecycle state and the public session summary.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use strand_core::ids::SessionToken;
use strand_core::usage::TokenUsage;

/// Lifecycle state of a workspace's session.
///
/// `Idle` means no session is registered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No session.
    Idle,
    /// Admitted; the provider call is being set up.
    Starting,
    /// Consuming the provider stream.
    Streaming,
    /// A stop was requested; cleanup is in progress.
    Stopping,
    /// Finished cleanly.
    Completed,
    /// Finished with a terminal failure.
    Error,
}

impl SessionState {
    /// Whether the session has reached an end state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    /// Lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Streaming => "streaming",
            Self::Stopping => "stopping",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of an active session for queries.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Session token.
    pub token: SessionToken,
    /// Id of the assistant message being generated.
    pub message_id: String,
    /// Model id.
    pub model: String,
    /// Current state.
    pub state: SessionState,
    /// Session start, milliseconds since epoch.
    pub start_time: u64,
    /// Parts accumulated so far.
    pub part_count: usize,
    /// History sequence of the message.
    pub history_sequence: u64,
    /// Scratch directory.
    pub scratch_dir: PathBuf,
    /// Cumulative usage so far.
    pub usage: TokenUsage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(SessionState::Completed.is_terminal());
        assert!(SessionState::Error.is_terminal());
        assert!(!SessionState::Stopping.is_terminal());
        assert!(!SessionState::Idle.is_terminal());
    }

    #[test]
    fn labels_match_serde() {
        for state in [
            SessionState::Idle,
            SessionState::Starting,
            SessionState::Streaming,
            SessionState::Stopping,
            SessionState::Completed,
            SessionState::Error,
        ] {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{state}\""));
        }
    }
}
