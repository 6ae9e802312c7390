//! Branded identifier newtypes.
//!
//! Workspaces and session tokens are both plain strings on the wire. Wrapping
//! them keeps a token from being passed where a workspace is expected.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Length of a generated session token, in hex characters.
const TOKEN_LEN: usize = 8;

/// Identifies a workspace. At most one session is live per workspace.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkspaceId(String);

impl WorkspaceId {
    /// Wrap a raw workspace id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkspaceId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for WorkspaceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Short random token identifying one session within its workspace.
///
/// Also names the session's scratch directory.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    /// Generate a fresh random token.
    pub fn generate() -> Self {
        let raw: u64 = rand::random();
        let hex = format!("{raw:016x}");
        Self(hex[..TOKEN_LEN].to_owned())
    }

    /// Wrap a caller-provided token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Borrow the raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_token_is_short_hex() {
        let token = SessionToken::generate();
        assert_eq!(token.as_str().len(), TOKEN_LEN);
        assert!(token.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn generated_tokens_differ() {
        let a = SessionToken::generate();
        let b = SessionToken::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn workspace_id_serializes_transparently() {
        let id = WorkspaceId::new("ws-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"ws-1\"");
        assert_eq!(id.to_string(), "ws-1");
    }
}
