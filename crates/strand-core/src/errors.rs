//! Failure taxonomy shared by providers, the runtime, and persisted records.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Category of a session failure.
///
/// Derived from provider status codes and structured error bodies, with
/// string matching as a fallback. Persisted on error-tagged partial records
/// and carried by `error` events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Missing or rejected credentials.
    Authentication,
    /// Rate limit or quota exhausted.
    RateLimit,
    /// Prompt exceeds the model's context window.
    ContextExceeded,
    /// Model id unknown to the provider.
    ModelNotFound,
    /// Transport failure before a response arrived.
    Network,
    /// Cancelled by a caller.
    Aborted,
    /// Provider-side 5xx / overload.
    ServerError,
    /// An internal retry was attempted and also failed.
    RetryFailed,
    /// Any other structured API error.
    Api,
    /// Nothing more specific could be determined.
    Unknown,
}

impl ErrorKind {
    /// Stable kebab-case label (matches the serialized form).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Authentication => "authentication",
            Self::RateLimit => "rate-limit",
            Self::ContextExceeded => "context-exceeded",
            Self::ModelNotFound => "model-not-found",
            Self::Network => "network",
            Self::Aborted => "aborted",
            Self::ServerError => "server-error",
            Self::RetryFailed => "retry-failed",
            Self::Api => "api",
            Self::Unknown => "unknown",
        }
    }

    /// Classify a bare error message by substring.
    ///
    /// Used only when no status code or structured body is available.
    pub fn from_message(message: &str) -> Self {
        let lower = message.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

        if has(&["abort", "cancelled", "canceled"]) {
            Self::Aborted
        } else if has(&[
            "api key",
            "api_key",
            "unauthorized",
            "authentication",
            "invalid x-api-key",
            "forbidden",
        ]) {
            Self::Authentication
        } else if has(&["rate limit", "rate_limit", "too many requests", "quota"]) {
            Self::RateLimit
        } else if has(&[
            "context length",
            "context_length",
            "context window",
            "prompt is too long",
            "maximum context",
            "too many tokens",
        ]) {
            Self::ContextExceeded
        } else if has(&["model not found", "model_not_found", "does not exist", "unknown model"]) {
            Self::ModelNotFound
        } else if has(&[
            "econnrefused",
            "econnreset",
            "etimedout",
            "network",
            "connection",
            "dns",
            "socket hang up",
        ]) {
            Self::Network
        } else if has(&["overloaded", "internal server error", "service unavailable", "bad gateway"]) {
            Self::ServerError
        } else {
            Self::Unknown
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_uses_kebab_case() {
        let s = serde_json::to_string(&ErrorKind::ContextExceeded).unwrap();
        assert_eq!(s, "\"context-exceeded\"");
        let back: ErrorKind = serde_json::from_str("\"rate-limit\"").unwrap();
        assert_eq!(back, ErrorKind::RateLimit);
    }

    #[test]
    fn as_str_matches_serde() {
        for kind in [
            ErrorKind::Authentication,
            ErrorKind::RateLimit,
            ErrorKind::ContextExceeded,
            ErrorKind::ModelNotFound,
            ErrorKind::Network,
            ErrorKind::Aborted,
            ErrorKind::ServerError,
            ErrorKind::RetryFailed,
            ErrorKind::Api,
            ErrorKind::Unknown,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn message_fallback() {
        assert_eq!(
            ErrorKind::from_message("Invalid API key provided"),
            ErrorKind::Authentication
        );
        assert_eq!(
            ErrorKind::from_message("Too Many Requests"),
            ErrorKind::RateLimit
        );
        assert_eq!(
            ErrorKind::from_message("prompt is too long: 210000 tokens"),
            ErrorKind::ContextExceeded
        );
        assert_eq!(
            ErrorKind::from_message("connect ECONNREFUSED 127.0.0.1:443"),
            ErrorKind::Network
        );
        assert_eq!(ErrorKind::from_message("Overloaded"), ErrorKind::ServerError);
        assert_eq!(ErrorKind::from_message("request was aborted"), ErrorKind::Aborted);
        assert_eq!(ErrorKind::from_message("something odd"), ErrorKind::Unknown);
    }
}
