//! Provider error type and failure classification.
//!
//! Classification runs in a fixed order: explicit variant, then HTTP status,
//! then the structured body (`error.type` / `error.code`), then a substring
//! match on the message.

use serde_json::Value;
use strand_core::errors::ErrorKind;

/// Error code some providers return when a continuation handle has expired.
const CONTINUATION_LOST_CODE: &str = "previous_response_not_found";

/// Body codes that mean the prompt no longer fits the context window.
const CONTEXT_CODES: &[&str] = &[
    "context_length_exceeded",
    "string_above_max_length",
    "request_too_large",
];

/// Errors from a model provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Credentials missing or malformed before any request was made.
    #[error("authentication failed: {message}")]
    Auth {
        /// Description.
        message: String,
    },

    /// Provider rate limit.
    #[error("rate limited (retry after {retry_after_ms}ms): {message}")]
    RateLimited {
        /// Suggested delay.
        retry_after_ms: u64,
        /// Provider message.
        message: String,
    },

    /// Structured API error response.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Provider message.
        message: String,
        /// Provider error code (`error.code` or `error.type`).
        code: Option<String>,
        /// Raw error body.
        body: Option<Value>,
    },

    /// Transport failure.
    #[error("network error: {message}")]
    Network {
        /// Description.
        message: String,
    },

    /// Model id unknown to the provider.
    #[error("model not found: {model}")]
    ModelNotFound {
        /// Requested model id.
        model: String,
    },

    /// The call was cancelled by the caller.
    #[error("request cancelled")]
    Cancelled,

    /// Malformed payload.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Anything else.
    #[error("{message}")]
    Other {
        /// Description.
        message: String,
    },
}

/// Provider result alias.
pub type ProviderResult<T> = Result<T, ProviderError>;

impl ProviderError {
    /// Build an error from an in-band `error` stream unit.
    ///
    /// With a status the failure is treated as an API error, pulling the
    /// code out of the body; without one only the message is kept.
    pub fn from_stream_error(message: String, status: Option<u16>, body: Option<Value>) -> Self {
        match status {
            Some(status) => Self::Api {
                status,
                code: body.as_ref().and_then(body_code),
                message,
                body,
            },
            None => match body.as_ref().and_then(body_code) {
                Some(code) => Self::Api {
                    status: 0,
                    message,
                    code: Some(code),
                    body,
                },
                None => Self::Other { message },
            },
        }
    }

    /// Failure category.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Auth { .. } => ErrorKind::Authentication,
            Self::RateLimited { .. } => ErrorKind::RateLimit,
            Self::Network { .. } => ErrorKind::Network,
            Self::ModelNotFound { .. } => ErrorKind::ModelNotFound,
            Self::Cancelled => ErrorKind::Aborted,
            Self::Api {
                status,
                message,
                code,
                ..
            } => classify_api(*status, message, code.as_deref()),
            Self::Json(_) => ErrorKind::Api,
            Self::Other { message } => ErrorKind::from_message(message),
        }
    }

    /// Whether the provider no longer recognizes the continuation handle it
    /// was given. This is the only failure the session loop retries.
    pub fn is_continuation_lost(&self) -> bool {
        let message = match self {
            Self::Api { code, message, .. } => {
                if code.as_deref() == Some(CONTINUATION_LOST_CODE) {
                    return true;
                }
                message
            }
            Self::Other { message } => message,
            _ => return false,
        };
        let lower = message.to_lowercase();
        lower.contains(CONTINUATION_LOST_CODE)
            || (lower.contains("previous response") && lower.contains("not found"))
    }

    /// HTTP status, if the failure came from an API response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } if *status != 0 => Some(*status),
            Self::RateLimited { .. } => Some(429),
            _ => None,
        }
    }
}

/// Pull `error.code` or `error.type` (or the same keys at top level) from an
/// error body.
fn body_code(body: &Value) -> Option<String> {
    let scope = body.get("error").unwrap_or(body);
    ["code", "type"]
        .iter()
        .find_map(|key| scope.get(key).and_then(Value::as_str))
        .map(str::to_owned)
}

fn classify_api(status: u16, message: &str, code: Option<&str>) -> ErrorKind {
    let code = code.unwrap_or_default();
    let lower = message.to_lowercase();

    match status {
        401 | 403 => return ErrorKind::Authentication,
        429 => return ErrorKind::RateLimit,
        500..=599 => return ErrorKind::ServerError,
        _ => {}
    }

    if code == "insufficient_quota" || code == "rate_limit_error" {
        return ErrorKind::RateLimit;
    }
    if code == "authentication_error" || code == "permission_error" {
        return ErrorKind::Authentication;
    }
    if code == "overloaded_error" || code == "api_error" {
        return ErrorKind::ServerError;
    }
    if CONTEXT_CODES.contains(&code) {
        return ErrorKind::ContextExceeded;
    }
    if code == "model_not_found" || (status == 404 && lower.contains("model")) {
        return ErrorKind::ModelNotFound;
    }

    match ErrorKind::from_message(message) {
        ErrorKind::Unknown if (400..500).contains(&status) => ErrorKind::Api,
        ErrorKind::Unknown if !code.is_empty() => ErrorKind::Api,
        other => other,
    }
}
