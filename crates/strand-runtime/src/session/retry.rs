//! Recovery from a lost provider continuation handle.

use strand_core::errors::ErrorKind;
use strand_core::messages::HistoryMessage;
use strand_llm::{ProviderError, StreamRequest};

/// Session conditions that gate a retry.
#[derive(Clone, Copy, Debug)]
pub struct RetryContext {
    /// Hard stop fired.
    pub cancelled: bool,
    /// Soft stop waiting for a boundary.
    pub soft_pending: bool,
    /// Parts produced so far in the current step.
    pub step_parts: usize,
}

/// What to do with a provider failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Restart the provider call.
    Retry,
    /// End the session with this failure kind.
    Terminal(ErrorKind),
}

/// Tracks the single continuation-loss retry a session may spend.
#[derive(Debug, Default)]
pub struct RetryCoordinator {
    attempted: bool,
}

impl RetryCoordinator {
    /// Coordinator with its retry unspent.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the retry has been spent.
    pub fn attempted(&self) -> bool {
        self.attempted
    }

    /// Decide how to handle `error`. Spends the retry when returning
    /// [`RetryDecision::Retry`].
    pub fn evaluate(&mut self, error: &ProviderError, ctx: RetryContext) -> RetryDecision {
        if !error.is_continuation_lost() {
            return RetryDecision::Terminal(error.kind());
        }
        if self.attempted {
            return RetryDecision::Terminal(ErrorKind::RetryFailed);
        }
        if ctx.cancelled || ctx.soft_pending || ctx.step_parts > 0 {
            return RetryDecision::Terminal(error.kind());
        }
        self.attempted = true;
        RetryDecision::Retry
    }

    /// Request for the restarted call.
    ///
    /// Drops the stale continuation handle. When earlier steps produced
    /// content, the in-progress assistant message is appended so the model
    /// continues from it instead of starting over.
    pub fn restart_request(
        base: &StreamRequest,
        in_progress: Option<HistoryMessage>,
    ) -> StreamRequest {
        let mut request = base.clone();
        request.options.continuation_handle = None;
        if let Some(message) = in_progress.filter(|m| !m.parts.is_empty()) {
            request.messages.push(message);
        }
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_llm::StreamOptions;

    fn lost() -> ProviderError {
        ProviderError::Api {
            status: 400,
            message: "Previous response with id 'resp_1' not found.".into(),
            code: Some("previous_response_not_found".into()),
            body: None,
        }
    }

    fn eligible() -> RetryContext {
        RetryContext {
            cancelled: false,
            soft_pending: false,
            step_parts: 0,
        }
    }

    #[test]
    fn first_loss_retries_second_fails() {
        let mut retry = RetryCoordinator::new();
        assert_eq!(retry.evaluate(&lost(), eligible()), RetryDecision::Retry);
        assert!(retry.attempted());
        assert_eq!(
            retry.evaluate(&lost(), eligible()),
            RetryDecision::Terminal(ErrorKind::RetryFailed)
        );
    }

    #[test]
    fn ineligible_contexts_are_terminal() {
        for ctx in [
            RetryContext { cancelled: true, ..eligible() },
            RetryContext { soft_pending: true, ..eligible() },
            RetryContext { step_parts: 1, ..eligible() },
        ] {
            let mut retry = RetryCoordinator::new();
            assert_eq!(
                retry.evaluate(&lost(), ctx),
                RetryDecision::Terminal(ErrorKind::Api)
            );
            assert!(!retry.attempted());
        }
    }

    #[test]
    fn other_errors_never_retry() {
        let mut retry = RetryCoordinator::new();
        let err = ProviderError::Api {
            status: 529,
            message: "Overloaded".into(),
            code: None,
            body: None,
        };
        assert_eq!(
            retry.evaluate(&err, eligible()),
            RetryDecision::Terminal(ErrorKind::ServerError)
        );
        assert!(!retry.attempted());
    }

    #[test]
    fn restart_request_strips_handle_and_appends_progress() {
        let base = StreamRequest {
            options: StreamOptions {
                continuation_handle: Some("resp_1".into()),
                ..StreamOptions::default()
            },
            ..StreamRequest::new("m", vec![HistoryMessage::user("u1", "hi", 1)])
        };
        let progress = HistoryMessage::user("a1", "partial answer", 2);

        let request = RetryCoordinator::restart_request(&base, Some(progress.clone()));
        assert!(request.options.continuation_handle.is_none());
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[1], progress);

        let request = RetryCoordinator::restart_request(&base, None);
        assert_eq!(request.messages.len(), 1);
    }
}
