//! Hard and soft cancellation for one session.
//!
//! A hard stop cancels the token immediately. A soft stop only raises a
//! flag that the session loop reads at content boundaries. Either way the
//! session's finalizer runs once and then marks the coordinator drained;
//! callers that must see the session gone wait on that drain signal.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use strand_core::events::AbortMode;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Cancellation state shared between a session loop and its stoppers.
#[derive(Debug)]
pub struct AbortCoordinator {
    cancel: CancellationToken,
    soft: AtomicBool,
    mode: Mutex<Option<AbortMode>>,
    cleanup_claimed: AtomicBool,
    drained: watch::Sender<bool>,
}

impl AbortCoordinator {
    /// Fresh coordinator.
    pub fn new() -> Self {
        let (drained, _) = watch::channel(false);
        Self {
            cancel: CancellationToken::new(),
            soft: AtomicBool::new(false),
            mode: Mutex::new(None),
            cleanup_claimed: AtomicBool::new(false),
            drained,
        }
    }

    /// Cancel now. A pending soft stop is upgraded to hard.
    pub fn request_hard(&self) {
        *self.mode.lock() = Some(AbortMode::Hard);
        self.cancel.cancel();
    }

    /// Ask the loop to stop at its next boundary.
    pub fn request_soft(&self) {
        {
            let mut mode = self.mode.lock();
            if mode.is_none() {
                *mode = Some(AbortMode::Soft);
            }
        }
        self.soft.store(true, Ordering::SeqCst);
    }

    /// Whether a soft stop is waiting for a boundary.
    pub fn soft_pending(&self) -> bool {
        self.soft.load(Ordering::SeqCst)
    }

    /// Whether a hard stop fired.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Requested stop mode, if any.
    pub fn mode(&self) -> Option<AbortMode> {
        *self.mode.lock()
    }

    /// Session-wide cancellation token.
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Token for one provider call. Cancelled by a hard stop, and can be
    /// cancelled on its own to end just that call.
    pub fn child_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Claim the right to run cleanup. Returns `true` exactly once.
    pub fn claim_cleanup(&self) -> bool {
        self.cleanup_claimed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Signal that cleanup has finished.
    pub fn mark_drained(&self) {
        let _ = self.drained.send_replace(true);
    }

    /// Whether cleanup has finished.
    pub fn is_drained(&self) -> bool {
        *self.drained.borrow()
    }

    /// Wait until cleanup has finished.
    pub async fn wait_drained(&self) {
        let mut rx = self.drained.subscribe();
        let _ = rx.wait_for(|drained| *drained).await;
    }
}

impl Default for AbortCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
