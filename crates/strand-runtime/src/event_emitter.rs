//! Broadcast-based emitter for [`SessionEvent`] dispatch.

use std::sync::atomic::{AtomicU64, Ordering};

use strand_core::events::SessionEvent;
use tokio::sync::broadcast;

/// Default broadcast channel capacity.
const DEFAULT_CAPACITY: usize = 1024;

/// Broadcast-based event emitter.
///
/// Non-blocking: `emit` never awaits. Slow receivers lag and lose events
/// rather than blocking a session loop; they recover through replay.
pub struct EventEmitter {
    tx: broadcast::Sender<SessionEvent>,
    emit_count: AtomicU64,
}

impl EventEmitter {
    /// Create a new emitter with the default channel capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a new emitter with a custom channel capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            emit_count: AtomicU64::new(0),
        }
    }

    /// Emit an event to all subscribers. Returns the number of receivers.
    pub fn emit(&self, event: SessionEvent) -> usize {
        let _ = self.emit_count.fetch_add(1, Ordering::Relaxed);
        self.tx.send(event).unwrap_or(0)
    }

    /// Subscribe to events emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Total events emitted.
    pub fn emit_count(&self) -> u64 {
        self.emit_count.load(Ordering::Relaxed)
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_core::events::{ContentChannel, EventBase};
    use strand_core::ids::WorkspaceId;

    fn delta(ws: &str, text: &str) -> SessionEvent {
        SessionEvent::ContentDelta {
            base: EventBase::new(WorkspaceId::new(ws), "m1"),
            channel: ContentChannel::Text,
            delta: text.into(),
            timestamp: 1,
        }
    }

    #[test]
    fn emit_with_no_subscribers() {
        let emitter = EventEmitter::new();
        assert_eq!(emitter.emit(delta("w1", "a")), 0);
        assert_eq!(emitter.emit_count(), 1);
    }

    #[tokio::test]
    async fn multiple_subscribers_receive() {
        let emitter = EventEmitter::new();
        let mut rx1 = emitter.subscribe();
        let mut rx2 = emitter.subscribe();
        assert_eq!(emitter.emit(delta("w1", "a")), 2);
        assert_eq!(rx1.recv().await.unwrap().event_type(), "content-delta");
        assert_eq!(rx2.recv().await.unwrap().workspace_id().as_str(), "w1");
    }

    #[tokio::test]
    async fn slow_receiver_lags() {
        let emitter = EventEmitter::with_capacity(2);
        let mut rx = emitter.subscribe();
        for text in ["a", "b", "c"] {
            let _ = emitter.emit(delta("w1", text));
        }
        assert!(rx.recv().await.is_err());
    }

    #[test]
    fn subscriber_count_tracks_drops() {
        let emitter = EventEmitter::default();
        let rx = emitter.subscribe();
        assert_eq!(emitter.subscriber_count(), 1);
        drop(rx);
        assert_eq!(emitter.subscriber_count(), 0);
    }
}
