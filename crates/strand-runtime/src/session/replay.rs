//! Catch-up events for an observer that (re)connects mid-session.

use strand_core::events::{EventBase, SessionEvent};
use strand_core::parts::Part;

use super::projector::project;

/// Events reconstructing the session from its parts.
///
/// Always starts with `start`. With a `cursor`, only parts first observed
/// or completed after it are included, so a tool that finished after the
/// cursor is replayed as its end event even when it started before.
pub fn replay(
    start: SessionEvent,
    base: &EventBase,
    parts: &[Part],
    cursor: Option<u64>,
) -> Vec<SessionEvent> {
    let mut events = Vec::with_capacity(parts.len() + 1);
    events.push(start);
    events.extend(
        parts
            .iter()
            .filter(|part| cursor.is_none_or(|cursor| part.observed_at() > cursor))
            .map(|part| project(base, part)),
    );
    events
}
