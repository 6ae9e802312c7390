#![allow(missing_docs)]

mod common;

use assert_matches::assert_matches;
use strand_core::events::{AbortMode, SessionEvent};
use strand_llm::testutil::{ScriptStep, ScriptedProvider};
use strand_runtime::{HistoryOp, SessionState};

use common::*;

fn hanging(sessions: usize) -> ScriptedProvider {
    let provider = ScriptedProvider::new();
    for i in 0..sessions {
        provider.push(strand_llm::testutil::Script::Stream(vec![
            ScriptStep::text(&format!("session {i}")),
            ScriptStep::Hang,
        ]));
    }
    provider
}

#[tokio::test]
async fn restart_aborts_prior_session_before_starting_next() {
    let mut h = harness(hanging(2));
    let ws = ws("ws");

    let first = h.registry.start_stream(&ws, request()).await.unwrap();
    let _ = collect_until(&mut h.events, "content-delta").await;
    let second = h.registry.start_stream(&ws, request()).await.unwrap();
    assert_ne!(first, second);

    let events = collect_until(&mut h.events, "session-start").await;
    assert_matches!(
        &events[..],
        [.., SessionEvent::SessionAbort { mode: AbortMode::Hard, .. }, SessionEvent::SessionStart { token, .. }]
            if *token == second
    );
    assert_eq!(
        h.registry.get_active_session_info(&ws).map(|i| i.token),
        Some(second)
    );
    assert!(h.registry.stop_stream(&ws, AbortMode::Hard).await.unwrap());
}

#[tokio::test]
async fn racing_starts_leave_exactly_one_session() {
    let mut h = harness(hanging(2));
    let ws = ws("ws");

    let (a, b) = tokio::join!(
        h.registry.start_stream(&ws, request()),
        h.registry.start_stream(&ws, request()),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_ne!(a, b);
    let live = h.registry.get_active_session_info(&ws).unwrap().token;
    let (loser, winner) = if live == a { (b, a) } else { (a, b) };

    let mut starts = Vec::new();
    let mut lifecycle = Vec::new();
    while starts.len() < 2 {
        let event = next_event(&mut h.events).await;
        match &event {
            SessionEvent::SessionStart { token, .. } => {
                starts.push(token.clone());
                lifecycle.push(event.event_type().to_owned());
            }
            SessionEvent::SessionAbort { .. } => lifecycle.push(event.event_type().to_owned()),
            _ => {}
        }
    }
    assert_eq!(starts, [loser, winner]);
    assert_eq!(lifecycle, ["session-start", "session-abort", "session-start"]);
    assert_eq!(h.registry.list_active_workspaces(), [ws.clone()]);

    assert!(h.registry.stop_stream(&ws, AbortMode::Hard).await.unwrap());
}

#[tokio::test]
async fn prior_partial_is_flushed_before_new_session_writes() {
    let mut h = harness(hanging(2));
    let ws = ws("ws");

    let _ = h.registry.start_stream(&ws, request()).await.unwrap();
    let _ = collect_until(&mut h.events, "content-delta").await;
    let _ = h.registry.start_stream(&ws, request()).await.unwrap();
    let _ = collect_until(&mut h.events, "content-delta").await;
    assert!(h.registry.stop_stream(&ws, AbortMode::Hard).await.unwrap());

    let ops = h.history.ops();
    let messages: Vec<_> = ops.iter().filter_map(HistoryOp::message_id).collect();
    let first = messages[0];
    let switch = messages.iter().position(|id| *id != first).unwrap();
    // Once the second session writes, the first never writes again.
    assert!(messages[switch..].iter().all(|id| *id != first), "{messages:?}");
}

#[tokio::test]
async fn workspaces_run_independently() {
    let mut h = harness(hanging(2));
    let (a, b) = (ws("b-workspace"), ws("a-workspace"));

    let _ = h.registry.start_stream(&a, request()).await.unwrap();
    let _ = h.registry.start_stream(&b, request()).await.unwrap();
    let _ = collect_until(&mut h.events, "content-delta").await;
    let _ = collect_until(&mut h.events, "content-delta").await;

    assert_eq!(h.registry.list_active_workspaces(), [b.clone(), a.clone()]);
    assert_eq!(h.registry.get_state(&a), SessionState::Streaming);

    assert!(h.registry.stop_stream(&a, AbortMode::Hard).await.unwrap());
    assert!(!h.registry.is_active(&a));
    assert!(h.registry.is_active(&b));
    assert!(h.registry.stop_stream(&b, AbortMode::Hard).await.unwrap());
}
