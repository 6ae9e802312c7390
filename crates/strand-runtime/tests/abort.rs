#![allow(missing_docs)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use serde_json::json;
use strand_core::events::{AbortMode, SessionEvent};
use strand_core::parts::{Part, ToolState};
use strand_llm::testutil::{ScriptStep, ScriptedProvider};
use strand_runtime::{HistoryStore, ScratchRuntime, SessionState};
use tokio::sync::Notify;

use common::*;

#[tokio::test]
async fn hard_stop_flushes_every_part_before_returning() {
    let provider = ScriptedProvider::new().with_stream(vec![
        ScriptStep::text("a"),
        ScriptStep::text("b"),
        ScriptStep::text("c"),
        ScriptStep::Hang,
    ]);
    let mut h = harness(provider);
    let ws = ws("ws");
    let _ = h.registry.start_stream(&ws, request()).await.unwrap();
    for _ in 0..3 {
        let _ = collect_until(&mut h.events, "content-delta").await;
    }

    assert!(h.registry.stop_stream(&ws, AbortMode::Hard).await.unwrap());

    let partial = h.history.read_partial(&ws).await.unwrap().unwrap();
    assert_eq!(partial.parts.len(), 3);
    assert!(partial.metadata.partial);
    assert!(!h.registry.list_active_workspaces().contains(&ws));
    assert_eq!(h.registry.get_state(&ws), SessionState::Idle);
    assert_matches!(
        next_event(&mut h.events).await,
        SessionEvent::SessionAbort { mode: AbortMode::Hard, .. }
    );
}

#[tokio::test]
async fn soft_stop_waits_for_pending_tool_result() {
    let release = Arc::new(Notify::new());
    let provider = ScriptedProvider::new().with_stream(vec![
        ScriptStep::tool_call("c1", "bash", json!({"cmd": "make"})),
        ScriptStep::WaitFor(Arc::clone(&release)),
        ScriptStep::tool_result("c1", "bash", json!({"ok": true})),
        ScriptStep::text("after"),
        ScriptStep::Hang,
    ]);
    let mut h = harness(provider);
    let ws = ws("ws");
    let _ = h.registry.start_stream(&ws, request()).await.unwrap();
    let _ = collect_until(&mut h.events, "tool-call-start").await;

    let stopped = tokio::time::timeout(
        Duration::from_millis(500),
        h.registry.stop_stream(&ws, AbortMode::Soft),
    )
    .await
    .expect("soft stop must not block");
    assert!(stopped.unwrap());
    assert_eq!(h.registry.get_state(&ws), SessionState::Streaming);

    release.notify_one();
    let events = collect_until_terminal(&mut h.events).await;
    assert_eq!(types(&events), ["tool-call-end", "session-abort"]);
    assert_matches!(&events[1], SessionEvent::SessionAbort { mode: AbortMode::Soft, .. });

    let partial = h.history.read_partial(&ws).await.unwrap().unwrap();
    assert_matches!(
        &partial.parts[..],
        [Part::Tool { state: ToolState::OutputAvailable, .. }]
    );
}

#[tokio::test]
async fn soft_stop_without_tools_ends_at_next_boundary() {
    let gate = Arc::new(Notify::new());
    let provider = ScriptedProvider::new().with_stream(vec![
        ScriptStep::text("thinking out loud"),
        ScriptStep::WaitFor(Arc::clone(&gate)),
        ScriptStep::step(5, 5),
        ScriptStep::text("more"),
        ScriptStep::Hang,
    ]);
    let mut h = harness(provider);
    let ws = ws("ws");
    let _ = h.registry.start_stream(&ws, request()).await.unwrap();
    let _ = collect_until(&mut h.events, "content-delta").await;
    assert!(h.registry.stop_stream(&ws, AbortMode::Soft).await.unwrap());
    gate.notify_one();

    let events = collect_until_terminal(&mut h.events).await;
    assert_eq!(types(&events), ["usage-delta", "session-abort"]);
}

#[tokio::test]
async fn hard_stop_upgrades_pending_soft_stop() {
    let provider = ScriptedProvider::new().with_stream(vec![
        ScriptStep::tool_call("c1", "bash", json!({})),
        ScriptStep::Hang,
    ]);
    let mut h = harness(provider);
    let ws = ws("ws");
    let _ = h.registry.start_stream(&ws, request()).await.unwrap();
    let _ = collect_until(&mut h.events, "tool-call-start").await;

    assert!(h.registry.stop_stream(&ws, AbortMode::Soft).await.unwrap());
    assert!(h.registry.stop_stream(&ws, AbortMode::Hard).await.unwrap());
    assert_matches!(
        next_event(&mut h.events).await,
        SessionEvent::SessionAbort { mode: AbortMode::Hard, .. }
    );
    assert!(!h.registry.is_active(&ws));
}

#[tokio::test]
async fn stop_during_setup_cancels_without_events() {
    let dir = tempfile::tempdir().unwrap();
    let scratch = Arc::new(GatedScratch::new(dir.path()));
    let provider = ScriptedProvider::new().with_stream(vec![ScriptStep::text("never")]);
    let mut h = harness_with(
        provider,
        config(),
        Some(Arc::clone(&scratch) as Arc<dyn ScratchRuntime>),
    );
    let ws = ws("ws");

    let registry = Arc::clone(&h.registry);
    let start_ws = ws.clone();
    let start = tokio::spawn(async move { registry.start_stream(&start_ws, request()).await });

    while h.registry.get_state(&ws) != SessionState::Starting {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert!(h.registry.stop_stream(&ws, AbortMode::Hard).await.unwrap());

    let token = start.await.unwrap();
    assert!(token.is_ok());
    assert_eq!(h.provider.call_count(), 0);
    assert_eq!(h.registry.get_state(&ws), SessionState::Idle);
    assert!(h.events.try_recv().is_err());
}

#[tokio::test]
async fn blocking_tool_is_durable_when_announced() {
    let provider = ScriptedProvider::new().with_stream(vec![
        ScriptStep::text("let me ask"),
        ScriptStep::tool_call("q1", "ask_user_question", json!({"question": "which branch?"})),
        ScriptStep::Hang,
    ]);
    let mut h = harness_with(
        provider,
        strand_runtime::EngineConfig {
            partial_write_interval: Duration::from_secs(60),
            ..config()
        },
        None,
    );
    let ws = ws("ws");
    let _ = h.registry.start_stream(&ws, request()).await.unwrap();
    let _ = collect_until(&mut h.events, "tool-call-start").await;

    let partial = h.history.read_partial(&ws).await.unwrap().unwrap();
    assert_matches!(
        &partial.parts[..],
        [Part::Text { .. }, Part::Tool { call_id, state: ToolState::InputAvailable, .. }] if call_id == "q1"
    );
    assert!(h.registry.stop_stream(&ws, AbortMode::Hard).await.unwrap());
}
