//! # strand-runtime
//!
//! Streaming session engine: at most one live session per workspace, driven
//! from a provider stream into persisted parts and observable events.
//!
//! - **Registry**: [`SessionRegistry`] admits, stops, replays, and queries sessions
//! - **Session loop**: consumes provider events, accumulates parts, emits
//!   [`SessionEvent`]s, and finalizes exactly once
//! - **Part writer**: throttled, serialized partial-record persistence with
//!   immediate flushes at tool boundaries
//! - **Abort**: hard and soft cancellation with a drain signal
//! - **Retry**: one restart after a lost provider continuation handle
//! - **Usage**: per-step aggregation, cost, and end-of-session reconciliation
//! - **History / scratch**: the persistence and directory collaborators
//!
//! ## Crate Position
//!
//! Engine layer. Depends on: strand-core, strand-llm, strand-settings.
//!
//! [`SessionEvent`]: strand_core::events::SessionEvent

#![deny(unsafe_code)]

pub mod background;
pub mod config;
pub mod errors;
pub mod event_emitter;
pub mod history;
pub mod pricing;
pub mod registry;
pub mod scratch;
pub mod session;

pub use background::{BackgroundTasks, TaskFailure};
pub use config::EngineConfig;
pub use errors::{HistoryError, RuntimeError, ScratchError};
pub use event_emitter::EventEmitter;
pub use history::{FileHistoryStore, HistoryOp, HistoryStore, InMemoryHistoryStore};
pub use registry::{SessionRegistry, StartRequest};
pub use scratch::{LocalScratch, ScratchRuntime};
pub use session::{SessionInfo, SessionState, StopReason};
