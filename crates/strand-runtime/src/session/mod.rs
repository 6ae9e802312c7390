//! Per-session machinery driven by the registry.
//!
//! - [`abort`]: hard/soft cancellation and the drain signal
//! - [`part_writer`]: throttled partial-record persistence
//! - [`projector`] and [`replay`]: part → event projection for live and
//!   catch-up observers
//! - [`retry`]: the single continuation-loss restart
//! - [`stop_conditions`]: step-boundary stop checks
//! - [`usage`]: per-step usage aggregation
//!
//! The loop itself (`stream_loop`) and the live handle are crate-private.

pub mod abort;
pub(crate) mod handle;
pub mod part_writer;
pub mod projector;
pub mod replay;
pub mod retry;
pub mod state;
pub mod stop_conditions;
pub(crate) mod stream_loop;
pub mod usage;

pub use abort::AbortCoordinator;
pub use part_writer::{PartWriter, PartialSource};
pub use projector::project;
pub use replay::replay;
pub use retry::{RetryContext, RetryCoordinator, RetryDecision};
pub use state::{SessionInfo, SessionState};
pub use stop_conditions::{QueuedPredicate, StopConditions, StopReason, is_success_result};
pub use usage::{FinalUsage, StepUsage, UsageAggregator};
