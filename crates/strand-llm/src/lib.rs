//! # strand-llm
//!
//! Model provider abstraction for the strand session engine.
//!
//! - [`provider::Provider`]: cancellable multi-step streaming call
//! - [`request`]: model, messages, tools, and per-call options
//! - [`errors::ProviderError`]: provider failures and their [`ErrorKind`] classification,
//!   including continuation-loss detection
//! - [`metadata`]: step-scoped counters lifted out of provider metadata
//! - [`compat`]: provider-specific option rules applied before a call
//! - `testutil` (feature `testutil`): a scripted provider for engine tests
//!
//! No provider wire format lives here; concrete providers implement the trait
//! in their own crates.
//!
//! ## Crate Position
//!
//! Depends on: strand-core.
//! Depended on by: strand-runtime.
//!
//! [`ErrorKind`]: strand_core::errors::ErrorKind

#![deny(unsafe_code)]

pub mod compat;
pub mod errors;
pub mod metadata;
pub mod provider;
pub mod request;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use errors::{ProviderError, ProviderResult};
pub use provider::{NoMetadata, Provider, ProviderStream, StreamEventStream, StreamMetadata};
pub use request::{StreamOptions, StreamRequest, ThinkingLevel, ToolChoice, ToolDefinition};
