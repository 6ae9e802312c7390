//! # strand-core
//!
//! Foundation types, errors, branded IDs, and events for the strand session engine.
//!
//! This crate provides the shared vocabulary that all other strand crates depend on:
//!
//! - **Branded IDs**: [`ids::WorkspaceId`], [`ids::SessionToken`] as newtypes
//! - **Parts**: [`parts::Part`] sum type (text, reasoning, tool) and [`clock::LogicalClock`]
//! - **Messages**: [`messages::HistoryMessage`], the persisted record schema
//! - **Usage**: [`usage::TokenUsage`] with per-step arithmetic
//! - **Errors**: [`errors::ErrorKind`] failure taxonomy
//! - **Events**: [`events::StreamEvent`] from providers, [`events::SessionEvent`] for observers
//! - **Logging**: [`logging::init_logging`] subscriber setup
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by all other strand crates.

#![deny(unsafe_code)]

pub mod clock;
pub mod errors;
pub mod events;
pub mod ids;
pub mod logging;
pub mod messages;
pub mod parts;
pub mod usage;
