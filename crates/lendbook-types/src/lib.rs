//! # lendbook-types
//!
//! Shared types, errors, and configuration for the **Lendbook** fixed-maturity
//! lending order book.
//!
//! This crate is the leaf dependency of the workspace; every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`OrderId`], [`AccountId`], [`Currency`], [`Maturity`], [`MarketKey`]
//! - **Order model**: [`Order`], [`Side`], [`Amount`], [`UnitPrice`]
//! - **Events**: [`BookEvent`] and its payloads ([`FillEvent`], [`MakeEvent`], ...)
//! - **Lifecycle**: [`BookState`]
//! - **Configuration**: [`MarketConfig`], [`CircuitBreakerConfig`], [`EngineConfig`]
//! - **Errors**: [`LendbookError`] with `LB_ERR_` prefix codes
//! - **Constants**: price digit, defaults and limits

pub mod config;
pub mod constants;
pub mod error;
pub mod event;
pub mod ids;
pub mod order;
pub mod state;

// Re-export all primary types at crate root for ergonomic imports:
//   use lendbook_types::{Order, Side, BookEvent, MarketConfig, ...};

pub use config::*;
pub use error::*;
pub use event::*;
pub use ids::*;
pub use order::*;
pub use state::*;

// Constants are accessed via `lendbook_types::constants::FOO`
// (not re-exported to avoid name collisions).
