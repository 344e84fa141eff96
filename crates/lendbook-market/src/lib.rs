//! # lendbook-market
//!
//! Hosts many Lendbook order books, one per (currency, maturity).
//!
//! - [`MarketController`]: registry that creates books and routes requests
//! - [`BookHandle`]: async handle to one book's single-writer actor
//! - [`MarketEvent`]: book events fanned out on a shared broadcast channel
//!
//! Books never share state, so different markets run in parallel while each
//! book processes its commands strictly in arrival order.

pub mod actor;
pub mod controller;

pub use actor::{BookCommand, BookHandle, MarketEvent};
pub use controller::{MarketController, OrderApproval, OrderRequest};
