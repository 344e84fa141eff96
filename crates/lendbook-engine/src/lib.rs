//! # lendbook-engine
//!
//! **Pure deterministic order book engine for Lendbook.**
//!
//! One [`OrderBook`] per (currency, maturity) market. It has:
//!
//! - **Price index**: a red-black [`PriceLevelTree`] per side with a FIFO
//!   queue at every price level
//! - **Continuous matching**: takers sweep the opposite tree in bulk, limit
//!   remainders rest, market shortfalls are discarded
//! - **Opening auction**: pre-orders are cleared at one uniform price by
//!   [`OrderBook::execute_itayose_call`]
//! - **Circuit breaker**: execution is bounded around the last executed price
//! - **Zero side effects**: no I/O, time is supplied by the caller, and the
//!   same operation sequence always yields the same [`state digest`](compute_state_digest)

pub mod circuit_breaker;
pub mod determinism;
pub mod itayose;
pub mod matching;
pub mod order_book;
pub mod price_level_tree;
pub mod replay;

pub use circuit_breaker::{CircuitBreaker, PriceThresholds};
pub use determinism::{compute_state_digest, state_digest_hex, verify_state_digest};
pub use itayose::{ItayoseLog, ItayoseOutcome, OpeningPrice, compute_opening_unit_price};
pub use matching::{FillEstimate, OrderExecution, average_unit_price};
pub use order_book::{BookSnapshot, OrderBook, OrderBookSide};
pub use price_level_tree::{
    DropEstimate, DropResult, EMPTY, FilledOrder, LevelSummary, PriceLevelTree, QueuedOrder,
};
pub use replay::{Operation, OperationOutput, Rejection, ReplayOutput, replay};
