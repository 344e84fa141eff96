//! System-wide constants for the Lendbook order book.

/// Unit prices are expressed per `PRICE_DIGIT` of future value.
/// A unit price of 9_800 means 98.00 present value buys 100.00 at maturity.
pub const PRICE_DIGIT: u64 = 10_000;

/// Largest order amount, and the cap on any side's resting total.
/// Equals `u128::MAX / PRICE_DIGIT`, so future values of capped amounts fit in a `u128`.
pub const MAX_AMOUNT: u128 = u128::MAX / 10_000;

/// Lowest valid unit price.
pub const MIN_UNIT_PRICE: u64 = 1;

/// Denominator for basis-point parameters (10_000 = 100%).
pub const PCT_DIGIT: u64 = 10_000;

/// Default circuit breaker range around the reference price, in basis points.
pub const DEFAULT_CIRCUIT_BREAKER_LIMIT_RANGE_BPS: u64 = 1_000;

/// Smallest allowed circuit breaker offset, in unit-price ticks.
pub const DEFAULT_CIRCUIT_BREAKER_MIN_OFFSET: u64 = 10;

/// Largest allowed circuit breaker offset, in unit-price ticks.
pub const DEFAULT_CIRCUIT_BREAKER_MAX_OFFSET: u64 = 1_000;

/// Default number of price levels returned by order book queries.
pub const DEFAULT_ORDER_BOOK_DEPTH: usize = 10;

/// Default capacity of a book actor's command queue.
pub const DEFAULT_COMMAND_QUEUE_CAPACITY: usize = 1_024;

/// Default capacity of the market event broadcast channel.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 4_096;

/// Decimal places kept for blended average fill prices.
pub const AVERAGE_PRICE_PRECISION: u32 = 8;

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name.
pub const ENGINE_NAME: &str = "Lendbook";
