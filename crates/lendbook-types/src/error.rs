//! Error types for the Lendbook order book.
//!
//! All errors use the `LB_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Order errors
//! - 2xx: Pricing errors
//! - 4xx: Lifecycle errors
//! - 5xx: Matching / invariant errors
//! - 7xx: Market registry errors
//! - 9xx: General / internal errors
//!
//! Partial and zero fills are outcomes, not errors.

use thiserror::Error;

use crate::{Amount, BookState, MarketKey, OrderId, UnitPrice};

/// Central error enum for all Lendbook operations.
#[derive(Debug, Error)]
pub enum LendbookError {
    // =================================================================
    // Order Errors (1xx)
    // =================================================================
    /// Unknown, already matched, or not owned by the caller.
    #[error("LB_ERR_100: Order not found: {0}")]
    OrderNotFound(OrderId),

    /// Order amount must be positive.
    #[error("LB_ERR_101: Invalid amount: must be greater than zero")]
    InvalidAmount,

    /// Order amount, or the resulting resting total, exceeds `MAX_AMOUNT`.
    #[error("LB_ERR_103: Amount {amount} exceeds maximum {max}")]
    AmountTooLarge { amount: Amount, max: Amount },

    /// The collateral layer did not clear this borrow order.
    #[error("LB_ERR_102: Collateral not approved for borrow order")]
    CollateralNotApproved,

    // =================================================================
    // Pricing Errors (2xx)
    // =================================================================
    /// Unit price out of range or outside the circuit breaker band.
    #[error("LB_ERR_200: Invalid unit price {unit_price}: {reason}")]
    InvalidUnitPrice { unit_price: UnitPrice, reason: String },

    // =================================================================
    // Lifecycle Errors (4xx)
    // =================================================================
    #[error("LB_ERR_400: Not in pre-order period (state {state})")]
    NotInPreOrderPeriod { state: BookState },

    #[error("LB_ERR_401: Not in Itayose period (state {state})")]
    NotInItayosePeriod { state: BookState },

    #[error("LB_ERR_402: Market is paused")]
    MarketPaused,

    #[error("LB_ERR_403: Market not opened yet (state {state})")]
    MarketNotOpened { state: BookState },

    #[error("LB_ERR_404: Market has matured")]
    MarketMatured,

    #[error("LB_ERR_405: Cannot {action} from state {from}")]
    InvalidStateTransition { from: BookState, action: String },

    // =================================================================
    // Matching / Invariant Errors (5xx)
    // =================================================================
    /// Book state is inconsistent. The operation is halted, nothing is repaired.
    #[error("LB_ERR_500: Invariant violation: {reason}")]
    InvariantViolation { reason: String },

    // =================================================================
    // Market Registry Errors (7xx)
    // =================================================================
    #[error("LB_ERR_700: Market not found: {0}")]
    MarketNotFound(MarketKey),

    #[error("LB_ERR_701: Market already exists: {0}")]
    MarketAlreadyExists(MarketKey),

    /// The book's actor is no longer running.
    #[error("LB_ERR_702: Order book engine unavailable: {0}")]
    EngineUnavailable(MarketKey),

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    #[error("LB_ERR_900: Internal error: {0}")]
    Internal(String),

    #[error("LB_ERR_901: Serialization error: {0}")]
    Serialization(String),

    #[error("LB_ERR_902: Configuration error: {0}")]
    Configuration(String),

    #[error("LB_ERR_903: I/O error: {0}")]
    Io(String),
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, LendbookError>;

impl From<std::io::Error> for LendbookError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for LendbookError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
