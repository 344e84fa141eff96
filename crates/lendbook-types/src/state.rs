//! Lifecycle of a single order book.
//!
//! ```text
//! PRE_ORDER ──(opening date, pre-orders exist)──▶ ITAYOSE ──(auction)──▶ OPEN
//!     └────────(opening date, book empty)────────────────────────────────▶ OPEN
//! OPEN ◀──▶ PAUSED                                   any ──(maturity)──▶ MATURED
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Phase of an order book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookState {
    /// Collecting pre-orders; no matching is legal.
    PreOrder,
    /// Opening date reached with pre-orders present; waiting for the auction.
    Itayose,
    /// Continuous matching.
    Open,
    /// Administratively halted.
    Paused,
    /// Maturity reached; no further orders.
    Matured,
}

impl BookState {
    /// `true` once the book has opened and has not matured.
    #[must_use]
    pub fn is_opened(self) -> bool {
        matches!(self, Self::Open | Self::Paused)
    }

    /// Orders may be cancelled in every phase except after maturity or while paused.
    #[must_use]
    pub fn accepts_cancellation(self) -> bool {
        matches!(self, Self::PreOrder | Self::Itayose | Self::Open)
    }
}

impl fmt::Display for BookState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PreOrder => write!(f, "PRE_ORDER"),
            Self::Itayose => write!(f, "ITAYOSE"),
            Self::Open => write!(f, "OPEN"),
            Self::Paused => write!(f, "PAUSED"),
            Self::Matured => write!(f, "MATURED"),
        }
    }
}
