//! Order types for the Lendbook order book.
//!
//! Amounts are present-value units. A unit price is the present value paid
//! per [`PRICE_DIGIT`](crate::constants::PRICE_DIGIT) of future value, so a
//! lender prefers lower unit prices (higher yield) and a borrower prefers
//! higher ones.

use serde::{Deserialize, Serialize};

use crate::{AccountId, LendbookError, Maturity, OrderId, Result, constants};

/// Present-value amount in the market currency's smallest unit.
pub type Amount = u128;

/// Integer unit price in `[1, PRICE_DIGIT]`.
pub type UnitPrice = u64;

/// Which side of the book this order is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Lend,
    Borrow,
}

impl Side {
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Self::Lend => Self::Borrow,
            Self::Borrow => Self::Lend,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lend => write!(f, "LEND"),
            Self::Borrow => write!(f, "BORROW"),
        }
    }
}

/// A resting order as seen from outside the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub side: Side,
    pub unit_price: UnitPrice,
    /// Remaining present-value amount.
    pub amount: Amount,
    pub maker: AccountId,
    pub maturity: Maturity,
    /// Caller-supplied time at which the order was placed.
    pub timestamp: u64,
}

impl Order {
    /// Amount repaid at maturity for the remaining present value.
    #[must_use]
    pub fn future_value(&self) -> Option<Amount> {
        calculate_future_value(self.amount, self.unit_price)
    }
}

/// `amount * PRICE_DIGIT / unit_price`, rounded down.
///
/// `None` for a zero price or when the product overflows; any amount up to
/// [`constants::MAX_AMOUNT`] succeeds.
#[must_use]
pub fn calculate_future_value(amount: Amount, unit_price: UnitPrice) -> Option<Amount> {
    amount
        .checked_mul(Amount::from(constants::PRICE_DIGIT))?
        .checked_div(Amount::from(unit_price))
}

/// Reject unit prices outside `[MIN_UNIT_PRICE, PRICE_DIGIT]`.
pub fn validate_unit_price(unit_price: UnitPrice) -> Result<()> {
    if !(constants::MIN_UNIT_PRICE..=constants::PRICE_DIGIT).contains(&unit_price) {
        return Err(LendbookError::InvalidUnitPrice {
            unit_price,
            reason: format!(
                "must be within [{}, {}]",
                constants::MIN_UNIT_PRICE,
                constants::PRICE_DIGIT
            ),
        });
    }
    Ok(())
}

/// Reject zero amounts and amounts above [`constants::MAX_AMOUNT`].
pub fn validate_amount(amount: Amount) -> Result<()> {
    if amount == 0 {
        return Err(LendbookError::InvalidAmount);
    }
    if amount > constants::MAX_AMOUNT {
        return Err(LendbookError::AmountTooLarge {
            amount,
            max: constants::MAX_AMOUNT,
        });
    }
    Ok(())
}
