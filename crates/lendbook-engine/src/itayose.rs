//! Opening call auction ("Itayose").
//!
//! Pre-orders collected before the opening date may cross. At opening the
//! two trees are walked from their best prices toward each other, always
//! consuming the smaller of the two current levels:
//!
//! - lend level larger: candidate is the lend price, borrow pointer advances
//! - borrow level larger: candidate is the borrow price, lend pointer advances
//! - equal: candidate is the integer midpoint, both advance
//!
//! The last candidate is the opening price and the consumed volume is the
//! per-side offset amount. Both trees are then dropped by that amount and
//! every participant fills at the opening price.

use lendbook_types::{
    Amount, BookEvent, BookState, ItayoseExecutedEvent, LendbookError, Result, Side, UnitPrice,
};
use serde::{Deserialize, Serialize};

use crate::order_book::OrderBook;
use crate::price_level_tree::{EMPTY, PriceLevelTree};

/// Result of the clearing walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpeningPrice {
    pub opening_unit_price: UnitPrice,
    /// Volume matched on each side.
    pub offset_amount: Amount,
    /// Lowest lend level that contributed volume.
    pub last_lend_unit_price: UnitPrice,
    /// Highest borrow level that contributed volume.
    pub last_borrow_unit_price: UnitPrice,
}

/// Record of an executed opening auction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItayoseLog {
    pub opening_unit_price: UnitPrice,
    pub last_lend_unit_price: UnitPrice,
    pub last_borrow_unit_price: UnitPrice,
    pub offset_amount: Amount,
}

/// Outcome of [`OrderBook::execute_itayose_call`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItayoseOutcome {
    /// `None` when the pre-orders did not cross.
    pub log: Option<ItayoseLog>,
    /// Reference price the book opened with.
    pub reference_unit_price: Option<UnitPrice>,
}

/// Find the opening price for the given trees. `None` if they do not cross.
#[must_use]
pub fn compute_opening_unit_price(
    lend: &PriceLevelTree,
    borrow: &PriceLevelTree,
) -> Option<OpeningPrice> {
    let mut lend_price = lend.last();
    let mut borrow_price = borrow.first();
    let mut lend_amount = lend.node_total_amount(lend_price);
    let mut borrow_amount = borrow.node_total_amount(borrow_price);

    let mut opening = OpeningPrice {
        opening_unit_price: EMPTY,
        offset_amount: 0,
        last_lend_unit_price: EMPTY,
        last_borrow_unit_price: EMPTY,
    };

    while lend_price != EMPTY && borrow_price != EMPTY && borrow_price <= lend_price {
        opening.last_lend_unit_price = lend_price;
        opening.last_borrow_unit_price = borrow_price;

        if lend_amount > borrow_amount {
            opening.opening_unit_price = lend_price;
            opening.offset_amount += borrow_amount;
            lend_amount -= borrow_amount;
            borrow_price = borrow.next(borrow_price);
            borrow_amount = borrow.node_total_amount(borrow_price);
        } else if lend_amount < borrow_amount {
            opening.opening_unit_price = borrow_price;
            opening.offset_amount += lend_amount;
            borrow_amount -= lend_amount;
            lend_price = lend.prev(lend_price);
            lend_amount = lend.node_total_amount(lend_price);
        } else {
            opening.opening_unit_price = (lend_price + borrow_price) / 2;
            opening.offset_amount += lend_amount;
            lend_price = lend.prev(lend_price);
            lend_amount = lend.node_total_amount(lend_price);
            borrow_price = borrow.next(borrow_price);
            borrow_amount = borrow.node_total_amount(borrow_price);
        }
    }

    (opening.offset_amount > 0).then_some(opening)
}

impl OrderBook {
    /// Run the opening auction and open the book.
    pub fn execute_itayose_call(&mut self, now: u64) -> Result<ItayoseOutcome> {
        self.advance(now);
        if self.state() != BookState::Itayose {
            return Err(LendbookError::NotInItayosePeriod { state: self.state() });
        }

        let Some(opening) = compute_opening_unit_price(&self.lend, &self.borrow) else {
            let reference = self.mid_unit_price();
            self.circuit_breaker.set_reference_unit_price(reference);
            tracing::info!(
                market = %self.market(),
                reference = ?reference,
                "Itayose found no crossing orders"
            );
            self.transition(BookState::Open);
            return Ok(ItayoseOutcome {
                log: None,
                reference_unit_price: reference,
            });
        };

        let offset = opening.offset_amount;
        let lend_estimate = self
            .lend
            .estimate_drop_from_last(offset, opening.last_lend_unit_price);
        let borrow_estimate = self
            .borrow
            .estimate_drop_from_first(offset, opening.last_borrow_unit_price);
        if lend_estimate.amount != offset || borrow_estimate.amount != offset {
            tracing::warn!(
                offset = %offset,
                lend = %lend_estimate.amount,
                borrow = %borrow_estimate.amount,
                "Itayose volumes disagree"
            );
            return Err(LendbookError::InvariantViolation {
                reason: format!(
                    "itayose offset {offset} but lend side clears {} and borrow side {}",
                    lend_estimate.amount, borrow_estimate.amount
                ),
            });
        }

        let matched_amount = offset
            .checked_mul(2)
            .ok_or_else(|| LendbookError::InvariantViolation {
                reason: format!("itayose offset {offset} overflows the matched amount"),
            })?;

        let lend_drop = self.lend.drop_from_last(offset, opening.last_lend_unit_price);
        let borrow_drop = self
            .borrow
            .drop_from_first(offset, opening.last_borrow_unit_price);
        self.settle_makers(Side::Lend, &lend_drop, Some(opening.opening_unit_price));
        self.settle_makers(Side::Borrow, &borrow_drop, Some(opening.opening_unit_price));

        let log = ItayoseLog {
            opening_unit_price: opening.opening_unit_price,
            last_lend_unit_price: opening.last_lend_unit_price,
            last_borrow_unit_price: opening.last_borrow_unit_price,
            offset_amount: offset,
        };
        self.circuit_breaker
            .set_reference_unit_price(Some(opening.opening_unit_price));
        self.itayose_log = Some(log.clone());

        tracing::info!(
            market = %self.market(),
            opening_unit_price = opening.opening_unit_price,
            offset_amount = %offset,
            "Itayose executed"
        );
        self.push_event(BookEvent::ItayoseExecuted(ItayoseExecutedEvent {
            opening_unit_price: opening.opening_unit_price,
            matched_amount,
            offset_amount: offset,
            last_lend_unit_price: opening.last_lend_unit_price,
            last_borrow_unit_price: opening.last_borrow_unit_price,
        }));
        self.transition(BookState::Open);

        Ok(ItayoseOutcome {
            log: Some(log),
            reference_unit_price: Some(opening.opening_unit_price),
        })
    }
}
