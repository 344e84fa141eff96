//! Continuous matching for an open book.
//!
//! A LEND taker sweeps the BORROW tree from its lowest price upward, bounded
//! by its own price (or the circuit breaker threshold for market orders). A
//! BORROW taker sweeps the LEND tree from its highest price downward. A limit
//! remainder rests at the order's price; a market shortfall is discarded.

use lendbook_types::{
    AccountId, Amount, BookEvent, FillEvent, LevelFill, MakeEvent, MakerFilledEvent, Order,
    Result, Side, UnitPrice, constants, validate_amount, validate_unit_price,
};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::{Deserialize, Serialize};

use crate::order_book::OrderBook;
use crate::price_level_tree::{DropEstimate, DropResult};

/// Outcome of [`OrderBook::create_order`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderExecution {
    pub side: Side,
    pub requested_amount: Amount,
    pub filled_amount: Amount,
    pub filled_future_value: Amount,
    pub average_unit_price: Option<Decimal>,
    /// Last price executed at, if anything filled.
    pub last_unit_price: Option<UnitPrice>,
    pub levels: Vec<LevelFill>,
    /// The resting remainder of a limit order.
    pub placed_order: Option<Order>,
    /// Unfilled amount of a market order.
    pub discarded_amount: Amount,
}

/// Outcome of [`OrderBook::estimate_fill`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillEstimate {
    pub filled_amount: Amount,
    pub filled_future_value: Amount,
    pub average_unit_price: Option<Decimal>,
    pub last_unit_price: Option<UnitPrice>,
    pub levels: Vec<LevelFill>,
    /// Amount that would rest (limit) or be discarded (market).
    pub unfilled_amount: Amount,
}

/// Blended price of a fill: `amount * PRICE_DIGIT / future_value`.
///
/// The whole part is exact integer division. The remainder fraction is
/// scaled into `Decimal`'s 96-bit mantissa before dividing, so fills up to
/// [`constants::MAX_AMOUNT`] keep a price.
#[must_use]
pub fn average_unit_price(amount: Amount, future_value: Amount) -> Option<Decimal> {
    if future_value == 0 {
        return None;
    }
    let scaled = amount.checked_mul(Amount::from(constants::PRICE_DIGIT))?;
    let whole = scaled / future_value;
    let shift = (Amount::BITS - future_value.leading_zeros()).saturating_sub(96);
    let remainder = Decimal::from_u128((scaled % future_value) >> shift)?;
    let divisor = Decimal::from_u128(future_value >> shift)?;
    Decimal::from_u128(whole)?
        .checked_add(remainder.checked_div(divisor)?)
        .map(|price| price.round_dp(constants::AVERAGE_PRICE_PRECISION))
}

impl OrderBook {
    /// Match a new order against the opposite side.
    ///
    /// `unit_price = None` makes a market order. Partial and zero fills are
    /// successful outcomes.
    pub fn create_order(
        &mut self,
        side: Side,
        account: AccountId,
        amount: Amount,
        unit_price: Option<UnitPrice>,
        now: u64,
    ) -> Result<OrderExecution> {
        self.advance(now);
        self.ensure_open()?;
        self.validate_taker(side, amount, unit_price)?;
        if unit_price.is_some() {
            // The remainder must be able to rest before any maker is touched.
            self.tree(side).check_capacity(amount)?;
        }

        let limit = self.circuit_breaker.sweep_limit(side, unit_price);
        let dropped = match side {
            Side::Lend => self.borrow.drop_from_first(amount, limit),
            Side::Borrow => self.lend.drop_from_last(amount, limit),
        };

        let filled_future_value = dropped.future_value();
        let average = average_unit_price(dropped.dropped_amount, filled_future_value);
        let last_unit_price = (dropped.dropped_amount > 0).then_some(dropped.price_reached);

        if dropped.dropped_amount > 0 {
            self.settle_makers(side.opposite(), &dropped, None);
            for level in &dropped.levels {
                tracing::debug!(
                    side = %side,
                    unit_price = level.unit_price,
                    amount = %level.amount,
                    orders = level.order_count,
                    "Level filled"
                );
            }
            self.circuit_breaker
                .set_reference_unit_price(Some(dropped.price_reached));
            self.push_event(BookEvent::Fill(FillEvent {
                taker: account,
                side,
                amount: dropped.dropped_amount,
                future_value: filled_future_value,
                average_unit_price: average,
                levels: dropped.levels.clone(),
            }));
        }

        let remaining = amount - dropped.dropped_amount;
        let mut placed_order = None;
        let mut discarded_amount = 0;
        if remaining > 0 {
            match unit_price {
                Some(price) => {
                    placed_order = Some(self.rest_order(side, account, remaining, price, now)?);
                }
                None => {
                    tracing::debug!(side = %side, discarded = %remaining, "Market order shortfall discarded");
                    discarded_amount = remaining;
                }
            }
        }

        Ok(OrderExecution {
            side,
            requested_amount: amount,
            filled_amount: dropped.dropped_amount,
            filled_future_value,
            average_unit_price: average,
            last_unit_price,
            levels: dropped.levels,
            placed_order,
            discarded_amount,
        })
    }

    /// Preview [`Self::create_order`] against the current book without
    /// mutating it. Uses the book's current state; time is not advanced.
    pub fn estimate_fill(
        &self,
        side: Side,
        amount: Amount,
        unit_price: Option<UnitPrice>,
    ) -> Result<FillEstimate> {
        self.ensure_open()?;
        self.validate_taker(side, amount, unit_price)?;

        let limit = self.circuit_breaker.sweep_limit(side, unit_price);
        let DropEstimate {
            amount: filled,
            price_reached,
            levels,
        } = match side {
            Side::Lend => self.borrow.estimate_drop_from_first(amount, limit),
            Side::Borrow => self.lend.estimate_drop_from_last(amount, limit),
        };
        let future_value = levels
            .iter()
            .fold(0, |total: Amount, l| total.saturating_add(l.future_value));

        Ok(FillEstimate {
            filled_amount: filled,
            filled_future_value: future_value,
            average_unit_price: average_unit_price(filled, future_value),
            last_unit_price: (filled > 0).then_some(price_reached),
            levels,
            unfilled_amount: amount - filled,
        })
    }

    fn validate_taker(&self, side: Side, amount: Amount, unit_price: Option<UnitPrice>) -> Result<()> {
        validate_amount(amount)?;
        if let Some(price) = unit_price {
            validate_unit_price(price)?;
            self.circuit_breaker.check_limit(side, price)?;
        }
        Ok(())
    }

    /// Emit maker-side events for a drop on `maker_side` and unindex the
    /// orders that left the book. `execution_price` overrides each order's
    /// own price (used by the opening auction).
    pub(crate) fn settle_makers(
        &mut self,
        maker_side: Side,
        dropped: &DropResult,
        execution_price: Option<UnitPrice>,
    ) {
        for filled in &dropped.filled_orders {
            self.forget_order(filled.order_id, filled.maker);
            self.push_event(BookEvent::MakerFilled(MakerFilledEvent {
                order_id: filled.order_id,
                maker: filled.maker,
                side: maker_side,
                filled_amount: filled.filled_amount,
                unit_price: execution_price.unwrap_or(filled.unit_price),
                remaining_amount: 0,
            }));
        }
        if let Some(partial) = &dropped.partially_filled {
            self.push_event(BookEvent::MakerFilled(MakerFilledEvent {
                order_id: partial.order_id,
                maker: partial.maker,
                side: maker_side,
                filled_amount: partial.filled_amount,
                unit_price: execution_price.unwrap_or(partial.unit_price),
                remaining_amount: partial.remaining_amount,
            }));
            self.push_event(BookEvent::Make(MakeEvent {
                order_id: partial.order_id,
                maker: partial.maker,
                side: maker_side,
                amount: partial.remaining_amount,
                unit_price: partial.unit_price,
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use lendbook_types::{BookState, LendbookError, MarketConfig, OrderId};

    use super::*;

    fn account(n: u8) -> AccountId {
        AccountId::from_bytes([n; 16])
    }

    fn open_book() -> OrderBook {
        let mut book = OrderBook::new(MarketConfig::dummy()).unwrap();
        book.advance(1_000);
        book.take_events();
        book
    }

    #[test]
    fn limit_order_rests_when_nothing_crosses() {
        let mut book = open_book();
        let exec = book
            .create_order(Side::Lend, account(1), 500, Some(9_000), 1_001)
            .unwrap();
        assert_eq!(exec.filled_amount, 0);
        assert_eq!(exec.placed_order.as_ref().unwrap().amount, 500);
        assert_eq!(book.best_lend_unit_price(), Some(9_000));
        assert!(book.reference_unit_price().is_none());

        let events = book.take_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], BookEvent::Make(_)));
    }

    #[test]
    fn lend_taker_sweeps_borrows_up_to_its_price() {
        let mut book = open_book();
        book.create_order(Side::Borrow, account(1), 100, Some(8_000), 1_001).unwrap();
        book.create_order(Side::Borrow, account(2), 100, Some(8_100), 1_002).unwrap();
        book.create_order(Side::Borrow, account(3), 100, Some(8_200), 1_003).unwrap();
        book.take_events();

        let exec = book
            .create_order(Side::Lend, account(4), 250, Some(8_100), 1_004)
            .unwrap();
        assert_eq!(exec.filled_amount, 200);
        assert_eq!(exec.last_unit_price, Some(8_100));
        let prices: Vec<UnitPrice> = exec.levels.iter().map(|l| l.unit_price).collect();
        assert_eq!(prices, vec![8_000, 8_100]);
        // 50 rests at the taker's price.
        assert_eq!(exec.placed_order.unwrap().amount, 50);
        assert_eq!(book.best_lend_unit_price(), Some(8_100));
        assert_eq!(book.best_borrow_unit_price(), Some(8_200));
        assert_eq!(book.reference_unit_price(), Some(8_100));
        book.verify_invariants().unwrap();
    }

    #[test]
    fn market_order_shortfall_is_discarded() {
        let mut book = open_book();
        book.create_order(Side::Lend, account(1), 100, Some(9_000), 1_001).unwrap();
        let exec = book.create_order(Side::Borrow, account(2), 300, None, 1_002).unwrap();
        assert_eq!(exec.filled_amount, 100);
        assert_eq!(exec.discarded_amount, 200);
        assert!(exec.placed_order.is_none());
        assert!(book.lend_tree().is_empty());
        assert!(book.borrow_tree().is_empty());
    }

    #[test]
    fn market_order_on_empty_book_fills_nothing() {
        let mut book = open_book();
        let exec = book.create_order(Side::Lend, account(1), 300, None, 1_001).unwrap();
        assert_eq!(exec.filled_amount, 0);
        assert_eq!(exec.discarded_amount, 300);
        assert!(exec.average_unit_price.is_none());
        assert!(book.take_events().is_empty());
    }

    #[test]
    fn market_order_is_clamped_by_circuit_breaker() {
        let mut book = open_book();
        book.create_order(Side::Lend, account(1), 100, Some(8_000), 1_001).unwrap();
        book.create_order(Side::Borrow, account(2), 100, None, 1_002).unwrap();
        assert_eq!(book.reference_unit_price(), Some(8_000));

        // Band is [7_200, 8_800]; the 7_000 lend is out of reach.
        book.create_order(Side::Lend, account(1), 100, Some(7_500), 1_003).unwrap();
        book.create_order(Side::Lend, account(1), 100, Some(7_000), 1_004).unwrap();
        let exec = book.create_order(Side::Borrow, account(3), 500, None, 1_005).unwrap();
        assert_eq!(exec.filled_amount, 100);
        assert_eq!(book.best_lend_unit_price(), Some(7_000));
        assert_eq!(book.reference_unit_price(), Some(7_500));
    }

    #[test]
    fn circuit_breaker_rejects_aggressive_limit() {
        let mut book = open_book();
        book.create_order(Side::Lend, account(1), 100, Some(8_000), 1_001).unwrap();
        book.create_order(Side::Borrow, account(2), 100, None, 1_002).unwrap();
        book.take_events();

        let err = book
            .create_order(Side::Lend, account(1), 100, Some(9_000), 1_003)
            .unwrap_err();
        assert!(matches!(err, LendbookError::InvalidUnitPrice { unit_price: 9_000, .. }));
        let err = book
            .create_order(Side::Borrow, account(1), 100, Some(7_000), 1_003)
            .unwrap_err();
        assert!(matches!(err, LendbookError::InvalidUnitPrice { .. }));
        assert!(book.take_events().is_empty());
        assert!(book.lend_tree().is_empty());
    }

    #[test]
    fn partially_filled_maker_is_reannounced() {
        let mut book = open_book();
        let maker = book
            .create_order(Side::Lend, account(1), 100, Some(9_000), 1_001)
            .unwrap()
            .placed_order
            .unwrap();
        book.take_events();

        book.create_order(Side::Borrow, account(2), 40, Some(9_000), 1_002).unwrap();
        let events = book.take_events();
        assert_eq!(events.len(), 3);
        assert!(matches!(
            &events[0],
            BookEvent::MakerFilled(e) if e.order_id == maker.id && e.filled_amount == 40 && e.remaining_amount == 60
        ));
        assert!(matches!(
            &events[1],
            BookEvent::Make(e) if e.order_id == maker.id && e.amount == 60
        ));
        assert!(matches!(&events[2], BookEvent::Fill(e) if e.amount == 40));
        assert_eq!(book.get_order(maker.id).unwrap().amount, 60);
    }

    #[test]
    fn fully_filled_maker_leaves_indexes() {
        let mut book = open_book();
        book.create_order(Side::Borrow, account(1), 100, Some(9_000), 1_001).unwrap();
        book.create_order(Side::Lend, account(2), 100, None, 1_002).unwrap();
        assert!(book.get_order(OrderId(1)).is_none());
        assert!(book.account_order_ids(&account(1)).is_empty());
        book.verify_invariants().unwrap();
    }

    #[test]
    fn average_price_blends_levels() {
        let mut book = open_book();
        book.create_order(Side::Lend, account(1), 8_000, Some(8_000), 1_001).unwrap();
        let exec = book.create_order(Side::Borrow, account(2), 8_000, None, 1_002).unwrap();
        assert_eq!(exec.filled_future_value, 10_000);
        assert_eq!(exec.average_unit_price, Some(Decimal::from(8_000)));
    }

    #[test]
    fn state_gates_matching() {
        let mut book = OrderBook::new(MarketConfig::dummy()).unwrap();
        assert!(matches!(
            book.create_order(Side::Lend, account(1), 1, Some(9_000), 10),
            Err(LendbookError::MarketNotOpened {
                state: BookState::PreOrder
            })
        ));
        book.advance(1_000);
        book.pause(1_000).unwrap();
        assert!(matches!(
            book.create_order(Side::Lend, account(1), 1, Some(9_000), 1_001),
            Err(LendbookError::MarketPaused)
        ));
        assert!(matches!(
            book.create_order(Side::Lend, account(1), 1, Some(9_000), 1_000_000),
            Err(LendbookError::MarketMatured)
        ));
    }

    #[test]
    fn estimate_matches_execution() {
        let mut book = open_book();
        book.create_order(Side::Borrow, account(1), 100, Some(8_000), 1_001).unwrap();
        book.create_order(Side::Borrow, account(2), 100, Some(8_500), 1_002).unwrap();

        let estimate = book.estimate_fill(Side::Lend, 150, Some(8_500)).unwrap();
        let exec = book.create_order(Side::Lend, account(3), 150, Some(8_500), 1_003).unwrap();
        assert_eq!(estimate.filled_amount, exec.filled_amount);
        assert_eq!(estimate.filled_future_value, exec.filled_future_value);
        assert_eq!(estimate.average_unit_price, exec.average_unit_price);
        assert_eq!(estimate.levels, exec.levels);
        assert_eq!(estimate.unfilled_amount, 0);
    }

    #[test]
    fn average_unit_price_helper() {
        assert_eq!(average_unit_price(0, 0), None);
        assert_eq!(average_unit_price(9_800, 10_000), Some(Decimal::from(9_800)));
        assert_eq!(
            average_unit_price(100, 102),
            Some(Decimal::new(980_392_156_863, 8))
        );
        assert_eq!(
            average_unit_price(10u128.pow(25), 125 * 10u128.pow(23)),
            Some(Decimal::from(8_000))
        );
        let max_fv = constants::MAX_AMOUNT / 4 * 5 + constants::MAX_AMOUNT % 4 * 5 / 4;
        assert_eq!(
            average_unit_price(constants::MAX_AMOUNT, max_fv),
            Some(Decimal::from(8_000))
        );
    }

    #[test]
    fn large_market_fill_keeps_average_price() {
        let mut book = open_book();
        let amount = 10u128.pow(25);
        book.create_order(Side::Lend, account(1), amount, Some(8_000), 1_001).unwrap();
        let exec = book.create_order(Side::Borrow, account(2), amount, None, 1_002).unwrap();
        assert_eq!(exec.filled_amount, amount);
        assert_eq!(exec.filled_future_value, 125 * 10u128.pow(23));
        assert_eq!(exec.average_unit_price, Some(Decimal::from(8_000)));
        let fill = book
            .take_events()
            .into_iter()
            .find_map(|event| match event {
                BookEvent::Fill(fill) => Some(fill),
                _ => None,
            })
            .unwrap();
        assert_eq!(fill.average_unit_price, Some(Decimal::from(8_000)));
    }

    #[test]
    fn oversized_limit_order_rejected_before_sweeping() {
        let mut book = open_book();
        let half = constants::MAX_AMOUNT / 2 + 1;
        book.create_order(Side::Lend, account(1), half, Some(8_000), 1_001).unwrap();
        book.create_order(Side::Borrow, account(2), 10, Some(9_000), 1_002).unwrap();
        let before = book.state_digest();

        // Crosses the resting borrow, but the remainder could not rest.
        let err = book
            .create_order(Side::Lend, account(3), half, Some(9_000), 1_003)
            .unwrap_err();
        assert!(matches!(err, LendbookError::AmountTooLarge { .. }));
        assert_eq!(book.state_digest(), before);

        let err = book
            .create_order(Side::Borrow, account(3), constants::MAX_AMOUNT + 1, None, 1_004)
            .unwrap_err();
        assert!(matches!(err, LendbookError::AmountTooLarge { .. }));
        assert_eq!(book.state_digest(), before);
        book.verify_invariants().unwrap();
    }
}
