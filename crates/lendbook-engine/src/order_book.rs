//! The order book for a single (currency, maturity) market.
//!
//! Holds both price trees, the order index used for cancellation, the
//! lifecycle state and the circuit breaker. Matching and the opening
//! auction live in [`crate::matching`] and [`crate::itayose`].
//!
//! Every operation takes the caller's current time and applies time-based
//! transitions first. Validation then runs before any mutation, so a failed
//! operation leaves the trees untouched.

use std::collections::{BTreeSet, HashMap};

use lendbook_types::{
    AccountId, Amount, BookEvent, BookState, CancelEvent, LendbookError, MakeEvent, MarketConfig,
    MarketKey, Order, OrderId, Result, Side, UnitPrice, validate_amount, validate_unit_price,
};
use serde::{Deserialize, Serialize};

use crate::circuit_breaker::CircuitBreaker;
use crate::itayose::ItayoseLog;
use crate::price_level_tree::{EMPTY, LevelSummary, PriceLevelTree, QueuedOrder};

/// One side of the book as parallel arrays, best price first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookSide {
    pub unit_prices: Vec<UnitPrice>,
    pub amounts: Vec<Amount>,
    pub order_counts: Vec<usize>,
}

impl From<Vec<LevelSummary>> for OrderBookSide {
    fn from(levels: Vec<LevelSummary>) -> Self {
        let mut side = Self::default();
        for level in levels {
            side.unit_prices.push(level.unit_price);
            side.amounts.push(level.amount);
            side.order_counts.push(level.order_count);
        }
        side
    }
}

/// Point-in-time view of a book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub market: MarketKey,
    pub state: BookState,
    pub best_lend_unit_price: Option<UnitPrice>,
    pub best_borrow_unit_price: Option<UnitPrice>,
    pub reference_unit_price: Option<UnitPrice>,
    pub lend: OrderBookSide,
    pub borrow: OrderBookSide,
    pub itayose_log: Option<ItayoseLog>,
}

#[derive(Debug, Clone)]
pub struct OrderBook {
    config: MarketConfig,
    state: BookState,
    pub(crate) lend: PriceLevelTree,
    pub(crate) borrow: PriceLevelTree,
    /// `OrderId -> (side, unit price)` for O(log n) cancel.
    index: HashMap<OrderId, (Side, UnitPrice)>,
    account_orders: HashMap<AccountId, BTreeSet<OrderId>>,
    last_order_id: OrderId,
    pub(crate) circuit_breaker: CircuitBreaker,
    pub(crate) itayose_log: Option<ItayoseLog>,
    events: Vec<BookEvent>,
}

impl OrderBook {
    /// Create an empty book in the pre-order period.
    pub fn new(config: MarketConfig) -> Result<Self> {
        config.validate()?;
        let circuit_breaker = CircuitBreaker::new(config.circuit_breaker.clone());
        tracing::info!(market = %config.key(), opening_date = config.opening_date, "Order book created");
        Ok(Self {
            config,
            state: BookState::PreOrder,
            lend: PriceLevelTree::new(),
            borrow: PriceLevelTree::new(),
            index: HashMap::new(),
            account_orders: HashMap::new(),
            last_order_id: OrderId(0),
            circuit_breaker,
            itayose_log: None,
            events: Vec::new(),
        })
    }

    // =================================================================
    // Lifecycle
    // =================================================================

    /// Apply time-based transitions for `now`.
    pub fn advance(&mut self, now: u64) {
        if now >= self.config.maturity.0 {
            if self.state != BookState::Matured {
                self.transition(BookState::Matured);
            }
            return;
        }
        if self.state == BookState::PreOrder && now >= self.config.opening_date {
            if self.lend.is_empty() && self.borrow.is_empty() {
                self.transition(BookState::Open);
            } else {
                self.transition(BookState::Itayose);
            }
        }
    }

    pub fn pause(&mut self, now: u64) -> Result<()> {
        self.advance(now);
        if self.state != BookState::Open {
            return Err(LendbookError::InvalidStateTransition {
                from: self.state,
                action: "pause".into(),
            });
        }
        self.transition(BookState::Paused);
        Ok(())
    }

    pub fn unpause(&mut self, now: u64) -> Result<()> {
        self.advance(now);
        if self.state != BookState::Paused {
            return Err(LendbookError::InvalidStateTransition {
                from: self.state,
                action: "unpause".into(),
            });
        }
        self.transition(BookState::Open);
        Ok(())
    }

    pub(crate) fn transition(&mut self, to: BookState) {
        let from = self.state;
        self.state = to;
        tracing::info!(market = %self.config.key(), from = %from, to = %to, "Order book state changed");
        self.events.push(BookEvent::StateChanged { from, to });
    }

    /// Fails unless continuous matching is allowed.
    pub(crate) fn ensure_open(&self) -> Result<()> {
        match self.state {
            BookState::Open => Ok(()),
            BookState::Paused => Err(LendbookError::MarketPaused),
            BookState::Matured => Err(LendbookError::MarketMatured),
            BookState::PreOrder | BookState::Itayose => Err(LendbookError::MarketNotOpened {
                state: self.state,
            }),
        }
    }

    // =================================================================
    // Pre-orders
    // =================================================================

    /// Rest an order without matching. Only legal before the opening date.
    pub fn create_pre_order(
        &mut self,
        side: Side,
        account: AccountId,
        amount: Amount,
        unit_price: UnitPrice,
        now: u64,
    ) -> Result<Order> {
        self.advance(now);
        if self.state != BookState::PreOrder {
            return Err(LendbookError::NotInPreOrderPeriod { state: self.state });
        }
        validate_amount(amount)?;
        validate_unit_price(unit_price)?;

        self.rest_order(side, account, amount, unit_price, now)
    }

    // =================================================================
    // Cancellation
    // =================================================================

    /// Cancel a resting order. When `account` is given it must own the order;
    /// otherwise the order is reported as not found.
    pub fn cancel_order(
        &mut self,
        order_id: OrderId,
        account: Option<AccountId>,
        now: u64,
    ) -> Result<Order> {
        self.advance(now);
        if !self.state.accepts_cancellation() {
            return Err(match self.state {
                BookState::Matured => LendbookError::MarketMatured,
                _ => LendbookError::MarketPaused,
            });
        }

        let (side, unit_price) = *self
            .index
            .get(&order_id)
            .ok_or(LendbookError::OrderNotFound(order_id))?;
        let tree = self.tree(side);
        let owner = tree
            .order(order_id)
            .map(|o| o.maker)
            .ok_or(LendbookError::OrderNotFound(order_id))?;
        if account.is_some_and(|a| a != owner) {
            return Err(LendbookError::OrderNotFound(order_id));
        }

        let queued = self.tree_mut(side).remove(unit_price, order_id)?;
        self.forget_order(order_id, owner);

        tracing::debug!(order_id = %order_id, side = %side, unit_price, amount = %queued.amount, "Order cancelled");
        self.events.push(BookEvent::Cancel(CancelEvent {
            order_id,
            maker: owner,
            side,
            amount: queued.amount,
            unit_price,
        }));
        Ok(self.to_order(side, &queued))
    }

    // =================================================================
    // Resting orders / indexes
    // =================================================================

    /// Allocate an id, queue the order and announce it.
    pub(crate) fn rest_order(
        &mut self,
        side: Side,
        account: AccountId,
        amount: Amount,
        unit_price: UnitPrice,
        now: u64,
    ) -> Result<Order> {
        let order_id = self.last_order_id.next();
        self.tree_mut(side).insert(unit_price, order_id, account, amount, now)?;
        self.last_order_id = order_id;
        self.index.insert(order_id, (side, unit_price));
        self.account_orders.entry(account).or_default().insert(order_id);

        tracing::debug!(order_id = %order_id, side = %side, unit_price, amount = %amount, "Order resting");
        self.events.push(BookEvent::Make(MakeEvent {
            order_id,
            maker: account,
            side,
            amount,
            unit_price,
        }));

        Ok(Order {
            id: order_id,
            side,
            unit_price,
            amount,
            maker: account,
            maturity: self.config.maturity,
            timestamp: now,
        })
    }

    /// Drop an order that left the book from both indexes.
    pub(crate) fn forget_order(&mut self, order_id: OrderId, maker: AccountId) {
        self.index.remove(&order_id);
        if let Some(ids) = self.account_orders.get_mut(&maker) {
            ids.remove(&order_id);
            if ids.is_empty() {
                self.account_orders.remove(&maker);
            }
        }
    }

    pub(crate) fn push_event(&mut self, event: BookEvent) {
        self.events.push(event);
    }

    pub(crate) fn tree(&self, side: Side) -> &PriceLevelTree {
        match side {
            Side::Lend => &self.lend,
            Side::Borrow => &self.borrow,
        }
    }

    pub(crate) fn tree_mut(&mut self, side: Side) -> &mut PriceLevelTree {
        match side {
            Side::Lend => &mut self.lend,
            Side::Borrow => &mut self.borrow,
        }
    }

    fn to_order(&self, side: Side, queued: &QueuedOrder) -> Order {
        Order {
            id: queued.order_id,
            side,
            unit_price: queued.unit_price,
            amount: queued.amount,
            maker: queued.maker,
            maturity: self.config.maturity,
            timestamp: queued.timestamp,
        }
    }

    // =================================================================
    // Events
    // =================================================================

    /// Events emitted since the last call, oldest first.
    pub fn take_events(&mut self) -> Vec<BookEvent> {
        std::mem::take(&mut self.events)
    }

    #[must_use]
    pub fn pending_events(&self) -> &[BookEvent] {
        &self.events
    }

    // =================================================================
    // Queries
    // =================================================================

    #[must_use]
    pub fn config(&self) -> &MarketConfig {
        &self.config
    }

    #[must_use]
    pub fn market(&self) -> MarketKey {
        self.config.key()
    }

    #[must_use]
    pub fn state(&self) -> BookState {
        self.state
    }

    #[must_use]
    pub fn is_opened(&self) -> bool {
        self.state.is_opened()
    }

    #[must_use]
    pub fn is_matured(&self) -> bool {
        self.state == BookState::Matured
    }

    /// Highest resting LEND price.
    #[must_use]
    pub fn best_lend_unit_price(&self) -> Option<UnitPrice> {
        Some(self.lend.last()).filter(|p| *p != EMPTY)
    }

    /// Lowest resting BORROW price.
    #[must_use]
    pub fn best_borrow_unit_price(&self) -> Option<UnitPrice> {
        Some(self.borrow.first()).filter(|p| *p != EMPTY)
    }

    /// Integer midpoint of the best prices. `None` if either side is empty.
    #[must_use]
    pub fn mid_unit_price(&self) -> Option<UnitPrice> {
        match (self.best_lend_unit_price(), self.best_borrow_unit_price()) {
            (Some(lend), Some(borrow)) => Some((lend + borrow) / 2),
            _ => None,
        }
    }

    /// Up to `depth` LEND levels, highest price first.
    #[must_use]
    pub fn lend_order_book(&self, depth: usize) -> OrderBookSide {
        self.lend.levels_from_last(depth).into()
    }

    /// Up to `depth` BORROW levels, lowest price first.
    #[must_use]
    pub fn borrow_order_book(&self, depth: usize) -> OrderBookSide {
        self.borrow.levels_from_first(depth).into()
    }

    #[must_use]
    pub fn get_order(&self, order_id: OrderId) -> Option<Order> {
        let (side, _) = self.index.get(&order_id)?;
        let queued = self.tree(*side).order(order_id)?;
        Some(self.to_order(*side, queued))
    }

    /// Resting order ids of `account`, oldest first.
    #[must_use]
    pub fn account_order_ids(&self, account: &AccountId) -> Vec<OrderId> {
        self.account_orders
            .get(account)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn reference_unit_price(&self) -> Option<UnitPrice> {
        self.circuit_breaker.reference_unit_price()
    }

    #[must_use]
    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    #[must_use]
    pub fn itayose_log(&self) -> Option<&ItayoseLog> {
        self.itayose_log.as_ref()
    }

    #[must_use]
    pub fn lend_tree(&self) -> &PriceLevelTree {
        &self.lend
    }

    #[must_use]
    pub fn borrow_tree(&self) -> &PriceLevelTree {
        &self.borrow
    }

    #[must_use]
    pub fn total_lend_amount(&self) -> Amount {
        self.lend.total_amount()
    }

    #[must_use]
    pub fn total_borrow_amount(&self) -> Amount {
        self.borrow.total_amount()
    }

    #[must_use]
    pub fn last_order_id(&self) -> OrderId {
        self.last_order_id
    }

    #[must_use]
    pub fn order_count(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn snapshot(&self, depth: usize) -> BookSnapshot {
        BookSnapshot {
            market: self.market(),
            state: self.state,
            best_lend_unit_price: self.best_lend_unit_price(),
            best_borrow_unit_price: self.best_borrow_unit_price(),
            reference_unit_price: self.reference_unit_price(),
            lend: self.lend_order_book(depth),
            borrow: self.borrow_order_book(depth),
            itayose_log: self.itayose_log.clone(),
        }
    }

    /// Check both trees and that the index agrees with them.
    pub fn verify_invariants(&self) -> Result<()> {
        self.lend.verify_invariants()?;
        self.borrow.verify_invariants()?;

        let queued = self.lend.order_count() + self.borrow.order_count();
        if queued != self.index.len() {
            tracing::warn!(queued, indexed = self.index.len(), "Order index out of sync");
            return Err(LendbookError::InvariantViolation {
                reason: format!("{queued} queued orders, {} indexed", self.index.len()),
            });
        }
        for (order_id, (side, unit_price)) in &self.index {
            match self.tree(*side).order(*order_id) {
                Some(order) if order.unit_price == *unit_price => {}
                _ => {
                    return Err(LendbookError::InvariantViolation {
                        reason: format!("index entry for order {order_id} is stale"),
                    });
                }
            }
        }
        let by_account: usize = self.account_orders.values().map(BTreeSet::len).sum();
        if by_account != self.index.len() {
            return Err(LendbookError::InvariantViolation {
                reason: format!("{by_account} orders by account, {} indexed", self.index.len()),
            });
        }
        Ok(())
    }
}
