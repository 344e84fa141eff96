//! Registry of order books keyed by (currency, maturity).
//!
//! The controller creates books, routes requests to their actors and fans
//! every book's events into one broadcast channel. Collateral is checked by
//! the caller; the controller only enforces the resulting approval flag.

use std::collections::HashMap;

use lendbook_engine::{OrderBook, OrderExecution};
use lendbook_types::{
    AccountId, Amount, EngineConfig, LendbookError, MarketConfig, MarketKey, Order, OrderId,
    Result, Side, UnitPrice,
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::actor::{BookHandle, MarketEvent};

/// Outcome of the caller's collateral check for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderApproval {
    Approved,
    NotApproved,
}

/// An order submitted through the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub side: Side,
    pub account: AccountId,
    pub amount: Amount,
    /// Absent for market orders.
    #[serde(default)]
    pub unit_price: Option<UnitPrice>,
    pub now: u64,
}

pub struct MarketController {
    config: EngineConfig,
    books: HashMap<MarketKey, BookHandle>,
    tasks: Vec<JoinHandle<OrderBook>>,
    events: broadcast::Sender<MarketEvent>,
}

impl MarketController {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_channel_capacity.max(1));
        Self {
            config,
            books: HashMap::new(),
            tasks: Vec::new(),
            events,
        }
    }

    /// Create and start the book for `market`. Must be called inside a tokio runtime.
    pub fn create_order_book(&mut self, market: MarketConfig) -> Result<BookHandle> {
        let key = market.key();
        if self.books.contains_key(&key) {
            return Err(LendbookError::MarketAlreadyExists(key));
        }
        let book = OrderBook::new(market)?;
        let (handle, task) =
            BookHandle::spawn(book, self.config.command_queue_capacity, self.events.clone());
        tracing::info!(market = %key, "Market registered");
        self.books.insert(key, handle.clone());
        self.tasks.push(task);
        Ok(handle)
    }

    pub fn book(&self, key: &MarketKey) -> Result<&BookHandle> {
        self.books
            .get(key)
            .ok_or_else(|| LendbookError::MarketNotFound(key.clone()))
    }

    /// Registered markets, sorted.
    #[must_use]
    pub fn market_keys(&self) -> Vec<MarketKey> {
        let mut keys: Vec<MarketKey> = self.books.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Receive events from every book created by this controller.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<MarketEvent> {
        self.events.subscribe()
    }

    // =================================================================
    // Routing
    // =================================================================

    /// Submit an order. Borrow orders need collateral approval.
    pub async fn create_order(
        &self,
        key: &MarketKey,
        request: OrderRequest,
        approval: OrderApproval,
    ) -> Result<OrderExecution> {
        check_approval(request.side, approval)?;
        self.book(key)?
            .create_order(
                request.side,
                request.account,
                request.amount,
                request.unit_price,
                request.now,
            )
            .await
    }

    /// Submit a pre-order. Borrow orders need collateral approval.
    pub async fn create_pre_order(
        &self,
        key: &MarketKey,
        request: OrderRequest,
        approval: OrderApproval,
    ) -> Result<Order> {
        check_approval(request.side, approval)?;
        let unit_price = request.unit_price.ok_or(LendbookError::InvalidUnitPrice {
            unit_price: 0,
            reason: "pre-orders need a limit price".into(),
        })?;
        self.book(key)?
            .create_pre_order(
                request.side,
                request.account,
                request.amount,
                unit_price,
                request.now,
            )
            .await
    }

    pub async fn cancel_order(
        &self,
        key: &MarketKey,
        order_id: OrderId,
        account: AccountId,
        now: u64,
    ) -> Result<Order> {
        self.book(key)?
            .cancel_order(order_id, Some(account), now)
            .await
    }

    /// Stop every actor and hand back the final books.
    pub async fn shutdown(self) -> Result<Vec<OrderBook>> {
        let Self { books, tasks, .. } = self;
        drop(books);
        let mut finished = Vec::with_capacity(tasks.len());
        for task in tasks {
            finished.push(
                task.await
                    .map_err(|err| LendbookError::Internal(format!("book actor failed: {err}")))?,
            );
        }
        tracing::info!(books = finished.len(), "Market controller stopped");
        Ok(finished)
    }
}

fn check_approval(side: Side, approval: OrderApproval) -> Result<()> {
    if side == Side::Borrow && approval != OrderApproval::Approved {
        tracing::warn!("Borrow order rejected without collateral approval");
        return Err(LendbookError::CollateralNotApproved);
    }
    Ok(())
}
