//! Operation log and replay.
//!
//! A book has no on-disk format: its state is whatever a sequence of
//! [`Operation`]s produces. Replaying the same sequence into a fresh book
//! yields the same events and the same state digest.

use lendbook_types::{AccountId, Amount, BookEvent, BookState, MarketConfig, Order, OrderId, Result, Side, UnitPrice};
use serde::{Deserialize, Serialize};

use crate::itayose::ItayoseOutcome;
use crate::matching::OrderExecution;
use crate::order_book::OrderBook;

/// A single mutating call on a book, with the caller's time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    CreatePreOrder {
        side: Side,
        account: AccountId,
        amount: Amount,
        unit_price: UnitPrice,
        now: u64,
    },
    CreateOrder {
        side: Side,
        account: AccountId,
        amount: Amount,
        /// Absent for market orders.
        #[serde(default)]
        unit_price: Option<UnitPrice>,
        now: u64,
    },
    CancelOrder {
        order_id: OrderId,
        #[serde(default)]
        account: Option<AccountId>,
        now: u64,
    },
    ExecuteItayoseCall {
        now: u64,
    },
    Pause {
        now: u64,
    },
    Unpause {
        now: u64,
    },
    Advance {
        now: u64,
    },
}

impl Operation {
    #[must_use]
    pub fn now(&self) -> u64 {
        match self {
            Self::CreatePreOrder { now, .. }
            | Self::CreateOrder { now, .. }
            | Self::CancelOrder { now, .. }
            | Self::ExecuteItayoseCall { now }
            | Self::Pause { now }
            | Self::Unpause { now }
            | Self::Advance { now } => *now,
        }
    }
}

/// What a successful [`Operation`] returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationOutput {
    PreOrder(Order),
    Execution(OrderExecution),
    Cancelled(Order),
    Itayose(ItayoseOutcome),
    State { state: BookState },
}

/// An operation that failed during replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub index: usize,
    pub error: String,
}

#[derive(Debug)]
pub struct ReplayOutput {
    pub book: OrderBook,
    pub events: Vec<BookEvent>,
    pub rejections: Vec<Rejection>,
}

impl OrderBook {
    /// Dispatch one operation.
    pub fn apply(&mut self, operation: &Operation) -> Result<OperationOutput> {
        match *operation {
            Operation::CreatePreOrder {
                side,
                account,
                amount,
                unit_price,
                now,
            } => self
                .create_pre_order(side, account, amount, unit_price, now)
                .map(OperationOutput::PreOrder),
            Operation::CreateOrder {
                side,
                account,
                amount,
                unit_price,
                now,
            } => self
                .create_order(side, account, amount, unit_price, now)
                .map(OperationOutput::Execution),
            Operation::CancelOrder {
                order_id,
                account,
                now,
            } => self
                .cancel_order(order_id, account, now)
                .map(OperationOutput::Cancelled),
            Operation::ExecuteItayoseCall { now } => {
                self.execute_itayose_call(now).map(OperationOutput::Itayose)
            }
            Operation::Pause { now } => self.pause(now).map(|()| OperationOutput::State {
                state: self.state(),
            }),
            Operation::Unpause { now } => self.unpause(now).map(|()| OperationOutput::State {
                state: self.state(),
            }),
            Operation::Advance { now } => {
                self.advance(now);
                Ok(OperationOutput::State {
                    state: self.state(),
                })
            }
        }
    }
}

/// Build a fresh book from `config` and apply every operation in order.
///
/// Failed operations are recorded and skipped; they never mutate the trees.
pub fn replay(config: MarketConfig, operations: &[Operation]) -> Result<ReplayOutput> {
    let mut book = OrderBook::new(config)?;
    let mut events = Vec::new();
    let mut rejections = Vec::new();

    for (index, operation) in operations.iter().enumerate() {
        if let Err(err) = book.apply(operation) {
            tracing::debug!(index, error = %err, "Operation rejected during replay");
            rejections.push(Rejection {
                index,
                error: err.to_string(),
            });
        }
        events.extend(book.take_events());
    }

    Ok(ReplayOutput {
        book,
        events,
        rejections,
    })
}
