//! Single-writer actor owning one order book.
//!
//! The book lives inside a tokio task and is only touched by that task.
//! Callers hold a cloneable [`BookHandle`] and talk to it over a bounded
//! `mpsc` queue; every request carries a `oneshot` sender for the reply.
//! Events produced by a command are broadcast before the reply is sent, so a
//! subscriber that awaits the reply has already been offered every event.

use lendbook_engine::{BookSnapshot, FillEstimate, ItayoseOutcome, Operation, OperationOutput, OrderBook, OrderExecution};
use lendbook_types::{
    AccountId, Amount, BookEvent, BookState, LendbookError, MarketKey, Order, OrderId, Result,
    Side, UnitPrice,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

/// A book event tagged with its market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketEvent {
    pub market: MarketKey,
    pub event: BookEvent,
}

/// Requests accepted by a book actor.
#[derive(Debug)]
pub enum BookCommand {
    Execute {
        operation: Operation,
        respond_to: oneshot::Sender<Result<OperationOutput>>,
    },
    Snapshot {
        depth: usize,
        respond_to: oneshot::Sender<BookSnapshot>,
    },
    GetOrder {
        order_id: OrderId,
        respond_to: oneshot::Sender<Option<Order>>,
    },
    AccountOrders {
        account: AccountId,
        respond_to: oneshot::Sender<Vec<Order>>,
    },
    Estimate {
        side: Side,
        amount: Amount,
        unit_price: Option<UnitPrice>,
        respond_to: oneshot::Sender<Result<FillEstimate>>,
    },
    Digest {
        respond_to: oneshot::Sender<[u8; 32]>,
    },
}

/// Cloneable address of a running book actor.
#[derive(Debug, Clone)]
pub struct BookHandle {
    key: MarketKey,
    sender: mpsc::Sender<BookCommand>,
}

impl BookHandle {
    /// Move `book` into a new task. The task ends, returning the book, once
    /// every handle has been dropped.
    pub fn spawn(
        book: OrderBook,
        capacity: usize,
        events: broadcast::Sender<MarketEvent>,
    ) -> (Self, JoinHandle<OrderBook>) {
        let key = book.market();
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let task = tokio::spawn(run_book(book, receiver, events));
        (Self { key, sender }, task)
    }

    #[must_use]
    pub fn market(&self) -> &MarketKey {
        &self.key
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> BookCommand,
    ) -> Result<T> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(build(respond_to))
            .await
            .map_err(|_| LendbookError::EngineUnavailable(self.key.clone()))?;
        response
            .await
            .map_err(|_| LendbookError::EngineUnavailable(self.key.clone()))
    }

    // =================================================================
    // Mutations
    // =================================================================

    pub async fn execute(&self, operation: Operation) -> Result<OperationOutput> {
        self.request(|respond_to| BookCommand::Execute {
            operation,
            respond_to,
        })
        .await?
    }

    pub async fn create_pre_order(
        &self,
        side: Side,
        account: AccountId,
        amount: Amount,
        unit_price: UnitPrice,
        now: u64,
    ) -> Result<Order> {
        match self
            .execute(Operation::CreatePreOrder {
                side,
                account,
                amount,
                unit_price,
                now,
            })
            .await?
        {
            OperationOutput::PreOrder(order) => Ok(order),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn create_order(
        &self,
        side: Side,
        account: AccountId,
        amount: Amount,
        unit_price: Option<UnitPrice>,
        now: u64,
    ) -> Result<OrderExecution> {
        match self
            .execute(Operation::CreateOrder {
                side,
                account,
                amount,
                unit_price,
                now,
            })
            .await?
        {
            OperationOutput::Execution(execution) => Ok(execution),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn cancel_order(
        &self,
        order_id: OrderId,
        account: Option<AccountId>,
        now: u64,
    ) -> Result<Order> {
        match self
            .execute(Operation::CancelOrder {
                order_id,
                account,
                now,
            })
            .await?
        {
            OperationOutput::Cancelled(order) => Ok(order),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn execute_itayose_call(&self, now: u64) -> Result<ItayoseOutcome> {
        match self.execute(Operation::ExecuteItayoseCall { now }).await? {
            OperationOutput::Itayose(outcome) => Ok(outcome),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn pause(&self, now: u64) -> Result<BookState> {
        state_of(self.execute(Operation::Pause { now }).await?)
    }

    pub async fn unpause(&self, now: u64) -> Result<BookState> {
        state_of(self.execute(Operation::Unpause { now }).await?)
    }

    pub async fn advance(&self, now: u64) -> Result<BookState> {
        state_of(self.execute(Operation::Advance { now }).await?)
    }

    // =================================================================
    // Queries
    // =================================================================

    pub async fn snapshot(&self, depth: usize) -> Result<BookSnapshot> {
        self.request(|respond_to| BookCommand::Snapshot { depth, respond_to })
            .await
    }

    pub async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        self.request(|respond_to| BookCommand::GetOrder {
            order_id,
            respond_to,
        })
        .await
    }

    pub async fn account_orders(&self, account: AccountId) -> Result<Vec<Order>> {
        self.request(|respond_to| BookCommand::AccountOrders {
            account,
            respond_to,
        })
        .await
    }

    pub async fn estimate_fill(
        &self,
        side: Side,
        amount: Amount,
        unit_price: Option<UnitPrice>,
    ) -> Result<FillEstimate> {
        self.request(|respond_to| BookCommand::Estimate {
            side,
            amount,
            unit_price,
            respond_to,
        })
        .await?
    }

    pub async fn state_digest(&self) -> Result<[u8; 32]> {
        self.request(|respond_to| BookCommand::Digest { respond_to })
            .await
    }
}

fn unexpected(output: &OperationOutput) -> LendbookError {
    LendbookError::Internal(format!("unexpected operation output: {output:?}"))
}

fn state_of(output: OperationOutput) -> Result<BookState> {
    match output {
        OperationOutput::State { state } => Ok(state),
        other => Err(unexpected(&other)),
    }
}

async fn run_book(
    mut book: OrderBook,
    mut receiver: mpsc::Receiver<BookCommand>,
    events: broadcast::Sender<MarketEvent>,
) -> OrderBook {
    let market = book.market();
    tracing::info!(market = %market, "Book actor started");

    while let Some(command) = receiver.recv().await {
        match command {
            BookCommand::Execute {
                operation,
                respond_to,
            } => {
                let result = book.apply(&operation);
                if let Err(err) = &result {
                    tracing::debug!(market = %market, error = %err, "Operation rejected");
                }
                for event in book.take_events() {
                    // No subscribers is not an error.
                    let _ = events.send(MarketEvent {
                        market: market.clone(),
                        event,
                    });
                }
                let _ = respond_to.send(result);
            }
            BookCommand::Snapshot { depth, respond_to } => {
                let _ = respond_to.send(book.snapshot(depth));
            }
            BookCommand::GetOrder {
                order_id,
                respond_to,
            } => {
                let _ = respond_to.send(book.get_order(order_id));
            }
            BookCommand::AccountOrders {
                account,
                respond_to,
            } => {
                let orders = book
                    .account_order_ids(&account)
                    .into_iter()
                    .filter_map(|id| book.get_order(id))
                    .collect();
                let _ = respond_to.send(orders);
            }
            BookCommand::Estimate {
                side,
                amount,
                unit_price,
                respond_to,
            } => {
                let _ = respond_to.send(book.estimate_fill(side, amount, unit_price));
            }
            BookCommand::Digest { respond_to } => {
                let _ = respond_to.send(book.state_digest());
            }
        }
    }

    tracing::info!(market = %market, "Book actor stopped");
    book
}
