//! Events emitted by an order book.
//!
//! Every mutation of a book is observable through these events. Consumers
//! (settlement, collateral, market data) rebuild their view from them.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{AccountId, Amount, BookState, OrderId, Side, UnitPrice};

/// Amount executed at one price level during a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelFill {
    pub unit_price: UnitPrice,
    pub amount: Amount,
    pub future_value: Amount,
    /// Maker orders touched at this level (fully or partially).
    pub order_count: usize,
}

/// A taker order executed against resting liquidity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillEvent {
    pub taker: AccountId,
    pub side: Side,
    pub amount: Amount,
    pub future_value: Amount,
    /// Present value per `PRICE_DIGIT` of future value across all levels.
    pub average_unit_price: Option<Decimal>,
    /// Every price level touched, best first.
    pub levels: Vec<LevelFill>,
}

/// An order's resting amount was established or re-established.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MakeEvent {
    pub order_id: OrderId,
    pub maker: AccountId,
    pub side: Side,
    pub amount: Amount,
    pub unit_price: UnitPrice,
}

/// A resting order was (partially) consumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MakerFilledEvent {
    pub order_id: OrderId,
    pub maker: AccountId,
    pub side: Side,
    pub filled_amount: Amount,
    /// Execution price; the opening price for Itayose fills.
    pub unit_price: UnitPrice,
    pub remaining_amount: Amount,
}

/// A resting order was cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelEvent {
    pub order_id: OrderId,
    pub maker: AccountId,
    pub side: Side,
    pub amount: Amount,
    pub unit_price: UnitPrice,
}

/// The opening auction cleared crossing pre-orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItayoseExecutedEvent {
    pub opening_unit_price: UnitPrice,
    /// Amount executed across both books (lend side plus borrow side).
    pub matched_amount: Amount,
    /// Amount executed on each side.
    pub offset_amount: Amount,
    pub last_lend_unit_price: UnitPrice,
    pub last_borrow_unit_price: UnitPrice,
}

/// Everything an order book can emit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BookEvent {
    Fill(FillEvent),
    Make(MakeEvent),
    MakerFilled(MakerFilledEvent),
    Cancel(CancelEvent),
    ItayoseExecuted(ItayoseExecutedEvent),
    StateChanged { from: BookState, to: BookState },
}

impl BookEvent {
    /// Short name for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Fill(_) => "fill",
            Self::Make(_) => "make",
            Self::MakerFilled(_) => "maker_filled",
            Self::Cancel(_) => "cancel",
            Self::ItayoseExecuted(_) => "itayose_executed",
            Self::StateChanged { .. } => "state_changed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_is_tagged() {
        let event = BookEvent::Make(MakeEvent {
            order_id: OrderId(1),
            maker: AccountId::from_bytes([1; 16]),
            side: Side::Lend,
            amount: 100_000_000,
            unit_price: 9_800,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "make");
        assert_eq!(json["side"], "LEND");
        assert_eq!(json["unit_price"], 9_800);
    }

    #[test]
    fn fill_event_roundtrip_keeps_decimal() {
        let event = BookEvent::Fill(FillEvent {
            taker: AccountId::from_bytes([2; 16]),
            side: Side::Borrow,
            amount: 80,
            future_value: 9_090,
            average_unit_price: Some(Decimal::new(88, 0)),
            levels: vec![LevelFill {
                unit_price: 88,
                amount: 80,
                future_value: 9_090,
                order_count: 2,
            }],
        });
        let json = serde_json::to_string(&event).unwrap();
        let back: BookEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
        assert_eq!(back.kind(), "fill");
    }

    #[test]
    fn state_changed_shape() {
        let event = BookEvent::StateChanged {
            from: BookState::Itayose,
            to: BookState::Open,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "state_changed");
        assert_eq!(json["from"], "ITAYOSE");
        assert_eq!(json["to"], "OPEN");
    }
}
