//! State digest for replay verification.
//!
//! Two books that went through the same operation sequence must hold the
//! same levels, queues and counters. The digest is a SHA-256 over that state
//! in a fixed order, so equality can be checked without comparing trees.

use sha2::{Digest, Sha256};

use crate::order_book::OrderBook;
use crate::price_level_tree::PriceLevelTree;

/// Hash the observable state of a book.
///
/// Covers the market, lifecycle state, reference price, order id counter
/// and, per side, every level with its FIFO queue.
#[must_use]
pub fn compute_state_digest(book: &OrderBook) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"lendbook:state:v1:");

    let market = book.market();
    hasher.update(market.currency.as_str().as_bytes());
    hasher.update(market.maturity.0.to_le_bytes());
    hasher.update(book.state().to_string().as_bytes());
    hasher.update(book.reference_unit_price().unwrap_or(0).to_le_bytes());
    hasher.update(book.last_order_id().0.to_le_bytes());

    hash_tree(&mut hasher, b"lend", book.lend_tree());
    hash_tree(&mut hasher, b"borrow", book.borrow_tree());

    let result = hasher.finalize();
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&result);
    digest
}

/// Hex form of [`compute_state_digest`].
#[must_use]
pub fn state_digest_hex(book: &OrderBook) -> String {
    hex::encode(compute_state_digest(book))
}

#[must_use]
pub fn verify_state_digest(book: &OrderBook, expected: &[u8; 32]) -> bool {
    compute_state_digest(book) == *expected
}

fn hash_tree(hasher: &mut Sha256, tag: &[u8], tree: &PriceLevelTree) {
    hasher.update(tag);
    hasher.update((tree.level_count() as u64).to_le_bytes());
    for level in tree.levels() {
        hasher.update(level.unit_price.to_le_bytes());
        hasher.update(level.amount.to_le_bytes());
        hasher.update((level.order_count as u64).to_le_bytes());
        for order in tree.orders_at(level.unit_price) {
            hasher.update(order.order_id.0.to_le_bytes());
            hasher.update(order.maker.as_bytes());
            hasher.update(order.amount.to_le_bytes());
            hasher.update(order.timestamp.to_le_bytes());
        }
    }
}

impl OrderBook {
    #[must_use]
    pub fn state_digest(&self) -> [u8; 32] {
        compute_state_digest(self)
    }
}
