//! Red-black tree of price levels, one per side of a book.
//!
//! Nodes live in a map keyed by unit price; `parent`/`left`/`right` hold
//! keys, with [`EMPTY`] (0) acting as the black nil sentinel. Unit prices
//! start at 1, so the sentinel never collides with a real level.
//!
//! Each node owns a FIFO queue of orders, threaded through `prev`/`next`
//! links stored on the orders themselves, so removing any order is O(1)
//! once its level is known. Node aggregates (`total_amount`,
//! `order_count`) always equal the sum over the live queue, and a node with
//! an empty queue is removed from the tree immediately.

use std::collections::HashMap;

use lendbook_types::{
    AccountId, Amount, LendbookError, LevelFill, OrderId, Result, UnitPrice,
    calculate_future_value, constants,
};
use serde::{Deserialize, Serialize};

/// Key of the nil sentinel.
pub const EMPTY: UnitPrice = 0;

#[derive(Debug, Clone, Default)]
struct Node {
    parent: UnitPrice,
    left: UnitPrice,
    right: UnitPrice,
    red: bool,
    head: Option<OrderId>,
    tail: Option<OrderId>,
    order_count: usize,
    total_amount: Amount,
}

/// An order waiting in a price level's queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedOrder {
    pub order_id: OrderId,
    pub maker: AccountId,
    pub unit_price: UnitPrice,
    pub amount: Amount,
    pub timestamp: u64,
    prev: Option<OrderId>,
    next: Option<OrderId>,
}

/// Aggregate view of one price level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelSummary {
    pub unit_price: UnitPrice,
    pub amount: Amount,
    pub order_count: usize,
}

/// A resting order consumed by a drop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilledOrder {
    pub order_id: OrderId,
    pub maker: AccountId,
    pub unit_price: UnitPrice,
    pub filled_amount: Amount,
    /// Zero when the order left the book.
    pub remaining_amount: Amount,
}

/// Outcome of [`PriceLevelTree::drop_from_first`] / [`PriceLevelTree::drop_from_last`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DropResult {
    pub dropped_amount: Amount,
    /// Last level touched, [`EMPTY`] when nothing was dropped.
    pub price_reached: UnitPrice,
    /// Levels touched in walk order.
    pub levels: Vec<LevelFill>,
    /// Orders removed from the book, in fill order.
    pub filled_orders: Vec<FilledOrder>,
    /// The order split by the drop, if any. It stays at the front of its queue.
    pub partially_filled: Option<FilledOrder>,
}

impl DropResult {
    /// Future value of everything dropped.
    #[must_use]
    pub fn future_value(&self) -> Amount {
        self.levels
            .iter()
            .fold(0, |total: Amount, l| total.saturating_add(l.future_value))
    }
}

/// Read-only preview of a drop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DropEstimate {
    pub amount: Amount,
    pub price_reached: UnitPrice,
    pub levels: Vec<LevelFill>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    FromFirst,
    FromLast,
}

impl Direction {
    /// `true` if `key` is strictly worse than a non-zero `limit`.
    fn is_beyond(self, key: UnitPrice, limit: UnitPrice) -> bool {
        limit != EMPTY
            && match self {
                Self::FromFirst => key > limit,
                Self::FromLast => key < limit,
            }
    }
}

/// Price index for one side of a book.
#[derive(Debug, Clone)]
pub struct PriceLevelTree {
    root: UnitPrice,
    nodes: HashMap<UnitPrice, Node>,
    orders: HashMap<OrderId, QueuedOrder>,
    total_amount: Amount,
}

impl Default for PriceLevelTree {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for PriceLevelTree {
    /// Trees are equal when they hold the same levels with the same queues,
    /// regardless of internal shape.
    fn eq(&self, other: &Self) -> bool {
        self.levels().eq(other.levels())
            && self
                .levels()
                .all(|level| self.orders_at(level.unit_price).eq(other.orders_at(level.unit_price)))
    }
}

impl Eq for PriceLevelTree {}

impl PriceLevelTree {
    #[must_use]
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(EMPTY, Node::default());
        Self {
            root: EMPTY,
            nodes,
            orders: HashMap::new(),
            total_amount: 0,
        }
    }

    // =================================================================
    // Queries
    // =================================================================

    /// Lowest unit price, or [`EMPTY`].
    #[must_use]
    pub fn first(&self) -> UnitPrice {
        if self.root == EMPTY {
            return EMPTY;
        }
        self.minimum(self.root)
    }

    /// Highest unit price, or [`EMPTY`].
    #[must_use]
    pub fn last(&self) -> UnitPrice {
        if self.root == EMPTY {
            return EMPTY;
        }
        self.maximum(self.root)
    }

    /// Smallest level strictly above `key`, or [`EMPTY`]. `key` need not exist.
    #[must_use]
    pub fn next(&self, key: UnitPrice) -> UnitPrice {
        let mut cursor = self.root;
        let mut candidate = EMPTY;
        while cursor != EMPTY {
            if cursor > key {
                candidate = cursor;
                cursor = self.node(cursor).left;
            } else {
                cursor = self.node(cursor).right;
            }
        }
        candidate
    }

    /// Largest level strictly below `key`, or [`EMPTY`]. `key` need not exist.
    #[must_use]
    pub fn prev(&self, key: UnitPrice) -> UnitPrice {
        let mut cursor = self.root;
        let mut candidate = EMPTY;
        while cursor != EMPTY {
            if cursor < key {
                candidate = cursor;
                cursor = self.node(cursor).right;
            } else {
                cursor = self.node(cursor).left;
            }
        }
        candidate
    }

    #[must_use]
    pub fn contains(&self, key: UnitPrice) -> bool {
        key != EMPTY && self.nodes.contains_key(&key)
    }

    /// Aggregate amount at `key`, zero if the level does not exist.
    #[must_use]
    pub fn node_total_amount(&self, key: UnitPrice) -> Amount {
        self.level(key).map_or(0, |l| l.amount)
    }

    #[must_use]
    pub fn node_order_count(&self, key: UnitPrice) -> usize {
        self.level(key).map_or(0, |l| l.order_count)
    }

    #[must_use]
    pub fn level(&self, key: UnitPrice) -> Option<LevelSummary> {
        if key == EMPTY {
            return None;
        }
        self.nodes.get(&key).map(|node| LevelSummary {
            unit_price: key,
            amount: node.total_amount,
            order_count: node.order_count,
        })
    }

    #[must_use]
    pub fn order(&self, order_id: OrderId) -> Option<&QueuedOrder> {
        self.orders.get(&order_id)
    }

    /// Orders at `key` in time priority.
    #[must_use]
    pub fn orders_at(&self, key: UnitPrice) -> QueueIter<'_> {
        let cursor = if key == EMPTY {
            None
        } else {
            self.nodes.get(&key).and_then(|node| node.head)
        };
        QueueIter { tree: self, cursor }
    }

    /// All levels, lowest price first.
    #[must_use]
    pub fn levels(&self) -> Levels<'_> {
        Levels {
            tree: self,
            cursor: self.first(),
        }
    }

    /// Up to `depth` levels starting from the lowest price.
    #[must_use]
    pub fn levels_from_first(&self, depth: usize) -> Vec<LevelSummary> {
        self.levels().take(depth).collect()
    }

    /// Up to `depth` levels starting from the highest price.
    #[must_use]
    pub fn levels_from_last(&self, depth: usize) -> Vec<LevelSummary> {
        let mut out = Vec::new();
        let mut cursor = self.last();
        while cursor != EMPTY && out.len() < depth {
            if let Some(level) = self.level(cursor) {
                out.push(level);
            }
            cursor = self.prev(cursor);
        }
        out
    }

    #[must_use]
    pub fn total_amount(&self) -> Amount {
        self.total_amount
    }

    #[must_use]
    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    #[must_use]
    pub fn level_count(&self) -> usize {
        self.nodes.len() - 1
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root == EMPTY
    }

    // =================================================================
    // Insertion / removal
    // =================================================================

    /// Append an order to the back of the queue at `unit_price`,
    /// creating the level if needed.
    pub fn insert(
        &mut self,
        unit_price: UnitPrice,
        order_id: OrderId,
        maker: AccountId,
        amount: Amount,
        timestamp: u64,
    ) -> Result<()> {
        if amount == 0 {
            return Err(LendbookError::InvalidAmount);
        }
        if unit_price == EMPTY {
            return Err(LendbookError::InvalidUnitPrice {
                unit_price,
                reason: "zero is reserved".into(),
            });
        }
        if self.orders.contains_key(&order_id) {
            return Err(LendbookError::InvariantViolation {
                reason: format!("order {order_id} is already queued"),
            });
        }
        self.check_capacity(amount)?;

        if !self.contains(unit_price) {
            self.insert_node(unit_price);
        }

        let node = self.node_mut(unit_price);
        let prev = node.tail;
        node.tail = Some(order_id);
        if node.head.is_none() {
            node.head = Some(order_id);
        }
        node.order_count += 1;
        node.total_amount += amount;
        if let Some(prev_id) = prev {
            if let Some(prev_order) = self.orders.get_mut(&prev_id) {
                prev_order.next = Some(order_id);
            }
        }
        self.orders.insert(
            order_id,
            QueuedOrder {
                order_id,
                maker,
                unit_price,
                amount,
                timestamp,
                prev,
                next: None,
            },
        );
        self.total_amount += amount;
        Ok(())
    }

    /// Fails if adding `amount` would push the side's resting total past
    /// [`constants::MAX_AMOUNT`]. Level totals never exceed the side total.
    pub fn check_capacity(&self, amount: Amount) -> Result<()> {
        match self.total_amount.checked_add(amount) {
            Some(total) if total <= constants::MAX_AMOUNT => Ok(()),
            _ => Err(LendbookError::AmountTooLarge {
                amount: self.total_amount.saturating_add(amount),
                max: constants::MAX_AMOUNT,
            }),
        }
    }

    /// Remove an order; its level is deleted if the queue empties.
    pub fn remove(&mut self, unit_price: UnitPrice, order_id: OrderId) -> Result<QueuedOrder> {
        match self.orders.get(&order_id) {
            Some(order) if order.unit_price == unit_price => {}
            _ => return Err(LendbookError::OrderNotFound(order_id)),
        }
        let order = self
            .unlink(order_id)
            .ok_or(LendbookError::OrderNotFound(order_id))?;
        if self.node(unit_price).order_count == 0 {
            self.delete_node(unit_price);
        }
        Ok(order)
    }

    // =================================================================
    // Bulk drops
    // =================================================================

    /// Consume up to `target` starting at the lowest price. Levels above a
    /// non-zero `limit` are left untouched.
    pub fn drop_from_first(&mut self, target: Amount, limit: UnitPrice) -> DropResult {
        self.drop_amount(Direction::FromFirst, target, limit)
    }

    /// Consume up to `target` starting at the highest price. Levels below a
    /// non-zero `limit` are left untouched.
    pub fn drop_from_last(&mut self, target: Amount, limit: UnitPrice) -> DropResult {
        self.drop_amount(Direction::FromLast, target, limit)
    }

    /// What [`Self::drop_from_first`] would consume, without mutating.
    #[must_use]
    pub fn estimate_drop_from_first(&self, target: Amount, limit: UnitPrice) -> DropEstimate {
        self.estimate_drop(Direction::FromFirst, target, limit)
    }

    /// What [`Self::drop_from_last`] would consume, without mutating.
    #[must_use]
    pub fn estimate_drop_from_last(&self, target: Amount, limit: UnitPrice) -> DropEstimate {
        self.estimate_drop(Direction::FromLast, target, limit)
    }

    fn drop_amount(&mut self, direction: Direction, target: Amount, limit: UnitPrice) -> DropResult {
        let mut result = DropResult::default();
        let mut remaining = target;
        let mut cursor = self.start(direction);

        while remaining > 0 && cursor != EMPTY && !direction.is_beyond(cursor, limit) {
            let level_total = self.node(cursor).total_amount;
            let mut level = LevelFill {
                unit_price: cursor,
                amount: 0,
                future_value: 0,
                order_count: 0,
            };

            if level_total <= remaining {
                while let Some(head) = self.node(cursor).head {
                    let Some(order) = self.unlink(head) else {
                        break;
                    };
                    level.order_count += 1;
                    level.amount += order.amount;
                    result.filled_orders.push(FilledOrder {
                        order_id: order.order_id,
                        maker: order.maker,
                        unit_price: cursor,
                        filled_amount: order.amount,
                        remaining_amount: 0,
                    });
                }
                self.delete_node(cursor);
                remaining -= level.amount;
            } else {
                while remaining > 0 {
                    let Some(head) = self.node(cursor).head else {
                        break;
                    };
                    let Some(head_amount) = self.orders.get(&head).map(|o| o.amount) else {
                        break;
                    };
                    level.order_count += 1;

                    if head_amount <= remaining {
                        let Some(order) = self.unlink(head) else {
                            break;
                        };
                        remaining -= order.amount;
                        level.amount += order.amount;
                        result.filled_orders.push(FilledOrder {
                            order_id: order.order_id,
                            maker: order.maker,
                            unit_price: cursor,
                            filled_amount: order.amount,
                            remaining_amount: 0,
                        });
                    } else {
                        let filled = remaining;
                        let Some(order) = self.orders.get_mut(&head) else {
                            break;
                        };
                        order.amount -= filled;
                        let maker = order.maker;
                        let node = self.node_mut(cursor);
                        node.total_amount -= filled;
                        self.total_amount -= filled;
                        level.amount += filled;
                        remaining = 0;
                        result.partially_filled = Some(FilledOrder {
                            order_id: head,
                            maker,
                            unit_price: cursor,
                            filled_amount: filled,
                            remaining_amount: head_amount - filled,
                        });
                    }
                }
            }

            level.future_value = level_future_value(level.amount, cursor);
            tracing::trace!(
                unit_price = cursor,
                amount = %level.amount,
                orders = level.order_count,
                "Price level dropped"
            );
            result.price_reached = cursor;
            result.levels.push(level);
            cursor = self.step(direction, cursor);
        }

        result.dropped_amount = target - remaining;
        result
    }

    fn estimate_drop(&self, direction: Direction, target: Amount, limit: UnitPrice) -> DropEstimate {
        let mut estimate = DropEstimate::default();
        let mut remaining = target;
        let mut cursor = self.start(direction);

        while remaining > 0 && cursor != EMPTY && !direction.is_beyond(cursor, limit) {
            let node = self.node(cursor);
            let (amount, order_count) = if node.total_amount <= remaining {
                (node.total_amount, node.order_count)
            } else {
                let mut taken: Amount = 0;
                let mut touched = 0;
                for order in self.orders_at(cursor) {
                    if taken >= remaining {
                        break;
                    }
                    taken += order.amount;
                    touched += 1;
                }
                (remaining, touched)
            };
            remaining -= amount;
            estimate.levels.push(LevelFill {
                unit_price: cursor,
                amount,
                future_value: level_future_value(amount, cursor),
                order_count,
            });
            estimate.price_reached = cursor;
            cursor = self.step(direction, cursor);
        }

        estimate.amount = target - remaining;
        estimate
    }

    fn start(&self, direction: Direction) -> UnitPrice {
        match direction {
            Direction::FromFirst => self.first(),
            Direction::FromLast => self.last(),
        }
    }

    fn step(&self, direction: Direction, key: UnitPrice) -> UnitPrice {
        match direction {
            Direction::FromFirst => self.next(key),
            Direction::FromLast => self.prev(key),
        }
    }

    // =================================================================
    // Invariants
    // =================================================================

    /// Check ordering, red-black balance, parent links and queue aggregates.
    pub fn verify_invariants(&self) -> Result<()> {
        let violation = |reason: String| Err(LendbookError::InvariantViolation { reason });

        if self.node(EMPTY).red {
            return violation("sentinel is red".into());
        }
        if self.root != EMPTY {
            if self.node(self.root).red {
                return violation(format!("root {} is red", self.root));
            }
            if self.node(self.root).parent != EMPTY {
                return violation(format!("root {} has a parent", self.root));
            }
        }

        // Iterative in-order walk.
        let mut stack = Vec::new();
        let mut cursor = self.root;
        let mut previous = EMPTY;
        let mut visited = 0usize;
        let mut order_total = 0usize;
        let mut amount_total: Amount = 0;
        let mut black_height: Option<usize> = None;

        while cursor != EMPTY || !stack.is_empty() {
            while cursor != EMPTY {
                stack.push(cursor);
                cursor = self.node(cursor).left;
            }
            let Some(key) = stack.pop() else { break };
            let node = self.node(key);

            if previous != EMPTY && key <= previous {
                return violation(format!("keys out of order: {previous} then {key}"));
            }
            previous = key;
            visited += 1;

            for child in [node.left, node.right] {
                if child == EMPTY {
                    continue;
                }
                if self.node(child).parent != key {
                    return violation(format!("child {child} does not point back to {key}"));
                }
                if node.red && self.node(child).red {
                    return violation(format!("red node {key} has red child {child}"));
                }
            }

            if node.left == EMPTY || node.right == EMPTY {
                let height = self.blacks_to_root(key);
                match black_height {
                    None => black_height = Some(height),
                    Some(expected) if expected != height => {
                        return violation(format!(
                            "black height {height} at {key}, expected {expected}"
                        ));
                    }
                    Some(_) => {}
                }
            }

            let (count, sum) = self.verify_queue(key)?;
            if count == 0 {
                return violation(format!("level {key} has an empty queue"));
            }
            if count != node.order_count || sum != node.total_amount {
                return violation(format!(
                    "level {key} aggregates ({}, {}) disagree with queue ({count}, {sum})",
                    node.order_count, node.total_amount
                ));
            }
            order_total += count;
            amount_total += sum;

            cursor = node.right;
        }

        if visited != self.level_count() {
            return violation(format!(
                "{visited} reachable levels, {} stored",
                self.level_count()
            ));
        }
        if order_total != self.orders.len() {
            return violation(format!(
                "{order_total} queued orders, {} indexed",
                self.orders.len()
            ));
        }
        if amount_total != self.total_amount {
            return violation(format!(
                "level amounts sum to {amount_total}, tree total is {}",
                self.total_amount
            ));
        }
        Ok(())
    }

    fn verify_queue(&self, key: UnitPrice) -> Result<(usize, Amount)> {
        let node = self.node(key);
        let mut count = 0usize;
        let mut sum: Amount = 0;
        let mut expected_prev = None;
        let mut cursor = node.head;
        while let Some(id) = cursor {
            let Some(order) = self.orders.get(&id) else {
                return Err(LendbookError::InvariantViolation {
                    reason: format!("level {key} links missing order {id}"),
                });
            };
            if order.unit_price != key || order.prev != expected_prev || order.amount == 0 {
                return Err(LendbookError::InvariantViolation {
                    reason: format!("order {id} is mislinked at level {key}"),
                });
            }
            count += 1;
            sum += order.amount;
            expected_prev = Some(id);
            cursor = order.next;
        }
        if node.tail != expected_prev {
            return Err(LendbookError::InvariantViolation {
                reason: format!("level {key} tail does not match its queue"),
            });
        }
        Ok((count, sum))
    }

    fn blacks_to_root(&self, key: UnitPrice) -> usize {
        let mut blacks = 0;
        let mut cursor = key;
        while cursor != EMPTY {
            if !self.node(cursor).red {
                blacks += 1;
            }
            cursor = self.node(cursor).parent;
        }
        blacks
    }

    // =================================================================
    // Queue plumbing
    // =================================================================

    /// Detach an order from its queue and update aggregates. Leaves the
    /// (possibly empty) node in the tree.
    fn unlink(&mut self, order_id: OrderId) -> Option<QueuedOrder> {
        let order = self.orders.remove(&order_id)?;

        match order.prev {
            Some(prev) => {
                if let Some(p) = self.orders.get_mut(&prev) {
                    p.next = order.next;
                }
            }
            None => self.node_mut(order.unit_price).head = order.next,
        }
        match order.next {
            Some(next) => {
                if let Some(n) = self.orders.get_mut(&next) {
                    n.prev = order.prev;
                }
            }
            None => self.node_mut(order.unit_price).tail = order.prev,
        }

        let node = self.node_mut(order.unit_price);
        node.order_count -= 1;
        node.total_amount -= order.amount;
        self.total_amount -= order.amount;
        Some(order)
    }

    // =================================================================
    // Red-black plumbing
    // =================================================================

    fn node(&self, key: UnitPrice) -> &Node {
        self.nodes
            .get(&key)
            .unwrap_or_else(|| panic!("linked price level {key} is missing from the tree"))
    }

    fn node_mut(&mut self, key: UnitPrice) -> &mut Node {
        self.nodes
            .get_mut(&key)
            .unwrap_or_else(|| panic!("linked price level {key} is missing from the tree"))
    }

    fn is_red(&self, key: UnitPrice) -> bool {
        self.node(key).red
    }

    fn set_red(&mut self, key: UnitPrice, red: bool) {
        self.node_mut(key).red = red;
    }

    fn parent(&self, key: UnitPrice) -> UnitPrice {
        self.node(key).parent
    }

    fn left(&self, key: UnitPrice) -> UnitPrice {
        self.node(key).left
    }

    fn right(&self, key: UnitPrice) -> UnitPrice {
        self.node(key).right
    }

    fn minimum(&self, mut key: UnitPrice) -> UnitPrice {
        while self.left(key) != EMPTY {
            key = self.left(key);
        }
        key
    }

    fn maximum(&self, mut key: UnitPrice) -> UnitPrice {
        while self.right(key) != EMPTY {
            key = self.right(key);
        }
        key
    }

    fn insert_node(&mut self, key: UnitPrice) {
        let mut parent = EMPTY;
        let mut cursor = self.root;
        while cursor != EMPTY {
            parent = cursor;
            cursor = if key < cursor {
                self.left(cursor)
            } else {
                self.right(cursor)
            };
        }

        self.nodes.insert(
            key,
            Node {
                parent,
                red: true,
                ..Node::default()
            },
        );
        if parent == EMPTY {
            self.root = key;
        } else if key < parent {
            self.node_mut(parent).left = key;
        } else {
            self.node_mut(parent).right = key;
        }
        tracing::trace!(unit_price = key, "Price level created");
        self.insert_fixup(key);
    }

    fn insert_fixup(&mut self, mut key: UnitPrice) {
        while self.is_red(self.parent(key)) {
            let parent = self.parent(key);
            let grandparent = self.parent(parent);
            if parent == self.left(grandparent) {
                let uncle = self.right(grandparent);
                if self.is_red(uncle) {
                    self.set_red(parent, false);
                    self.set_red(uncle, false);
                    self.set_red(grandparent, true);
                    key = grandparent;
                } else {
                    if key == self.right(parent) {
                        key = parent;
                        self.rotate_left(key);
                    }
                    let parent = self.parent(key);
                    let grandparent = self.parent(parent);
                    self.set_red(parent, false);
                    self.set_red(grandparent, true);
                    self.rotate_right(grandparent);
                }
            } else {
                let uncle = self.left(grandparent);
                if self.is_red(uncle) {
                    self.set_red(parent, false);
                    self.set_red(uncle, false);
                    self.set_red(grandparent, true);
                    key = grandparent;
                } else {
                    if key == self.left(parent) {
                        key = parent;
                        self.rotate_right(key);
                    }
                    let parent = self.parent(key);
                    let grandparent = self.parent(parent);
                    self.set_red(parent, false);
                    self.set_red(grandparent, true);
                    self.rotate_left(grandparent);
                }
            }
        }
        let root = self.root;
        self.set_red(root, false);
    }

    fn delete_node(&mut self, key: UnitPrice) {
        let mut removed_red = self.is_red(key);
        let child;

        if self.left(key) == EMPTY {
            child = self.right(key);
            self.transplant(key, child);
        } else if self.right(key) == EMPTY {
            child = self.left(key);
            self.transplant(key, child);
        } else {
            let successor = self.minimum(self.right(key));
            removed_red = self.is_red(successor);
            child = self.right(successor);
            if self.parent(successor) == key {
                self.node_mut(child).parent = successor;
            } else {
                self.transplant(successor, child);
                let right = self.right(key);
                self.node_mut(successor).right = right;
                self.node_mut(right).parent = successor;
            }
            self.transplant(key, successor);
            let left = self.left(key);
            self.node_mut(successor).left = left;
            self.node_mut(left).parent = successor;
            let red = self.is_red(key);
            self.set_red(successor, red);
        }

        self.nodes.remove(&key);
        tracing::trace!(unit_price = key, "Price level removed");
        if !removed_red {
            self.delete_fixup(child);
        }
        self.node_mut(EMPTY).parent = EMPTY;
    }

    fn delete_fixup(&mut self, mut key: UnitPrice) {
        while key != self.root && !self.is_red(key) {
            let parent = self.parent(key);
            if key == self.left(parent) {
                let mut sibling = self.right(parent);
                if self.is_red(sibling) {
                    self.set_red(sibling, false);
                    self.set_red(parent, true);
                    self.rotate_left(parent);
                    sibling = self.right(self.parent(key));
                }
                if !self.is_red(self.left(sibling)) && !self.is_red(self.right(sibling)) {
                    self.set_red(sibling, true);
                    key = self.parent(key);
                } else {
                    if !self.is_red(self.right(sibling)) {
                        let nephew = self.left(sibling);
                        self.set_red(nephew, false);
                        self.set_red(sibling, true);
                        self.rotate_right(sibling);
                        sibling = self.right(self.parent(key));
                    }
                    let parent = self.parent(key);
                    let parent_red = self.is_red(parent);
                    self.set_red(sibling, parent_red);
                    self.set_red(parent, false);
                    let nephew = self.right(sibling);
                    self.set_red(nephew, false);
                    self.rotate_left(parent);
                    key = self.root;
                }
            } else {
                let mut sibling = self.left(parent);
                if self.is_red(sibling) {
                    self.set_red(sibling, false);
                    self.set_red(parent, true);
                    self.rotate_right(parent);
                    sibling = self.left(self.parent(key));
                }
                if !self.is_red(self.right(sibling)) && !self.is_red(self.left(sibling)) {
                    self.set_red(sibling, true);
                    key = self.parent(key);
                } else {
                    if !self.is_red(self.left(sibling)) {
                        let nephew = self.right(sibling);
                        self.set_red(nephew, false);
                        self.set_red(sibling, true);
                        self.rotate_left(sibling);
                        sibling = self.left(self.parent(key));
                    }
                    let parent = self.parent(key);
                    let parent_red = self.is_red(parent);
                    self.set_red(sibling, parent_red);
                    self.set_red(parent, false);
                    let nephew = self.left(sibling);
                    self.set_red(nephew, false);
                    self.rotate_right(parent);
                    key = self.root;
                }
            }
        }
        self.set_red(key, false);
    }

    /// Replace the subtree rooted at `old` with the one rooted at `new`.
    /// Sets `new.parent` even when `new` is the sentinel.
    fn transplant(&mut self, old: UnitPrice, new: UnitPrice) {
        let parent = self.parent(old);
        if parent == EMPTY {
            self.root = new;
        } else if old == self.left(parent) {
            self.node_mut(parent).left = new;
        } else {
            self.node_mut(parent).right = new;
        }
        self.node_mut(new).parent = parent;
    }

    fn rotate_left(&mut self, key: UnitPrice) {
        let pivot = self.right(key);
        let inner = self.left(pivot);
        self.node_mut(key).right = inner;
        if inner != EMPTY {
            self.node_mut(inner).parent = key;
        }
        let parent = self.parent(key);
        self.node_mut(pivot).parent = parent;
        if parent == EMPTY {
            self.root = pivot;
        } else if key == self.left(parent) {
            self.node_mut(parent).left = pivot;
        } else {
            self.node_mut(parent).right = pivot;
        }
        self.node_mut(pivot).left = key;
        self.node_mut(key).parent = pivot;
    }

    fn rotate_right(&mut self, key: UnitPrice) {
        let pivot = self.left(key);
        let inner = self.right(pivot);
        self.node_mut(key).left = inner;
        if inner != EMPTY {
            self.node_mut(inner).parent = key;
        }
        let parent = self.parent(key);
        self.node_mut(pivot).parent = parent;
        if parent == EMPTY {
            self.root = pivot;
        } else if key == self.right(parent) {
            self.node_mut(parent).right = pivot;
        } else {
            self.node_mut(parent).left = pivot;
        }
        self.node_mut(pivot).right = key;
        self.node_mut(key).parent = pivot;
    }
}

// =================================================================
// Iterators
// =================================================================

/// Ascending walk over levels.
pub struct Levels<'a> {
    tree: &'a PriceLevelTree,
    cursor: UnitPrice,
}

impl Iterator for Levels<'_> {
    type Item = LevelSummary;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == EMPTY {
            return None;
        }
        let level = self.tree.level(self.cursor);
        self.cursor = self.tree.next(self.cursor);
        level
    }
}

/// FIFO walk over one level's queue.
pub struct QueueIter<'a> {
    tree: &'a PriceLevelTree,
    cursor: Option<OrderId>,
}

impl<'a> Iterator for QueueIter<'a> {
    type Item = &'a QueuedOrder;

    fn next(&mut self) -> Option<Self::Item> {
        let order = self.tree.orders.get(&self.cursor?)?;
        self.cursor = order.next;
        Some(order)
    }
}

/// Level amounts are bounded by [`constants::MAX_AMOUNT`] through
/// [`PriceLevelTree::check_capacity`], so this never saturates.
fn level_future_value(amount: Amount, unit_price: UnitPrice) -> Amount {
    calculate_future_value(amount, unit_price).unwrap_or(Amount::MAX)
}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng, rngs::StdRng};

    use super::*;

    fn maker() -> AccountId {
        AccountId::from_bytes([9; 16])
    }

    fn tree_with(orders: &[(UnitPrice, u64, Amount)]) -> PriceLevelTree {
        let mut tree = PriceLevelTree::new();
        for &(price, id, amount) in orders {
            tree.insert(price, OrderId(id), maker(), amount, id).unwrap();
        }
        tree
    }

    fn keys(tree: &PriceLevelTree) -> Vec<UnitPrice> {
        tree.levels().map(|l| l.unit_price).collect()
    }

    #[test]
    fn empty_tree() {
        let tree = PriceLevelTree::new();
        assert!(tree.is_empty());
        assert_eq!(tree.first(), EMPTY);
        assert_eq!(tree.last(), EMPTY);
        assert_eq!(tree.next(100), EMPTY);
        assert_eq!(tree.prev(100), EMPTY);
        assert_eq!(tree.level_count(), 0);
        assert!(tree.verify_invariants().is_ok());
    }

    #[test]
    fn first_last_next_prev() {
        let tree = tree_with(&[(9_800, 1, 10), (9_500, 2, 10), (9_900, 3, 10), (9_700, 4, 10)]);
        assert_eq!(tree.first(), 9_500);
        assert_eq!(tree.last(), 9_900);
        assert_eq!(tree.next(9_500), 9_700);
        assert_eq!(tree.next(9_750), 9_800);
        assert_eq!(tree.next(9_900), EMPTY);
        assert_eq!(tree.prev(9_800), 9_700);
        assert_eq!(tree.prev(9_500), EMPTY);
        assert_eq!(keys(&tree), vec![9_500, 9_700, 9_800, 9_900]);
    }

    #[test]
    fn same_price_orders_share_a_level_in_fifo_order() {
        let tree = tree_with(&[(880, 1, 5), (880, 2, 7), (880, 3, 1)]);
        assert_eq!(tree.level_count(), 1);
        assert_eq!(tree.node_total_amount(880), 13);
        assert_eq!(tree.node_order_count(880), 3);
        let ids: Vec<OrderId> = tree.orders_at(880).map(|o| o.order_id).collect();
        assert_eq!(ids, vec![OrderId(1), OrderId(2), OrderId(3)]);
    }

    #[test]
    fn duplicate_order_id_rejected() {
        let mut tree = tree_with(&[(880, 1, 5)]);
        let err = tree.insert(900, OrderId(1), maker(), 5, 0).unwrap_err();
        assert!(matches!(err, LendbookError::InvariantViolation { .. }));
        assert_eq!(tree.level_count(), 1);
    }

    #[test]
    fn zero_amount_and_zero_price_rejected() {
        let mut tree = PriceLevelTree::new();
        assert!(matches!(
            tree.insert(880, OrderId(1), maker(), 0, 0),
            Err(LendbookError::InvalidAmount)
        ));
        assert!(matches!(
            tree.insert(EMPTY, OrderId(1), maker(), 1, 0),
            Err(LendbookError::InvalidUnitPrice { .. })
        ));
        assert!(tree.is_empty());
    }

    #[test]
    fn insert_past_max_amount_leaves_tree_unchanged() {
        let half = constants::MAX_AMOUNT / 2 + 1;
        let mut tree = tree_with(&[(8_000, 1, half)]);
        let before = tree.clone();

        let err = tree.insert(8_000, OrderId(2), maker(), half, 2).unwrap_err();
        assert!(matches!(err, LendbookError::AmountTooLarge { .. }));
        let err = tree.insert(7_000, OrderId(3), maker(), half, 3).unwrap_err();
        assert!(matches!(err, LendbookError::AmountTooLarge { .. }));

        assert_eq!(tree, before);
        assert_eq!(tree.level_count(), 1);
        assert!(tree.order(OrderId(2)).is_none());
        assert!(tree.verify_invariants().is_ok());

        tree.insert(8_000, OrderId(4), maker(), constants::MAX_AMOUNT - half, 4)
            .unwrap();
        assert_eq!(tree.total_amount(), constants::MAX_AMOUNT);
    }

    #[test]
    #[should_panic(expected = "linked price level 42 is missing")]
    fn missing_level_panic_names_the_price() {
        let tree = tree_with(&[(880, 1, 5)]);
        let _ = tree.node(42);
    }

    #[test]
    fn drop_at_max_amount_reports_future_value() {
        let mut tree = tree_with(&[(8_000, 1, constants::MAX_AMOUNT)]);
        let result = tree.drop_from_first(constants::MAX_AMOUNT, EMPTY);
        assert_eq!(result.dropped_amount, constants::MAX_AMOUNT);
        assert_eq!(
            result.future_value(),
            constants::MAX_AMOUNT / 8_000 * 10_000 + constants::MAX_AMOUNT % 8_000 * 10_000 / 8_000
        );
        assert!(tree.is_empty());
    }

    #[test]
    fn remove_middle_of_queue() {
        let mut tree = tree_with(&[(880, 1, 5), (880, 2, 7), (880, 3, 1)]);
        let removed = tree.remove(880, OrderId(2)).unwrap();
        assert_eq!(removed.amount, 7);
        let ids: Vec<OrderId> = tree.orders_at(880).map(|o| o.order_id).collect();
        assert_eq!(ids, vec![OrderId(1), OrderId(3)]);
        assert_eq!(tree.node_total_amount(880), 6);
        assert!(tree.verify_invariants().is_ok());
    }

    #[test]
    fn remove_with_wrong_price_is_not_found() {
        let mut tree = tree_with(&[(880, 1, 5)]);
        assert!(matches!(
            tree.remove(881, OrderId(1)),
            Err(LendbookError::OrderNotFound(OrderId(1)))
        ));
        assert!(matches!(
            tree.remove(880, OrderId(2)),
            Err(LendbookError::OrderNotFound(OrderId(2)))
        ));
    }

    #[test]
    fn cancel_then_reuse_price_starts_clean() {
        let mut tree = tree_with(&[(9_000, 1, 500)]);
        tree.remove(9_000, OrderId(1)).unwrap();
        assert!(!tree.contains(9_000));
        assert!(tree.is_empty());

        tree.insert(9_000, OrderId(2), maker(), 30, 2).unwrap();
        assert_eq!(tree.node_total_amount(9_000), 30);
        assert_eq!(tree.node_order_count(9_000), 1);
        assert!(tree.verify_invariants().is_ok());
    }

    #[test]
    fn drop_from_first_splits_final_order() {
        let mut tree = tree_with(&[(9_800, 1, 100_000_000), (9_801, 2, 300_000_000)]);
        let result = tree.drop_from_first(300_000_000, 0);

        assert_eq!(result.dropped_amount, 300_000_000);
        assert_eq!(result.price_reached, 9_801);
        assert_eq!(result.filled_orders.len(), 1);
        assert_eq!(result.filled_orders[0].order_id, OrderId(1));
        let partial = result.partially_filled.unwrap();
        assert_eq!(partial.order_id, OrderId(2));
        assert_eq!(partial.filled_amount, 200_000_000);
        assert_eq!(partial.remaining_amount, 100_000_000);

        assert_eq!(keys(&tree), vec![9_801]);
        assert_eq!(tree.node_total_amount(9_801), 100_000_000);
        assert_eq!(tree.order(OrderId(2)).unwrap().amount, 100_000_000);
        assert!(tree.verify_invariants().is_ok());
    }

    #[test]
    fn drop_from_last_respects_limit() {
        let mut tree = tree_with(&[(870, 1, 10), (880, 2, 10), (890, 3, 10)]);
        let result = tree.drop_from_last(100, 880);
        assert_eq!(result.dropped_amount, 20);
        assert_eq!(result.price_reached, 880);
        let touched: Vec<UnitPrice> = result.levels.iter().map(|l| l.unit_price).collect();
        assert_eq!(touched, vec![890, 880]);
        assert_eq!(keys(&tree), vec![870]);
    }

    #[test]
    fn drop_from_first_respects_limit() {
        let mut tree = tree_with(&[(870, 1, 10), (880, 2, 10), (890, 3, 10)]);
        let result = tree.drop_from_first(100, 875);
        assert_eq!(result.dropped_amount, 10);
        assert_eq!(keys(&tree), vec![880, 890]);
    }

    #[test]
    fn drop_more_than_available_empties_tree() {
        let mut tree = tree_with(&[(870, 1, 10), (880, 2, 10)]);
        let result = tree.drop_from_first(1_000, 0);
        assert_eq!(result.dropped_amount, 20);
        assert!(tree.is_empty());
        assert_eq!(tree.total_amount(), 0);
        assert_eq!(tree.order_count(), 0);
    }

    #[test]
    fn drop_on_empty_tree_is_noop() {
        let mut tree = PriceLevelTree::new();
        let result = tree.drop_from_last(10, 0);
        assert_eq!(result, DropResult::default());
    }

    #[test]
    fn estimate_matches_drop() {
        let orders = [(870, 1, 10), (880, 2, 15), (880, 3, 5), (890, 4, 40)];
        let mut tree = tree_with(&orders);
        let estimate = tree.estimate_drop_from_first(22, 0);
        let result = tree.drop_from_first(22, 0);
        assert_eq!(estimate.amount, result.dropped_amount);
        assert_eq!(estimate.price_reached, result.price_reached);
        assert_eq!(estimate.levels, result.levels);
    }

    #[test]
    fn level_future_value_is_reported() {
        let mut tree = tree_with(&[(8_000, 1, 8_000)]);
        let result = tree.drop_from_first(8_000, 0);
        assert_eq!(result.levels[0].future_value, 10_000);
        assert_eq!(result.future_value(), 10_000);
    }

    #[test]
    fn chunked_drops_equal_single_drop() {
        let orders = [(9_800, 1, 100), (9_801, 2, 300), (9_801, 3, 50), (9_900, 4, 70)];
        let mut chunked = tree_with(&orders);
        let mut single = tree_with(&orders);

        let a = chunked.drop_from_first(130, 0);
        let b = chunked.drop_from_first(250, 0);
        let c = single.drop_from_first(380, 0);

        assert_eq!(a.dropped_amount + b.dropped_amount, c.dropped_amount);
        assert_eq!(chunked, single);
    }

    #[test]
    fn levels_from_last_is_descending() {
        let tree = tree_with(&[(870, 1, 10), (880, 2, 20), (890, 3, 30)]);
        let prices: Vec<UnitPrice> = tree.levels_from_last(2).iter().map(|l| l.unit_price).collect();
        assert_eq!(prices, vec![890, 880]);
        let prices: Vec<UnitPrice> = tree.levels_from_first(5).iter().map(|l| l.unit_price).collect();
        assert_eq!(prices, vec![870, 880, 890]);
    }

    #[test]
    fn random_inserts_and_removes_keep_invariants() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut tree = PriceLevelTree::new();
        let mut live: Vec<(UnitPrice, OrderId)> = Vec::new();

        for id in 1..=2_000u64 {
            if !live.is_empty() && rng.gen_range(0..3) == 0 {
                let idx = rng.gen_range(0..live.len());
                let (price, order_id) = live.swap_remove(idx);
                tree.remove(price, order_id).unwrap();
            } else {
                let price = rng.gen_range(1..=400);
                let amount = rng.gen_range(1..=1_000);
                tree.insert(price, OrderId(id), maker(), amount, id).unwrap();
                live.push((price, OrderId(id)));
            }
            if id % 100 == 0 {
                tree.verify_invariants().unwrap();
            }
        }
        tree.verify_invariants().unwrap();
        assert_eq!(tree.order_count(), live.len());

        let prices = keys(&tree);
        assert!(prices.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn drain_and_reinsert_matches_fresh_build() {
        let orders = [(870, 1, 10), (890, 2, 20), (880, 3, 30), (880, 4, 5)];
        let mut tree = tree_with(&orders);
        tree.drop_from_last(Amount::MAX, 0);
        assert!(tree.is_empty());

        for &(price, id, amount) in &orders {
            tree.insert(price, OrderId(id), maker(), amount, id).unwrap();
        }
        assert_eq!(tree, tree_with(&orders));
        tree.verify_invariants().unwrap();
    }
}
