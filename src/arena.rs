//! Order Arena - append-only order table addressed by sequential id.
//!
//! Orders are never deleted, so the arena is a contiguous block with no
//! free list: id `n` lives at slot `n - 1`. Lookup, insert and lifecycle
//! updates are all O(1).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::command::{Address, Amount, OrderId, TokenId};

/// Order lifecycle. `Cancelled` and `Filled` are terminal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum OrderStatus {
    #[default]
    Open = 0,
    Cancelled = 1,
    Filled = 2,
}

impl OrderStatus {
    #[inline]
    pub const fn is_open(self) -> bool {
        matches!(self, OrderStatus::Open)
    }
}

/// A single order record - exactly 128 bytes (two cache lines).
///
/// Amounts and the id come first so the 16-byte fields stay aligned; the
/// three addresses and the status byte pack into the tail.
#[repr(C)]
#[repr(align(64))]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Order {
    /// Sequential identifier, starting at 1
    pub id: OrderId,
    /// Amount of `token_get` the maker asks for
    pub amount_get: Amount,
    /// Amount of `token_give` the maker offers
    pub amount_give: Amount,
    /// Block timestamp at creation
    pub timestamp: u64,
    /// Creator of the order
    pub maker: Address,
    pub token_get: TokenId,
    pub token_give: TokenId,
    pub status: OrderStatus,
}

const _: () = assert!(
    std::mem::size_of::<Order>() == 128,
    "Order must be exactly 128 bytes (two cache lines)"
);

const _: () = assert!(
    std::mem::align_of::<Order>() == 64,
    "Order must be 64-byte aligned"
);

impl Order {
    #[inline]
    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.status == OrderStatus::Cancelled
    }

    #[inline]
    pub fn is_filled(&self) -> bool {
        self.status == OrderStatus::Filled
    }
}

impl fmt::Debug for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Order")
            .field("id", &self.id)
            .field("maker", &self.maker)
            .field("token_get", &self.token_get)
            .field("amount_get", &self.amount_get)
            .field("token_give", &self.token_give)
            .field("amount_give", &self.amount_give)
            .field("timestamp", &self.timestamp)
            .field("status", &self.status)
            .finish()
    }
}

/// Contiguous order storage indexed by id.
pub struct OrderArena {
    orders: Vec<Order>,
}

impl OrderArena {
    pub fn new() -> Self {
        Self { orders: Vec::new() }
    }

    /// Create an arena with room for `capacity` orders before reallocating.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            orders: Vec::with_capacity(capacity),
        }
    }

    /// The id the next pushed order will receive.
    #[inline]
    pub fn next_id(&self) -> OrderId {
        self.orders.len() as OrderId + 1
    }

    /// Append an order. Its `id` must equal [`next_id`](Self::next_id).
    #[inline]
    pub fn push(&mut self, order: Order) -> OrderId {
        debug_assert_eq!(order.id, self.next_id(), "order ids must be sequential");
        self.orders.push(order);
        order.id
    }

    /// Remove the most recent order. Only used to undo an insert.
    #[inline]
    pub fn pop(&mut self) -> Option<Order> {
        self.orders.pop()
    }

    #[inline]
    fn slot(id: OrderId) -> Option<usize> {
        id.checked_sub(1).map(|i| i as usize)
    }

    /// Look up an order. Id `0` and ids never issued return `None`.
    #[inline]
    pub fn get(&self, id: OrderId) -> Option<&Order> {
        Self::slot(id).and_then(|i| self.orders.get(i))
    }

    #[inline]
    pub fn get_mut(&mut self, id: OrderId) -> Option<&mut Order> {
        Self::slot(id).and_then(|i| self.orders.get_mut(i))
    }

    /// Number of orders ever created (equal to the last issued id).
    #[inline]
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Order> {
        self.orders.iter()
    }
}

impl Default for OrderArena {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for OrderArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderArena")
            .field("len", &self.orders.len())
            .field("capacity", &self.orders.capacity())
            .finish()
    }
}
