//! Order Book - the order table and its lifecycle.
//!
//! Orders live in an append-only [`OrderArena`] indexed by id, with a
//! per-maker index for account views. There is no sorted book: an order is
//! settled individually by id (see `matching.rs`).

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::arena::{Order, OrderArena, OrderStatus};
use crate::command::{Address, MakeOrder, OrderEvent, OrderId, OutputEvent};
use crate::error::ExchangeError;
use crate::exchange::Exchange;
use crate::journal::JournalEntry;
use crate::token::TokenBank;

/// Order table plus maker index.
pub struct OrderBook {
    arena: OrderArena,
    /// Maker -> ids of every order they created, ascending
    by_maker: FxHashMap<Address, Vec<OrderId>>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self {
            arena: OrderArena::new(),
            by_maker: FxHashMap::default(),
        }
    }

    /// Create an order book with pre-allocated order capacity
    pub fn with_capacity(orders: usize) -> Self {
        Self {
            arena: OrderArena::with_capacity(orders),
            by_maker: FxHashMap::default(),
        }
    }

    #[inline]
    pub fn get(&self, id: OrderId) -> Option<&Order> {
        self.arena.get(id)
    }

    /// Number of orders ever created; also the last issued id.
    #[inline]
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Order> {
        self.arena.iter()
    }

    /// Ids of all orders created by `maker`, in creation order.
    pub fn orders_of(&self, maker: Address) -> &[OrderId] {
        self.by_maker.get(&maker).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Look up an order that is still open.
    pub fn open_order(&self, id: OrderId) -> Result<&Order, ExchangeError> {
        let order = self.arena.get(id).ok_or(ExchangeError::OrderNotFound(id))?;
        match order.status {
            OrderStatus::Open => Ok(order),
            OrderStatus::Cancelled => Err(ExchangeError::OrderAlreadyCancelled(id)),
            OrderStatus::Filled => Err(ExchangeError::OrderAlreadyFilled(id)),
        }
    }

    /// Append an open order under the next id.
    pub(crate) fn insert(&mut self, maker: Address, request: &MakeOrder, timestamp: u64) -> OrderId {
        let id = self.arena.next_id();
        self.arena.push(Order {
            id,
            amount_get: request.amount_get,
            amount_give: request.amount_give,
            timestamp,
            maker,
            token_get: request.token_get,
            token_give: request.token_give,
            status: OrderStatus::Open,
        });
        self.by_maker.entry(maker).or_default().push(id);
        id
    }

    /// Undo the most recent insert.
    pub(crate) fn remove_last(&mut self) {
        if let Some(order) = self.arena.pop() {
            if let Some(ids) = self.by_maker.get_mut(&order.maker) {
                ids.pop();
                if ids.is_empty() {
                    self.by_maker.remove(&order.maker);
                }
            }
        }
    }

    /// Move an open order to a terminal state, returning the old status.
    pub(crate) fn set_status(&mut self, id: OrderId, status: OrderStatus) -> Option<OrderStatus> {
        let order = self.arena.get_mut(id)?;
        let previous = order.status;
        order.status = status;
        Some(previous)
    }

    pub(crate) fn restore_status(&mut self, id: OrderId, status: OrderStatus) {
        if let Some(order) = self.arena.get_mut(id) {
            order.status = status;
        }
    }
}

impl Default for OrderBook {
    fn default() -> Self {
        Self::new()
    }
}

impl Order {
    pub(crate) fn to_event(&self, timestamp: u64) -> OrderEvent {
        OrderEvent {
            id: self.id,
            user: self.maker,
            token_get: self.token_get,
            amount_get: self.amount_get,
            token_give: self.token_give,
            amount_give: self.amount_give,
            timestamp,
        }
    }
}

impl<B: TokenBank> Exchange<B> {
    /// Open an order offering `amount_give` of `token_give` for `amount_get`
    /// of `token_get`.
    ///
    /// The maker must hold `amount_give` at creation; the balance is not
    /// reserved and is checked again when the order is filled.
    pub fn make_order(&mut self, caller: Address, request: MakeOrder) -> Result<OrderId, ExchangeError> {
        self.atomically(|ex| {
            let available = ex.ledger.balance_of(request.token_give, caller);
            if available < request.amount_give {
                debug!(%caller, needed = request.amount_give, available, "order rejected");
                return Err(ExchangeError::InsufficientCustodyFunds {
                    token: request.token_give,
                    user: caller,
                    needed: request.amount_give,
                    available,
                });
            }

            let timestamp = ex.timestamp();
            let id = ex.book.insert(caller, &request, timestamp);
            ex.journal.record(JournalEntry::OrderInserted { id });
            ex.emit(OutputEvent::OrderCreated(OrderEvent {
                id,
                user: caller,
                token_get: request.token_get,
                amount_get: request.amount_get,
                token_give: request.token_give,
                amount_give: request.amount_give,
                timestamp,
            }));
            debug!(id, %caller, "order created");
            Ok(id)
        })
    }

    /// Cancel an open order. Only its maker may do so.
    pub fn cancel_order(&mut self, caller: Address, id: OrderId) -> Result<(), ExchangeError> {
        self.atomically(|ex| {
            let order = *ex.book.get(id).ok_or(ExchangeError::OrderNotFound(id))?;
            if order.maker != caller {
                return Err(ExchangeError::NotOrderOwner { id, caller });
            }
            ex.book.open_order(id)?;

            let previous = ex
                .book
                .set_status(id, OrderStatus::Cancelled)
                .ok_or(ExchangeError::OrderNotFound(id))?;
            ex.journal.record(JournalEntry::StatusChanged { id, previous });

            let timestamp = ex.timestamp();
            ex.emit(OutputEvent::OrderCancelled(order.to_event(timestamp)));
            debug!(id, %caller, "order cancelled");
            Ok(())
        })
    }

    /// Look up any order ever created.
    #[inline]
    pub fn order(&self, id: OrderId) -> Option<&Order> {
        self.book.get(id)
    }

    /// Last issued order id (zero before the first order).
    #[inline]
    pub fn order_count(&self) -> u64 {
        self.book.len() as u64
    }

    /// False for unknown ids.
    pub fn is_cancelled(&self, id: OrderId) -> bool {
        self.book.get(id).is_some_and(Order::is_cancelled)
    }

    /// False for unknown ids.
    pub fn is_filled(&self, id: OrderId) -> bool {
        self.book.get(id).is_some_and(Order::is_filled)
    }
}
