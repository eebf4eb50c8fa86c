use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::time::SystemTime;

use crate::errors::EngineError;
use crate::instrument::Pair;
use crate::orders::{Order, OrderId, Price, Quantity, Side, UserId};
use crate::trade::Trade;

/// A single price level: a FIFO queue of resting orders at one price, plus
/// the aggregate resting volume at that price.
///
/// A level never deletes itself; the [`BookSide`] reaps it once its queue
/// drains (so an empty level is never reachable from the book).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Level {
    price: Price,
    orders: VecDeque<Order>,
    total_volume: Quantity,
}

/// Outcome of crossing a taker against one level: the trades produced and
/// the makers that were consumed to zero (popped from the queue, to be
/// dropped from the book's indexes by the caller).
struct LevelFill {
    trades: Vec<Trade>,
    filled_makers: Vec<OrderId>,
}

impl Level {
    fn new(price: Price) -> Self {
        Level {
            price,
            orders: VecDeque::new(),
            total_volume: 0,
        }
    }

    pub fn price(&self) -> Price {
        self.price
    }

    pub fn total_volume(&self) -> Quantity {
        self.total_volume
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Orders at this level in priority (FIFO) order, head first.
    pub fn iter(&self) -> impl Iterator<Item = &Order> {
        self.orders.iter()
    }

    fn get(&self, id: OrderId) -> Option<&Order> {
        self.orders.iter().find(|o| o.id == id)
    }

    /// Append to the tail of the queue (lowest priority at this price).
    fn add(&mut self, order: Order) {
        self.total_volume += order.quantity;
        self.orders.push_back(order);
    }

    /// Unlink one order from the queue. O(k) in the level's queue length;
    /// cancellation never touches the rest of the book.
    fn remove(&mut self, id: OrderId) -> Option<Order> {
        let pos = self.orders.iter().position(|o| o.id == id)?;
        let removed = self.orders.remove(pos)?;
        self.total_volume -= removed.quantity;
        Some(removed)
    }

    /// Consume orders from the head while the taker has residual quantity.
    ///
    /// Each fill trades `min(maker.quantity, taker.quantity)` at this level's
    /// price; makers driven to zero are popped so FIFO priority moves to the
    /// next arrival.
    fn fill_against(&mut self, taker: &mut Order) -> LevelFill {
        let mut trades = Vec::new();
        let mut filled_makers = Vec::new();

        while taker.quantity > 0 {
            let Some(maker) = self.orders.front_mut() else {
                break;
            };
            let fill = maker.quantity.min(taker.quantity);

            trades.push(Trade {
                price: self.price,
                quantity: fill,
                taker_side: taker.side,
                maker_id: maker.id,
                taker_id: taker.id,
                timestamp: SystemTime::now(),
            });

            maker.quantity -= fill;
            taker.quantity -= fill;
            self.total_volume -= fill;

            if maker.is_filled() {
                filled_makers.push(maker.id);
                self.orders.pop_front();
            }
        }

        LevelFill {
            trades,
            filled_makers,
        }
    }
}

/// Unifies forward and reverse level iteration so both sides enumerate
/// best-first (asks ascending, bids descending).
enum LevelIter<'a> {
    Fwd(std::collections::btree_map::Values<'a, Price, Level>),
    Rev(std::iter::Rev<std::collections::btree_map::Values<'a, Price, Level>>),
}

impl<'a> Iterator for LevelIter<'a> {
    type Item = &'a Level;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            LevelIter::Fwd(it) => it.next(),
            LevelIter::Rev(it) => it.next(),
        }
    }
}

/// One side of the book: levels keyed by price.
///
/// The `BTreeMap` is both the sorted level sequence and the price index, so
/// best-price access and cancel-by-price are O(log n) and every level is
/// reachable by exactly one path.
#[derive(Debug, Clone)]
pub struct BookSide {
    side: Side,
    levels: BTreeMap<Price, Level>,
}

impl BookSide {
    fn new(side: Side) -> Self {
        BookSide {
            side,
            levels: BTreeMap::new(),
        }
    }

    /// Most aggressive price on this side: highest bid, lowest ask.
    pub fn best_price(&self) -> Option<Price> {
        match self.side {
            Side::Buy => self.levels.keys().next_back().copied(),
            Side::Sell => self.levels.keys().next().copied(),
        }
    }

    pub fn level(&self, price: Price) -> Option<&Level> {
        self.levels.get(&price)
    }

    fn level_mut(&mut self, price: Price) -> Option<&mut Level> {
        self.levels.get_mut(&price)
    }

    /// Rest an order at `price`, creating the level lazily on first use.
    fn place(&mut self, price: Price, order: Order) {
        self.levels
            .entry(price)
            .or_insert_with(|| Level::new(price))
            .add(order);
    }

    /// Drop the level at `price` if its queue has drained. Called after every
    /// operation that may empty a level.
    fn reap(&mut self, price: Price) {
        if self.levels.get(&price).is_some_and(Level::is_empty) {
            self.levels.remove(&price);
        }
    }

    fn remove_order(&mut self, price: Price, id: OrderId) -> Option<Order> {
        let removed = self.levels.get_mut(&price)?.remove(id);
        self.reap(price);
        removed
    }

    /// Aggregate resting volume across all levels on this side.
    pub fn total_volume(&self) -> Quantity {
        self.levels.values().map(Level::total_volume).sum()
    }

    /// Number of populated price levels.
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Levels best-first: descending price for bids, ascending for asks.
    pub fn iter(&self) -> impl Iterator<Item = &Level> {
        match self.side {
            Side::Sell => LevelIter::Fwd(self.levels.values()),
            Side::Buy => LevelIter::Rev(self.levels.values().rev()),
        }
    }
}

/// Back-reference from a resting order's id to the level holding it. Cleared
/// (removed from the index) the moment the order leaves its level.
#[derive(Debug, Clone, Copy)]
struct OrderRef {
    user_id: UserId,
    side: Side,
    price: Price,
}

/// Whether a market order's requested quantity fully executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiquidityStatus {
    Filled,
    /// The opposite side was exhausted first; the residual was discarded
    /// (market orders never rest).
    Partial,
}

/// Receipt for a market submission.
#[derive(Debug, Clone)]
pub struct MarketFill {
    pub order_id: OrderId,
    pub trades: Vec<Trade>,
    pub status: LiquidityStatus,
}

/// Price-time-priority order book for one instrument.
///
/// All mutation goes through [`place_limit_order`](OrderBook::place_limit_order),
/// [`place_market_order`](OrderBook::place_market_order) and
/// [`cancel_order`](OrderBook::cancel_order); the caller serializes writers
/// (see the exchange facade), so each operation runs to completion against a
/// consistent book.
#[derive(Debug)]
pub struct OrderBook {
    bids: BookSide,
    asks: BookSide,
    /// Resting orders only: id -> location. The matcher runs to completion
    /// under the writer lock, so an in-flight taker is never observable here.
    orders: HashMap<OrderId, OrderRef>,
    /// Reverse index user -> resting order ids, maintained in the same
    /// critical section as fills and cancels.
    user_orders: HashMap<UserId, BTreeSet<OrderId>>,
    /// Append-only trade tape, in execution order.
    trades: Vec<Trade>,
    next_id: OrderId,
}

/// Cross `taker` against `book_side`, best level first, FIFO within each
/// level.
///
/// `limit` bounds how deep a limit order may execute (bid: ask levels at or
/// below it; ask: bid levels at or above it); `None` walks the whole side.
/// Makers consumed to zero are dropped from the id and user indexes, and
/// emptied levels are reaped before the next iteration.
fn cross_side(
    taker: &mut Order,
    book_side: &mut BookSide,
    limit: Option<Price>,
    orders: &mut HashMap<OrderId, OrderRef>,
    user_orders: &mut HashMap<UserId, BTreeSet<OrderId>>,
) -> Vec<Trade> {
    let mut trades = Vec::new();

    while taker.quantity > 0 {
        let Some(best) = book_side.best_price() else {
            break;
        };
        if let Some(limit) = limit {
            let crossing = match taker.side {
                Side::Buy => best <= limit,
                Side::Sell => best >= limit,
            };
            if !crossing {
                break;
            }
        }
        let Some(level) = book_side.level_mut(best) else {
            break;
        };

        let fill = level.fill_against(taker);
        for maker_id in fill.filled_makers {
            if let Some(r) = orders.remove(&maker_id) {
                unindex_user(user_orders, r.user_id, maker_id);
            }
        }
        trades.extend(fill.trades);
        book_side.reap(best);
    }

    trades
}

fn unindex_user(
    user_orders: &mut HashMap<UserId, BTreeSet<OrderId>>,
    user_id: UserId,
    id: OrderId,
) {
    if let Some(ids) = user_orders.get_mut(&user_id) {
        ids.remove(&id);
        if ids.is_empty() {
            user_orders.remove(&user_id);
        }
    }
}

impl OrderBook {
    pub fn new() -> Self {
        OrderBook {
            bids: BookSide::new(Side::Buy),
            asks: BookSide::new(Side::Sell),
            orders: HashMap::new(),
            user_orders: HashMap::new(),
            trades: Vec::new(),
            next_id: 1,
        }
    }

    fn fresh_id(&mut self) -> OrderId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn book_side(&self, side: Side) -> &BookSide {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    /// Place a limit order: cross first, then rest.
    ///
    /// While the order has residual quantity and the opposite side's best
    /// level crosses the limit price, it executes there (a marketable limit
    /// behaves like a price-capped market order); any remainder rests on its
    /// own side at `price`. Returns the assigned id and the trades produced,
    /// possibly empty.
    pub fn place_limit_order(
        &mut self,
        side: Side,
        price: Price,
        quantity: Quantity,
        user_id: UserId,
    ) -> Result<(OrderId, Vec<Trade>), EngineError> {
        if quantity == 0 {
            return Err(EngineError::InvalidSize);
        }

        let id = self.fresh_id();
        let mut order = Order::new(id, user_id, side, quantity);

        let opposite = match side {
            Side::Buy => &mut self.asks,
            Side::Sell => &mut self.bids,
        };
        let trades = cross_side(
            &mut order,
            opposite,
            Some(price),
            &mut self.orders,
            &mut self.user_orders,
        );
        self.trades.extend(trades.iter().cloned());

        if !order.is_filled() {
            let own = match side {
                Side::Buy => &mut self.bids,
                Side::Sell => &mut self.asks,
            };
            own.place(price, order);
            self.orders.insert(
                id,
                OrderRef {
                    user_id,
                    side,
                    price,
                },
            );
            self.user_orders.entry(user_id).or_default().insert(id);
        }

        self.debug_validate();
        Ok((id, trades))
    }

    /// Place a market order: walk the opposite side best to worst until the
    /// requested quantity executes or the side is exhausted.
    ///
    /// An empty opposite side fails the whole order with
    /// [`EngineError::InsufficientLiquidity`] and mutates nothing. A partial
    /// fill returns the trades produced with [`LiquidityStatus::Partial`];
    /// the residual is discarded, never rested, never retried.
    pub fn place_market_order(
        &mut self,
        side: Side,
        quantity: Quantity,
        user_id: UserId,
    ) -> Result<MarketFill, EngineError> {
        if quantity == 0 {
            return Err(EngineError::InvalidSize);
        }
        if self.book_side(side.opposite()).is_empty() {
            return Err(EngineError::InsufficientLiquidity);
        }

        let id = self.fresh_id();
        let mut order = Order::new(id, user_id, side, quantity);

        let opposite = match side {
            Side::Buy => &mut self.asks,
            Side::Sell => &mut self.bids,
        };
        let trades = cross_side(
            &mut order,
            opposite,
            None,
            &mut self.orders,
            &mut self.user_orders,
        );
        self.trades.extend(trades.iter().cloned());

        let status = if order.is_filled() {
            LiquidityStatus::Filled
        } else {
            LiquidityStatus::Partial
        };

        self.debug_validate();
        Ok(MarketFill {
            order_id: id,
            trades,
            status,
        })
    }

    /// Cancel a resting order by id.
    ///
    /// An id that is not resting (never existed, already filled, or already
    /// cancelled) deterministically fails with `UnknownOrder` and mutates
    /// nothing.
    pub fn cancel_order(&mut self, id: OrderId) -> Result<(), EngineError> {
        let Some(r) = self.orders.remove(&id) else {
            return Err(EngineError::UnknownOrder(id));
        };

        let side = match r.side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        let removed = side.remove_order(r.price, id);
        debug_assert!(
            removed.is_some(),
            "indexed order {id} missing from level {}",
            r.price
        );
        unindex_user(&mut self.user_orders, r.user_id, id);

        self.debug_validate();
        Ok(())
    }

    pub fn best_bid(&self) -> Option<Price> {
        self.bids.best_price()
    }

    pub fn best_ask(&self) -> Option<Price> {
        self.asks.best_price()
    }

    pub fn bids(&self) -> &BookSide {
        &self.bids
    }

    pub fn asks(&self) -> &BookSide {
        &self.asks
    }

    pub fn volume(&self, side: Side) -> Quantity {
        self.book_side(side).total_volume()
    }

    pub fn bid_volume(&self) -> Quantity {
        self.bids.total_volume()
    }

    pub fn ask_volume(&self) -> Quantity {
        self.asks.total_volume()
    }

    /// The append-only trade tape, oldest first.
    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    /// Live (resting) orders belonging to `user_id`, in id order.
    pub fn orders_for_user(&self, user_id: UserId) -> Vec<BookOrder> {
        let Some(ids) = self.user_orders.get(&user_id) else {
            return Vec::new();
        };
        ids.iter().filter_map(|&id| self.resting(id)).collect()
    }

    fn resting(&self, id: OrderId) -> Option<BookOrder> {
        let r = self.orders.get(&id)?;
        let order = self.book_side(r.side).level(r.price)?.get(id)?;
        Some(BookOrder {
            id,
            user_id: order.user_id,
            side: order.side,
            price: r.price,
            quantity: order.quantity,
            timestamp: order.timestamp,
        })
    }

    /// Full-book consistency check, run after every mutating operation in
    /// debug builds. A failure is an engine bug, fatal to the process: the
    /// book is untrusted thereafter.
    #[cfg(debug_assertions)]
    fn debug_validate(&self) {
        for (side, book_side) in [(Side::Buy, &self.bids), (Side::Sell, &self.asks)] {
            for level in book_side.levels.values() {
                assert!(
                    !level.is_empty(),
                    "empty level {} reachable on {:?}",
                    level.price,
                    side
                );
                let sum: Quantity = level.iter().map(|o| o.quantity).sum();
                assert_eq!(
                    level.total_volume, sum,
                    "level {} volume drifted from its queue",
                    level.price
                );
                for order in level.iter() {
                    assert!(order.quantity > 0, "zero-quantity order {} resting", order.id);
                    assert_eq!(order.side, side, "order {} on wrong side", order.id);
                    let r = self
                        .orders
                        .get(&order.id)
                        .unwrap_or_else(|| panic!("resting order {} not indexed", order.id));
                    assert_eq!((r.side, r.price), (side, level.price));
                    assert!(
                        self.user_orders
                            .get(&order.user_id)
                            .is_some_and(|ids| ids.contains(&order.id)),
                        "order {} missing from user index",
                        order.id
                    );
                }
            }
        }

        if let (Some(bid), Some(ask)) = (self.best_bid(), self.best_ask()) {
            assert!(bid < ask, "book crossed at rest: bid {bid} >= ask {ask}");
        }

        for (&id, r) in &self.orders {
            let present = self
                .book_side(r.side)
                .level(r.price)
                .is_some_and(|level| level.get(id).is_some());
            assert!(present, "indexed order {id} unreachable via its level");
        }
        for (&user_id, ids) in &self.user_orders {
            assert!(!ids.is_empty(), "empty user index entry for {user_id}");
            for &id in ids {
                assert!(
                    self.orders.get(&id).is_some_and(|r| r.user_id == user_id),
                    "user index points at foreign order {id}"
                );
            }
        }
    }

    #[cfg(not(debug_assertions))]
    fn debug_validate(&self) {}
}

impl Default for OrderBook {
    fn default() -> Self {
        Self::new()
    }
}

/// One resting order as exposed by snapshots and user queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookOrder {
    pub id: OrderId,
    pub user_id: UserId,
    pub side: Side,
    pub price: Price,
    pub quantity: Quantity,
    pub timestamp: SystemTime,
}

/// A point-in-time view of one book: totals plus every resting order, grouped
/// by side. A pure function of book state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub pair: Pair,
    pub total_bid_volume: Quantity,
    pub total_ask_volume: Quantity,
    /// Best-first (descending price), FIFO within each level.
    pub bids: Vec<BookOrder>,
    /// Best-first (ascending price), FIFO within each level.
    pub asks: Vec<BookOrder>,
}

impl BookSnapshot {
    pub fn for_pair(pair: Pair, book: &OrderBook) -> Self {
        fn orders(side: &BookSide) -> Vec<BookOrder> {
            side.iter()
                .flat_map(|level| {
                    level.iter().map(|o| BookOrder {
                        id: o.id,
                        user_id: o.user_id,
                        side: o.side,
                        price: level.price(),
                        quantity: o.quantity,
                        timestamp: o.timestamp,
                    })
                })
                .collect()
        }

        BookSnapshot {
            pair,
            total_bid_volume: book.bid_volume(),
            total_ask_volume: book.ask_volume(),
            bids: orders(&book.bids),
            asks: orders(&book.asks),
        }
    }

    pub fn empty(pair: Pair) -> Self {
        BookSnapshot {
            pair,
            total_bid_volume: 0,
            total_ask_volume: 0,
            bids: Vec::new(),
            asks: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn place_limit(ob: &mut OrderBook, side: Side, price: Price, qty: Quantity) -> OrderId {
        let (id, _) = ob.place_limit_order(side, price, qty, 0).unwrap();
        id
    }

    /// Summary of the externally observable book shape, for round-trip
    /// comparisons.
    fn shape(ob: &OrderBook) -> (Option<Price>, Option<Price>, Quantity, Quantity, usize, usize) {
        (
            ob.best_bid(),
            ob.best_ask(),
            ob.bid_volume(),
            ob.ask_volume(),
            ob.bids().depth(),
            ob.asks().depth(),
        )
    }

    #[test]
    fn empty_book() {
        let ob = OrderBook::new();
        assert_eq!(ob.best_bid(), None);
        assert_eq!(ob.best_ask(), None);
        assert_eq!(ob.bid_volume(), 0);
        assert_eq!(ob.ask_volume(), 0);
        assert!(ob.trades().is_empty());
    }

    #[test]
    fn zero_quantity_is_rejected() {
        let mut ob = OrderBook::new();
        assert_eq!(
            ob.place_limit_order(Side::Buy, 100, 0, 0),
            Err(EngineError::InvalidSize)
        );
        assert!(matches!(
            ob.place_market_order(Side::Buy, 0, 0),
            Err(EngineError::InvalidSize)
        ));
    }

    #[test]
    fn ids_are_monotonic() {
        let mut ob = OrderBook::new();
        let a = place_limit(&mut ob, Side::Buy, 90, 1);
        let b = place_limit(&mut ob, Side::Buy, 91, 1);
        let c = place_limit(&mut ob, Side::Sell, 100, 1);
        assert!(a < b && b < c);
    }

    /// Simple fill: ask 20 @ 10_000, market bid 10.
    #[test]
    fn market_bid_partially_fills_resting_ask() {
        let mut ob = OrderBook::new();
        let ask = place_limit(&mut ob, Side::Sell, 10_000, 20);

        let fill = ob.place_market_order(Side::Buy, 10, 1).unwrap();

        assert_eq!(fill.status, LiquidityStatus::Filled);
        assert_eq!(fill.trades.len(), 1);
        assert_eq!(fill.trades[0].price, 10_000);
        assert_eq!(fill.trades[0].quantity, 10);
        assert_eq!(fill.trades[0].maker_id, ask);
        assert_eq!(fill.trades[0].taker_id, fill.order_id);
        assert_eq!(ob.ask_volume(), 10);
        assert_eq!(ob.best_ask(), Some(10_000));
        assert_eq!(ob.bid_volume(), 0);
    }

    /// Multi-level sweep: bids (1 @ 5000) x2, (8 @ 9000), (5 @ 10_000);
    /// market ask 10 consumes best-to-worst.
    #[test]
    fn market_ask_sweeps_levels_best_first() {
        let mut ob = OrderBook::new();
        place_limit(&mut ob, Side::Buy, 5_000, 1);
        place_limit(&mut ob, Side::Buy, 5_000, 1);
        place_limit(&mut ob, Side::Buy, 9_000, 8);
        place_limit(&mut ob, Side::Buy, 10_000, 5);

        assert_eq!(ob.bid_volume(), 15);
        assert_eq!(ob.best_bid(), Some(10_000));

        let fill = ob.place_market_order(Side::Sell, 10, 1).unwrap();

        assert_eq!(fill.status, LiquidityStatus::Filled);
        assert_eq!(fill.trades.len(), 2);
        assert_eq!((fill.trades[0].price, fill.trades[0].quantity), (10_000, 5));
        assert_eq!((fill.trades[1].price, fill.trades[1].quantity), (9_000, 5));

        assert_eq!(ob.bid_volume(), 5);
        assert_eq!(ob.best_bid(), Some(9_000));
        let level = ob.bids().level(9_000).unwrap();
        assert_eq!(level.total_volume(), 3);
        assert_eq!(ob.bids().level(5_000).unwrap().total_volume(), 2);
        assert_eq!(ob.bids().level(10_000), None);
    }

    /// Cancel ask: place 4 @ 10_000, cancel, level reaped.
    #[test]
    fn cancel_removes_order_and_reaps_level() {
        let mut ob = OrderBook::new();
        let id = place_limit(&mut ob, Side::Sell, 10_000, 4);
        assert_eq!(ob.ask_volume(), 4);

        ob.cancel_order(id).unwrap();

        assert_eq!(ob.ask_volume(), 0);
        assert_eq!(ob.asks().level(10_000), None);
        assert_eq!(ob.cancel_order(id), Err(EngineError::UnknownOrder(id)));
    }

    /// Marketable limit: resting ask 10 @ 100, limit bid 4 @ 105 executes at
    /// the maker's price and rests nothing.
    #[test]
    fn marketable_limit_executes_at_maker_price() {
        let mut ob = OrderBook::new();
        place_limit(&mut ob, Side::Sell, 100, 10);

        let (_, trades) = ob.place_limit_order(Side::Buy, 105, 4, 1).unwrap();

        assert_eq!(trades.len(), 1);
        assert_eq!((trades[0].price, trades[0].quantity), (100, 4));
        assert!(ob.bids().is_empty());
        assert_eq!(ob.bids().level(105), None);
        assert_eq!(ob.ask_volume(), 6);
        assert_eq!(ob.best_ask(), Some(100));
    }

    /// Trade tape: after the simple fill there is exactly one entry, with the
    /// aggressor side recorded.
    #[test]
    fn tape_records_execution_order_and_taker_side() {
        let mut ob = OrderBook::new();
        place_limit(&mut ob, Side::Sell, 10_000, 20);
        ob.place_market_order(Side::Buy, 10, 1).unwrap();

        let tape = ob.trades();
        assert_eq!(tape.len(), 1);
        assert_eq!(tape[0].price, 10_000);
        assert_eq!(tape[0].quantity, 10);
        assert_eq!(tape[0].taker_side, Side::Buy);
    }

    #[test]
    fn market_order_into_empty_book_fails_whole() {
        let mut ob = OrderBook::new();
        assert!(matches!(
            ob.place_market_order(Side::Buy, 10, 0),
            Err(EngineError::InsufficientLiquidity)
        ));
        assert!(ob.trades().is_empty());
        assert_eq!(shape(&ob), (None, None, 0, 0, 0, 0));
    }

    #[test]
    fn market_order_larger_than_book_partially_fills() {
        let mut ob = OrderBook::new();
        place_limit(&mut ob, Side::Sell, 100, 3);
        place_limit(&mut ob, Side::Sell, 101, 2);

        let fill = ob.place_market_order(Side::Buy, 10, 1).unwrap();

        assert_eq!(fill.status, LiquidityStatus::Partial);
        let total: Quantity = fill.trades.iter().map(|t| t.quantity).sum();
        assert_eq!(total, 5);
        assert!(ob.asks().is_empty());
        // the residual is discarded, not rested
        assert!(ob.bids().is_empty());
    }

    #[test]
    fn limit_crossing_multiple_levels_rests_remainder() {
        let mut ob = OrderBook::new();
        place_limit(&mut ob, Side::Sell, 100, 3);
        place_limit(&mut ob, Side::Sell, 102, 3);
        place_limit(&mut ob, Side::Sell, 110, 3);

        // crosses 100 and 102 but not 110, then rests 4 at 105
        let (id, trades) = ob.place_limit_order(Side::Buy, 105, 10, 1).unwrap();

        assert_eq!(trades.len(), 2);
        assert_eq!((trades[0].price, trades[0].quantity), (100, 3));
        assert_eq!((trades[1].price, trades[1].quantity), (102, 3));
        assert_eq!(ob.best_bid(), Some(105));
        assert_eq!(ob.bids().level(105).unwrap().total_volume(), 4);
        assert_eq!(ob.best_ask(), Some(110));
        // the rested remainder is cancellable
        ob.cancel_order(id).unwrap();
        assert!(ob.bids().is_empty());
    }

    #[test]
    fn fifo_priority_within_level() {
        let mut ob = OrderBook::new();
        let first = place_limit(&mut ob, Side::Sell, 100, 4);
        let second = place_limit(&mut ob, Side::Sell, 100, 6);

        let fill = ob.place_market_order(Side::Buy, 9, 1).unwrap();

        assert_eq!(fill.trades.len(), 2);
        assert_eq!(fill.trades[0].maker_id, first);
        assert_eq!(fill.trades[0].quantity, 4);
        assert_eq!(fill.trades[1].maker_id, second);
        assert_eq!(fill.trades[1].quantity, 5);

        let level = ob.asks().level(100).unwrap();
        assert_eq!(level.total_volume(), 1);
        assert_eq!(level.iter().next().map(|o| o.id), Some(second));
    }

    #[test]
    fn cancel_head_order_leaves_level_in_place() {
        let mut ob = OrderBook::new();
        let head = place_limit(&mut ob, Side::Buy, 100, 4);
        place_limit(&mut ob, Side::Buy, 100, 6);

        ob.cancel_order(head).unwrap();

        let level = ob.bids().level(100).unwrap();
        assert_eq!(level.total_volume(), 6);
        assert_eq!(level.len(), 1);
        assert_eq!(ob.bid_volume(), 6);
    }

    #[test]
    fn place_then_cancel_restores_book_shape() {
        let mut ob = OrderBook::new();
        place_limit(&mut ob, Side::Buy, 95, 5);
        place_limit(&mut ob, Side::Sell, 105, 5);
        let before = shape(&ob);

        let id = place_limit(&mut ob, Side::Buy, 96, 7);
        assert_ne!(shape(&ob), before);
        ob.cancel_order(id).unwrap();

        assert_eq!(shape(&ob), before);
    }

    #[test]
    fn snapshot_is_pure_and_ordered() {
        let mut ob = OrderBook::new();
        place_limit(&mut ob, Side::Buy, 95, 5);
        place_limit(&mut ob, Side::Buy, 97, 2);
        place_limit(&mut ob, Side::Sell, 105, 3);
        place_limit(&mut ob, Side::Sell, 103, 1);

        let pair = crate::instrument::ETH_USD;
        let a = BookSnapshot::for_pair(pair, &ob);
        let b = BookSnapshot::for_pair(pair, &ob);
        assert_eq!(a, b);

        // bids descending, asks ascending
        assert_eq!(
            a.bids.iter().map(|o| o.price).collect::<Vec<_>>(),
            vec![97, 95]
        );
        assert_eq!(
            a.asks.iter().map(|o| o.price).collect::<Vec<_>>(),
            vec![103, 105]
        );
        assert_eq!(a.total_bid_volume, 7);
        assert_eq!(a.total_ask_volume, 4);
    }

    #[test]
    fn cancel_after_full_fill_is_unknown() {
        let mut ob = OrderBook::new();
        let ask = place_limit(&mut ob, Side::Sell, 100, 5);
        ob.place_market_order(Side::Buy, 5, 1).unwrap();

        assert_eq!(ob.cancel_order(ask), Err(EngineError::UnknownOrder(ask)));
    }

    #[test]
    fn user_index_tracks_fills_and_cancels() {
        let mut ob = OrderBook::new();
        let (a, _) = ob.place_limit_order(Side::Sell, 100, 5, 7).unwrap();
        let (b, _) = ob.place_limit_order(Side::Sell, 101, 5, 7).unwrap();

        let live = ob.orders_for_user(7);
        assert_eq!(live.iter().map(|o| o.id).collect::<Vec<_>>(), vec![a, b]);

        // partial fill leaves the order live with reduced quantity
        ob.place_market_order(Side::Buy, 3, 1).unwrap();
        let live = ob.orders_for_user(7);
        assert_eq!(live[0].quantity, 2);

        // full fill drops it
        ob.place_market_order(Side::Buy, 2, 1).unwrap();
        let live = ob.orders_for_user(7);
        assert_eq!(live.iter().map(|o| o.id).collect::<Vec<_>>(), vec![b]);

        ob.cancel_order(b).unwrap();
        assert!(ob.orders_for_user(7).is_empty());
    }

    #[test]
    fn conservation_within_one_submission() {
        let mut ob = OrderBook::new();
        place_limit(&mut ob, Side::Sell, 100, 4);
        place_limit(&mut ob, Side::Sell, 101, 4);
        let before = ob.ask_volume();

        let fill = ob.place_market_order(Side::Buy, 6, 1).unwrap();

        let traded: Quantity = fill.trades.iter().map(|t| t.quantity).sum();
        assert_eq!(traded, 6);
        assert_eq!(ob.ask_volume(), before - traded);
    }

    #[test]
    fn resting_same_price_opposite_sides_never_cross_silently() {
        let mut ob = OrderBook::new();
        place_limit(&mut ob, Side::Buy, 100, 5);
        // an ask at the bid price is marketable and executes instead of resting
        let (_, trades) = ob.place_limit_order(Side::Sell, 100, 5, 1).unwrap();
        assert_eq!(trades.len(), 1);
        assert!(ob.bids().is_empty());
        assert!(ob.asks().is_empty());
    }
}
