use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::errors::EngineError;
use crate::instrument::Pair;
use crate::orderbook::{BookOrder, BookSnapshot, MarketFill, OrderBook};
use crate::orders::{OrderId, Price, Quantity, Side, UserId};
use crate::trade::Trade;

/// A live order together with the market it rests in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserOrder {
    pub pair: Pair,
    #[serde(flatten)]
    pub order: BookOrder,
}

/// The engine facade: one order book per market, each behind its own
/// single-writer / multi-reader lock.
///
/// Submits and cancels take the exclusive lock and run to completion; there
/// are no suspension points and no I/O inside the critical section. Queries
/// take the shared lock. Books for different markets lock independently, so
/// markets execute in parallel. Trades are returned to the caller, which
/// publishes or settles them only after the lock is released.
pub struct Exchange {
    books: HashMap<Pair, RwLock<OrderBook>>,
}

impl Exchange {
    pub fn new(markets: &[Pair]) -> Self {
        let books = markets
            .iter()
            .map(|&pair| (pair, RwLock::new(OrderBook::new())))
            .collect();
        Exchange { books }
    }

    fn book(&self, pair: &Pair) -> Result<&RwLock<OrderBook>, EngineError> {
        self.books
            .get(pair)
            .ok_or_else(|| EngineError::UnknownMarket(pair.code()))
    }

    pub fn place_limit_order(
        &self,
        pair: &Pair,
        side: Side,
        price: Price,
        quantity: Quantity,
        user_id: UserId,
    ) -> Result<(OrderId, Vec<Trade>), EngineError> {
        self.book(pair)?
            .write()
            .place_limit_order(side, price, quantity, user_id)
    }

    pub fn place_market_order(
        &self,
        pair: &Pair,
        side: Side,
        quantity: Quantity,
        user_id: UserId,
    ) -> Result<MarketFill, EngineError> {
        self.book(pair)?
            .write()
            .place_market_order(side, quantity, user_id)
    }

    pub fn cancel_order(&self, pair: &Pair, id: OrderId) -> Result<(), EngineError> {
        self.book(pair)?.write().cancel_order(id)
    }

    pub fn best_bid(&self, pair: &Pair) -> Result<Option<Price>, EngineError> {
        Ok(self.book(pair)?.read().best_bid())
    }

    pub fn best_ask(&self, pair: &Pair) -> Result<Option<Price>, EngineError> {
        Ok(self.book(pair)?.read().best_ask())
    }

    pub fn volume(&self, pair: &Pair, side: Side) -> Result<Quantity, EngineError> {
        Ok(self.book(pair)?.read().volume(side))
    }

    pub fn snapshot(&self, pair: &Pair) -> Result<BookSnapshot, EngineError> {
        let book = self.book(pair)?.read();
        Ok(BookSnapshot::for_pair(*pair, &book))
    }

    /// The market's trade tape, oldest first.
    pub fn trades(&self, pair: &Pair) -> Result<Vec<Trade>, EngineError> {
        Ok(self.book(pair)?.read().trades().to_vec())
    }

    /// Live orders of one user across every market, in a stable order.
    pub fn user_orders(&self, user_id: UserId) -> Vec<UserOrder> {
        let mut out: Vec<UserOrder> = self
            .books
            .iter()
            .flat_map(|(&pair, book)| {
                let book = book.read();
                book.orders_for_user(user_id)
                    .into_iter()
                    .map(move |order| UserOrder { pair, order })
                    .collect::<Vec<_>>()
            })
            .collect();
        out.sort_by_key(|o| (o.pair.code(), o.order.id));
        out
    }
}

impl Default for Exchange {
    fn default() -> Self {
        Exchange::new(Pair::supported())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::{BTC_USD, ETH_USD};
    use crate::orderbook::LiquidityStatus;

    #[test]
    fn unknown_market_is_reported() {
        let ex = Exchange::new(&[ETH_USD]);
        let err = ex
            .place_limit_order(&BTC_USD, Side::Buy, 100, 1, 0)
            .unwrap_err();
        assert_eq!(err, EngineError::UnknownMarket("BTC-USD".into()));
        assert_eq!(
            ex.best_bid(&BTC_USD),
            Err(EngineError::UnknownMarket("BTC-USD".into()))
        );
    }

    #[test]
    fn markets_are_independent() {
        let ex = Exchange::default();
        ex.place_limit_order(&ETH_USD, Side::Sell, 100, 5, 1)
            .unwrap();
        ex.place_limit_order(&BTC_USD, Side::Sell, 900, 2, 1)
            .unwrap();

        assert_eq!(ex.best_ask(&ETH_USD).unwrap(), Some(100));
        assert_eq!(ex.best_ask(&BTC_USD).unwrap(), Some(900));

        let fill = ex.place_market_order(&ETH_USD, Side::Buy, 5, 2).unwrap();
        assert_eq!(fill.status, LiquidityStatus::Filled);
        assert_eq!(ex.volume(&ETH_USD, Side::Sell).unwrap(), 0);
        assert_eq!(ex.volume(&BTC_USD, Side::Sell).unwrap(), 2);
        assert_eq!(ex.trades(&BTC_USD).unwrap().len(), 0);
        assert_eq!(ex.trades(&ETH_USD).unwrap().len(), 1);
    }

    #[test]
    fn user_orders_span_markets() {
        let ex = Exchange::default();
        ex.place_limit_order(&ETH_USD, Side::Buy, 90, 3, 42).unwrap();
        ex.place_limit_order(&BTC_USD, Side::Sell, 910, 2, 42)
            .unwrap();
        ex.place_limit_order(&ETH_USD, Side::Sell, 120, 1, 7).unwrap();

        let mine = ex.user_orders(42);
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].pair, BTC_USD);
        assert_eq!(mine[0].order.quantity, 2);
        assert_eq!(mine[1].pair, ETH_USD);
        assert_eq!(mine[1].order.price, 90);
        assert!(ex.user_orders(99).is_empty());
    }

    #[test]
    fn facade_propagates_validation() {
        let ex = Exchange::default();
        assert_eq!(
            ex.place_limit_order(&ETH_USD, Side::Buy, 100, 0, 0),
            Err(EngineError::InvalidSize)
        );
        assert_eq!(
            ex.cancel_order(&ETH_USD, 12345),
            Err(EngineError::UnknownOrder(12345))
        );
    }

    /// Scenario: N parallel submitters and cancellers against a single book.
    ///
    /// Crossing flow happens in a 490..=510 band. A canceller works far from
    /// the band (bids at 1..=10) so everything it cancels is still whole, and
    /// there are no market orders that could reach those levels. After
    /// joining, conservation must hold:
    ///
    ///   resting volume == placed - 2 * traded - cancelled
    ///
    /// (each trade consumes the fill quantity from both a maker and a taker).
    #[test]
    fn concurrent_submit_and_cancel_conserve_volume() {
        const ORDERS_PER_THREAD: u64 = 300;

        let ex = Exchange::default();
        let pair = ETH_USD;

        let (placed_total, cancelled_total) = std::thread::scope(|s| {
            let mut submitters = Vec::new();
            for t in 0..4u64 {
                let ex = &ex;
                submitters.push(s.spawn(move || {
                    let side = if t % 2 == 0 { Side::Buy } else { Side::Sell };
                    let mut placed = 0u64;
                    for i in 0..ORDERS_PER_THREAD {
                        // deterministic scatter inside the crossing band
                        let price = 490 + (i * 7 + t * 13) % 21;
                        let qty = 1 + (i + t) % 5;
                        ex.place_limit_order(&pair, side, price, qty, t).unwrap();
                        placed += qty;
                    }
                    placed
                }));
            }

            let canceller = {
                let ex = &ex;
                s.spawn(move || {
                    let mut placed = 0u64;
                    let mut cancelled = 0u64;
                    for i in 0..ORDERS_PER_THREAD {
                        let qty = 1 + i % 4;
                        let (id, trades) = ex
                            .place_limit_order(&pair, Side::Buy, 1 + i % 10, qty, 9)
                            .unwrap();
                        assert!(trades.is_empty(), "far bid must never cross");
                        placed += qty;
                        ex.cancel_order(&pair, id).unwrap();
                        cancelled += qty;
                    }
                    (placed, cancelled)
                })
            };

            let mut placed_total: u64 = submitters.into_iter().map(|h| h.join().unwrap()).sum();
            let (far_placed, cancelled_total) = canceller.join().unwrap();
            placed_total += far_placed;
            (placed_total, cancelled_total)
        });

        let traded: u64 = ex
            .trades(&pair)
            .unwrap()
            .iter()
            .map(|t| t.quantity)
            .sum();
        let resting =
            ex.volume(&pair, Side::Buy).unwrap() + ex.volume(&pair, Side::Sell).unwrap();

        assert_eq!(resting, placed_total - 2 * traded - cancelled_total);

        // the book is never crossed at rest
        if let (Ok(Some(bid)), Ok(Some(ask))) = (ex.best_bid(&pair), ex.best_ask(&pair)) {
            assert!(bid < ask, "crossed book after stress: {bid} >= {ask}");
        }

        // snapshot totals agree with the side queries
        let snap = ex.snapshot(&pair).unwrap();
        assert_eq!(
            snap.total_bid_volume,
            ex.volume(&pair, Side::Buy).unwrap()
        );
        assert_eq!(
            snap.total_ask_volume,
            ex.volume(&pair, Side::Sell).unwrap()
        );
    }
}
