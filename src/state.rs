use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::exchange::Exchange;
use crate::instrument::Pair;
use crate::trade::Trade;

/// A trade together with the market it printed in, for market-data fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    pub pair: Pair,
    #[serde(flatten)]
    pub trade: Trade,
}

/// Shared state behind the HTTP/WS gateway.
///
/// The broadcast channels carry market data to websocket subscribers; the
/// gateway publishes into them only after the book lock has been released.
#[derive(Clone)]
pub struct AppState {
    pub exchange: Arc<Exchange>,
    pub trade_tx: broadcast::Sender<TradeEvent>,
    pub book_tx: broadcast::Sender<Pair>,
}

impl AppState {
    pub fn new() -> Self {
        let (trade_tx, _) = broadcast::channel(1024);
        let (book_tx, _) = broadcast::channel(1024);
        AppState {
            exchange: Arc::new(Exchange::default()),
            trade_tx,
            book_tx,
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        AppState::new()
    }
}
