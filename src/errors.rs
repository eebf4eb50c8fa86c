use thiserror::Error;

use crate::orders::OrderId;

/// Failures the engine reports to its caller. Nothing here is retried
/// internally and nothing is fatal to the engine.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    /// Submission with a non-positive quantity. No state was mutated.
    #[error("quantity must be > 0")]
    InvalidSize,

    /// Submission or query against a market the exchange does not carry.
    #[error("unknown market: {0}")]
    UnknownMarket(String),

    /// Cancel of an id that is not resting (never existed, already filled,
    /// or already cancelled).
    #[error("unknown order: {0}")]
    UnknownOrder(OrderId),

    /// Market order against an empty opposite side.
    #[error("insufficient liquidity")]
    InsufficientLiquidity,
}

#[derive(Debug, Error)]
pub enum MarketMakerError {
    #[error("websocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}
