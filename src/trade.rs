use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use crate::orders::{OrderId, Price, Quantity, Side};

/// A trade is a matched transaction between two orders.
///
/// - The price comes from the maker's level (i.e. the resting order)
/// - `quantity` is the amount filled
/// - the taker is the incoming order that triggered the trade
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub price: Price,
    pub quantity: Quantity,
    /// Side of the aggressor.
    pub taker_side: Side,
    pub maker_id: OrderId,
    pub taker_id: OrderId,
    pub timestamp: SystemTime,
}
