use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Order identifier, assigned monotonically by the book that accepts the order.
pub type OrderId = u64;
/// Opaque external user identifier; the engine never interprets it.
pub type UserId = u64;
/// Price in integer ticks. Canonical key of a price level.
pub type Price = u64;
/// Quantity in base units.
pub type Quantity = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,  //bid
    Sell, //ask
}

impl Side {
    /// The side an incoming order matches against.
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    Market,
}

/// A unit of work in the book.
///
/// `quantity` is the *residual* size: it only ever decreases, and reaches zero
/// exactly when the order is fully filled. Whether the order was submitted as
/// a limit or market order is a property of the submission call, not of the
/// order itself: the book stores one order shape and resting orders take
/// their price from the level holding them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub side: Side,
    /// Remaining unfilled quantity. Strictly positive while the order rests.
    pub quantity: Quantity,
    pub timestamp: SystemTime,
}

impl Order {
    pub fn new(id: OrderId, user_id: UserId, side: Side, quantity: Quantity) -> Self {
        Order {
            id,
            user_id,
            side,
            quantity,
            timestamp: SystemTime::now(),
        }
    }

    pub fn is_filled(&self) -> bool {
        self.quantity == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opposite_side_flips() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite(), Side::Buy);
    }

    #[test]
    fn fresh_order_is_not_filled() {
        let mut o = Order::new(1, 7, Side::Buy, 5);
        assert!(!o.is_filled());
        o.quantity = 0;
        assert!(o.is_filled());
    }
}
