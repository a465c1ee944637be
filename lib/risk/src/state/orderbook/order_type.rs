use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Order type stored on a resting leaf. Only `Limit`, `PostOnly` and
/// `PostOnlySlide` orders ever rest on a book, the others are accepted so any
/// snapshot decodes.
#[derive(Eq, PartialEq, Copy, Clone, TryFromPrimitive, IntoPrimitive, Debug)]
#[repr(u8)]
pub enum OrderType {
    Limit = 0,
    ImmediateOrCancel = 1,
    PostOnly = 2,
    Market = 3,
    PostOnlySlide = 4,
}

#[derive(Eq, PartialEq, Copy, Clone, TryFromPrimitive, IntoPrimitive, Debug)]
#[repr(u8)]
pub enum Side {
    Bid = 0,
    Ask = 1,
}

impl Side {
    /// Is `price_a` a better price than `price_b` from this side's point of view?
    pub fn is_price_better(self, price_a: i64, price_b: i64) -> bool {
        match self {
            Side::Bid => price_a > price_b,
            Side::Ask => price_a < price_b,
        }
    }
}
