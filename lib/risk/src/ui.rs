//! Conversions to human readable floats for display.
//!
//! All of these are lossy. Nothing in `health` or `state` may depend on them.

use crate::i80f48::I80F48;
use crate::state::{BookLevel, PerpMarketInfo};

pub fn base_lots_to_ui(base_lots: i64, base_decimals: u8, base_lot_size: i64) -> f64 {
    base_lots as f64 * base_lot_size as f64 / 10f64.powi(base_decimals.into())
}

pub fn price_lots_to_ui(
    price_lots: i64,
    base_decimals: u8,
    quote_decimals: u8,
    base_lot_size: i64,
    quote_lot_size: i64,
) -> f64 {
    // f64 throughout: the integer products overflow for large lots or decimals
    let left = price_lots as f64 * quote_lot_size as f64 * 10f64.powi(base_decimals.into());
    let right = base_lot_size as f64 * 10f64.powi(quote_decimals.into());

    left / right
}

pub fn native_to_ui(native: I80F48, decimals: u8) -> f64 {
    native.to_f64_lossy() / 10f64.powi(decimals.into())
}

/// (price, size) of a book level in ui units
pub fn level_to_ui(level: &BookLevel, market: &PerpMarketInfo, quote_decimals: u8) -> (f64, f64) {
    (
        price_lots_to_ui(
            level.price_lots,
            market.base_decimals,
            quote_decimals,
            market.base_lot_size,
            market.quote_lot_size,
        ),
        base_lots_to_ui(level.size_lots, market.base_decimals, market.base_lot_size),
    )
}
