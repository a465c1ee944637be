pub use mango_account::*;
pub use mango_cache::*;
pub use market_info::*;
pub use metadata::*;
pub use orderbook::*;
pub use perp_account::*;

pub mod mango_account;
pub mod mango_cache;
pub mod market_info;
pub mod metadata;
pub mod orderbook;
pub mod perp_account;

/// Number of markets (spot and perp share indexes).
pub const MAX_PAIRS: usize = 15;
/// Number of tokens: one per market plus the quote token.
pub const MAX_TOKENS: usize = MAX_PAIRS + 1;
pub const QUOTE_INDEX: usize = MAX_TOKENS - 1;
