//! Client side risk engine for Mango margin accounts: fixed point math,
//! order book decoding and traversal, perp position valuation and whole
//! account health.

pub use config::RiskConfig;
pub use error::{Result, RiskError};
pub use fetch::*;
pub use i80f48::I80F48;

pub mod config;
pub mod error;
mod fetch;
pub mod health;
pub mod i80f48;
pub mod state;
pub mod ui;
