use serde_derive::Deserialize;

use crate::error::{require_data, Result};
use crate::health::HealthType;
use crate::i80f48::I80F48;
use crate::state::MAX_PAIRS;

/// Risk parameters of one perp market.
///
/// These live in the group account on chain; here they are supplied per call
/// (usually via `RiskConfig`).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct PerpMarketInfo {
    pub name: String,
    pub market_index: usize,
    // number of native base units that make up one base lot
    pub base_lot_size: i64,
    // number of native quote units that make up one quote lot (min tick)
    pub quote_lot_size: i64,
    pub maint_asset_weight: I80F48,
    pub init_asset_weight: I80F48,
    pub maint_liab_weight: I80F48,
    pub init_liab_weight: I80F48,
    #[serde(default)]
    pub liquidation_fee: I80F48,
    #[serde(default)]
    pub maker_fee: I80F48,
    #[serde(default)]
    pub taker_fee: I80F48,
    #[serde(default)]
    pub base_decimals: u8,
}

impl PerpMarketInfo {
    pub fn validate(&self) -> Result<()> {
        require_data!(
            self.market_index < MAX_PAIRS,
            "perp market info",
            "market index {} of {} out of range",
            self.market_index,
            self.name
        );
        require_data!(
            self.base_lot_size > 0 && self.quote_lot_size > 0,
            "perp market info",
            "lot sizes of {} must be positive",
            self.name
        );
        Ok(())
    }

    /// (asset_weight, liab_weight) for the given health type
    pub fn weights(&self, health_type: HealthType) -> (I80F48, I80F48) {
        match health_type {
            HealthType::Init => (self.init_asset_weight, self.init_liab_weight),
            HealthType::Maint => (self.maint_asset_weight, self.maint_liab_weight),
        }
    }

    /// Convert from the price stored on the book to the price used in value calculations
    pub fn lot_to_native_price(&self, price: i64) -> Result<I80F48> {
        I80F48::from(price)
            .checked_mul(I80F48::from(self.quote_lot_size))?
            .checked_div(I80F48::from(self.base_lot_size))
    }

    /// Native base amount of `base_lots`, lifted exactly into fixed point.
    pub fn base_lots_to_native(&self, base_lots: i64) -> Result<I80F48> {
        I80F48::from_integer(base_lots as i128 * self.base_lot_size as i128)
    }

    pub fn quote_lots_to_native(&self, quote_lots: i64) -> Result<I80F48> {
        I80F48::from_integer(quote_lots as i128 * self.quote_lot_size as i128)
    }
}

/// Risk parameters of one spot token.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct SpotMarketInfo {
    pub name: String,
    pub market_index: usize,
    pub maint_asset_weight: I80F48,
    pub init_asset_weight: I80F48,
    pub maint_liab_weight: I80F48,
    pub init_liab_weight: I80F48,
    #[serde(default)]
    pub liquidation_fee: I80F48,
    #[serde(default)]
    pub decimals: u8,
}

impl SpotMarketInfo {
    pub fn validate(&self) -> Result<()> {
        require_data!(
            self.market_index < MAX_PAIRS,
            "spot market info",
            "market index {} of {} out of range",
            self.market_index,
            self.name
        );
        Ok(())
    }

    pub fn weights(&self, health_type: HealthType) -> (I80F48, I80F48) {
        match health_type {
            HealthType::Init => (self.init_asset_weight, self.init_liab_weight),
            HealthType::Maint => (self.maint_asset_weight, self.maint_liab_weight),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;

    pub fn perp_market(base_lot_size: i64, quote_lot_size: i64) -> PerpMarketInfo {
        PerpMarketInfo {
            name: "TEST-PERP".into(),
            market_index: 0,
            base_lot_size,
            quote_lot_size,
            maint_asset_weight: "0.95".parse().unwrap(),
            init_asset_weight: "0.9".parse().unwrap(),
            maint_liab_weight: "1.05".parse().unwrap(),
            init_liab_weight: "1.1".parse().unwrap(),
            liquidation_fee: "0.025".parse().unwrap(),
            maker_fee: I80F48::ZERO,
            taker_fee: "0.0005".parse().unwrap(),
            base_decimals: 6,
        }
    }

    pub fn spot_market(asset_weight: &str, liab_weight: &str) -> SpotMarketInfo {
        let asset_weight: I80F48 = asset_weight.parse().unwrap();
        let liab_weight: I80F48 = liab_weight.parse().unwrap();
        SpotMarketInfo {
            name: "TEST".into(),
            market_index: 0,
            maint_asset_weight: asset_weight,
            init_asset_weight: asset_weight,
            maint_liab_weight: liab_weight,
            init_liab_weight: liab_weight,
            liquidation_fee: I80F48::ZERO,
            decimals: 6,
        }
    }
}
