use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;
use serde_derive::Deserialize;

use crate::state::{PerpMarketInfo, SpotMarketInfo};

fn default_cache_valid_interval() -> u64 {
    10
}

/// Market parameters for one group, usually loaded from a TOML file:
///
/// ```toml
/// cache_valid_interval = 5
///
/// [[perp_markets]]
/// name = "SOL-PERP"
/// market_index = 3
/// base_lot_size = 10000000
/// quote_lot_size = 100
/// maint_asset_weight = "0.95"
/// init_asset_weight = "0.9"
/// maint_liab_weight = "1.05"
/// init_liab_weight = "1.1"
/// ```
#[derive(Clone, Debug, Deserialize)]
pub struct RiskConfig {
    #[serde(default)]
    pub perp_markets: Vec<PerpMarketInfo>,
    #[serde(default)]
    pub spot_markets: Vec<SpotMarketInfo>,
    /// Seconds after which a cache entry counts as stale
    #[serde(default = "default_cache_valid_interval")]
    pub cache_valid_interval: u64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            perp_markets: vec![],
            spot_markets: vec![],
            cache_valid_interval: default_cache_valid_interval(),
        }
    }
}

impl RiskConfig {
    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let config: RiskConfig = toml::from_str(contents).context("parsing risk config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading risk config {}", path.display()))?;
        Self::from_toml_str(&contents).with_context(|| format!("in {}", path.display()))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let mut seen = HashSet::new();
        for market in self.perp_markets.iter() {
            market.validate()?;
            anyhow::ensure!(
                seen.insert(market.market_index),
                "duplicate perp market index {}",
                market.market_index
            );
        }
        seen.clear();
        for market in self.spot_markets.iter() {
            market.validate()?;
            anyhow::ensure!(
                seen.insert(market.market_index),
                "duplicate spot market index {}",
                market.market_index
            );
        }
        Ok(())
    }

    pub fn perp_market(&self, market_index: usize) -> Option<&PerpMarketInfo> {
        self.perp_markets
            .iter()
            .find(|m| m.market_index == market_index)
    }

    pub fn spot_market(&self, market_index: usize) -> Option<&SpotMarketInfo> {
        self.spot_markets
            .iter()
            .find(|m| m.market_index == market_index)
    }
}
