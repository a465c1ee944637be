use arrayref::{array_ref, array_refs, mut_array_refs};
use static_assertions::const_assert_eq;

use crate::error::{require_data, Result, RiskError};
use crate::i80f48::I80F48;
use crate::state::mango_cache::PerpMarketCache;
use crate::state::market_info::PerpMarketInfo;

pub const PERP_ACCOUNT_SIZE: usize = 96;
const_assert_eq!(PERP_ACCOUNT_SIZE, 8 + 16 * 3 + 8 * 5);

/// An account's position in one perp market.
///
/// `quote_position` does not include funding that has accrued since the last
/// settlement; see `effective_quote_position`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PerpAccount {
    pub base_position: i64,     // measured in base lots
    pub quote_position: I80F48, // measured in native quote

    pub long_settled_funding: I80F48,
    pub short_settled_funding: I80F48,

    // orders related info
    pub bids_quantity: i64, // total contracts in buy orders
    pub asks_quantity: i64, // total contracts in sell orders

    /// Amount that's on EventQueue waiting to be processed
    pub taker_base: i64,
    pub taker_quote: i64,

    pub mngo_accrued: u64,
}

impl PerpAccount {
    pub fn unpack_from_slice(src: &[u8]) -> Result<Self> {
        require_data!(
            src.len() == PERP_ACCOUNT_SIZE,
            "perp account",
            "expected {} bytes, got {}",
            PERP_ACCOUNT_SIZE,
            src.len()
        );
        let src = array_ref![src, 0, PERP_ACCOUNT_SIZE];
        let (
            base_position,
            quote_position,
            long_settled_funding,
            short_settled_funding,
            bids_quantity,
            asks_quantity,
            taker_base,
            taker_quote,
            mngo_accrued,
        ) = array_refs![src, 8, 16, 16, 16, 8, 8, 8, 8, 8];
        Ok(Self {
            base_position: i64::from_le_bytes(*base_position),
            quote_position: I80F48::from_le_bytes(*quote_position),
            long_settled_funding: I80F48::from_le_bytes(*long_settled_funding),
            short_settled_funding: I80F48::from_le_bytes(*short_settled_funding),
            bids_quantity: i64::from_le_bytes(*bids_quantity),
            asks_quantity: i64::from_le_bytes(*asks_quantity),
            taker_base: i64::from_le_bytes(*taker_base),
            taker_quote: i64::from_le_bytes(*taker_quote),
            mngo_accrued: u64::from_le_bytes(*mngo_accrued),
        })
    }

    pub fn pack_into_slice(&self, dst: &mut [u8]) -> Result<()> {
        require_data!(
            dst.len() == PERP_ACCOUNT_SIZE,
            "perp account",
            "expected {} bytes, got {}",
            PERP_ACCOUNT_SIZE,
            dst.len()
        );
        let dst = arrayref::array_mut_ref![dst, 0, PERP_ACCOUNT_SIZE];
        let (
            base_position,
            quote_position,
            long_settled_funding,
            short_settled_funding,
            bids_quantity,
            asks_quantity,
            taker_base,
            taker_quote,
            mngo_accrued,
        ) = mut_array_refs![dst, 8, 16, 16, 16, 8, 8, 8, 8, 8];
        *base_position = self.base_position.to_le_bytes();
        *quote_position = self.quote_position.to_le_bytes();
        *long_settled_funding = self.long_settled_funding.to_le_bytes();
        *short_settled_funding = self.short_settled_funding.to_le_bytes();
        *bids_quantity = self.bids_quantity.to_le_bytes();
        *asks_quantity = self.asks_quantity.to_le_bytes();
        *taker_base = self.taker_base.to_le_bytes();
        *taker_quote = self.taker_quote.to_le_bytes();
        *mngo_accrued = self.mngo_accrued.to_le_bytes();
        Ok(())
    }

    pub fn has_open_orders(&self) -> bool {
        self.bids_quantity != 0
            || self.asks_quantity != 0
            || self.taker_base != 0
            || self.taker_quote != 0
    }

    /// Whether this position contributes anything to health.
    pub fn is_active(&self) -> bool {
        self.base_position != 0 || !self.quote_position.is_zero() || self.has_open_orders()
    }

    pub fn base_position_native(&self, market: &PerpMarketInfo) -> Result<I80F48> {
        market.base_lots_to_native(self.base_position)
    }

    /// Funding accrued since the last settlement, in native quote. Positive
    /// means the account owes it.
    pub fn unsettled_funding(&self, cache: &PerpMarketCache) -> Result<I80F48> {
        if self.base_position == 0 {
            return Ok(I80F48::ZERO);
        }
        let funding_delta = if self.base_position < 0 {
            cache.short_funding.checked_sub(self.short_settled_funding)?
        } else {
            cache.long_funding.checked_sub(self.long_settled_funding)?
        };
        funding_delta.checked_mul(I80F48::from(self.base_position))
    }

    /// Quote position after unsettled funding is paid.
    pub fn effective_quote_position(&self, cache: &PerpMarketCache) -> Result<I80F48> {
        self.quote_position
            .checked_sub(self.unsettled_funding(cache)?)
    }

    /// Returns a copy with all accrued funding moved into `quote_position`.
    pub fn settle_funding(&self, cache: &PerpMarketCache) -> Result<PerpAccount> {
        Ok(PerpAccount {
            quote_position: self.effective_quote_position(cache)?,
            long_settled_funding: cache.long_funding,
            short_settled_funding: cache.short_funding,
            ..*self
        })
    }

    /// Mark-to-market value of the position at `price` (native quote per
    /// native base).
    pub fn pnl(
        &self,
        market: &PerpMarketInfo,
        cache: &PerpMarketCache,
        price: I80F48,
    ) -> Result<I80F48> {
        let quote = self.effective_quote_position(cache)?;
        if self.base_position == 0 {
            return Ok(quote);
        }
        self.base_position_native(market)?
            .checked_mul(price)?
            .checked_add(quote)
    }

    /// Same as `pnl`: nothing is realized until settled against the quote bank.
    pub fn unsettled_pnl(
        &self,
        market: &PerpMarketInfo,
        cache: &PerpMarketCache,
        price: I80F48,
    ) -> Result<I80F48> {
        self.pnl(market, cache, price)
    }

    /// Health of the position if `base_change` lots were bought (positive) or
    /// sold (negative) at `price`, ignoring funding.
    pub fn sim_position_health(
        &self,
        market: &PerpMarketInfo,
        price: I80F48,
        asset_weight: I80F48,
        liab_weight: I80F48,
        base_change: i64,
    ) -> Result<I80F48> {
        let new_base = self
            .base_position
            .checked_add(self.taker_base)
            .and_then(|base| base.checked_add(base_change))
            .ok_or(RiskError::OutOfRange)?;
        let new_quote = self
            .quote_position
            .checked_add(market.quote_lots_to_native(self.taker_quote)?)?
            .checked_sub(market.base_lots_to_native(base_change)?.checked_mul(price)?)?;

        let weight = if new_base > 0 {
            asset_weight
        } else {
            liab_weight
        };
        market.base_lots_to_native(new_base)?
            .checked_mul(price)?
            .checked_mul(weight)?
            .checked_add(new_quote)
    }

    /// Weighted health of this position: the worse of all resting bids filling
    /// and all resting asks filling, minus unsettled funding.
    pub fn health_contribution(
        &self,
        market: &PerpMarketInfo,
        price: I80F48,
        asset_weight: I80F48,
        liab_weight: I80F48,
        cache: &PerpMarketCache,
    ) -> Result<I80F48> {
        let bids_health =
            self.sim_position_health(market, price, asset_weight, liab_weight, self.bids_quantity)?;
        let asks_health = self.sim_position_health(
            market,
            price,
            asset_weight,
            liab_weight,
            self.asks_quantity.checked_neg().ok_or(RiskError::OutOfRange)?,
        )?;
        bids_health
            .min(asks_health)
            .checked_sub(self.unsettled_funding(cache)?)
    }

    /// Non-negative part of the position: long base value plus positive
    /// effective quote.
    pub fn asset_value(
        &self,
        market: &PerpMarketInfo,
        price: I80F48,
        cache: &PerpMarketCache,
    ) -> Result<I80F48> {
        let mut assets = I80F48::ZERO;
        if self.base_position > 0 {
            assets = self.base_position_native(market)?.checked_mul(price)?;
        }
        let quote = self.effective_quote_position(cache)?;
        if quote.is_positive() {
            assets = assets.checked_add(quote)?;
        }
        Ok(assets)
    }

    /// Non-positive part of the position: short base value plus negative
    /// effective quote.
    pub fn liability_value(
        &self,
        market: &PerpMarketInfo,
        price: I80F48,
        cache: &PerpMarketCache,
    ) -> Result<I80F48> {
        let mut liabs = I80F48::ZERO;
        if self.base_position < 0 {
            liabs = self.base_position_native(market)?.checked_mul(price)?;
        }
        let quote = self.effective_quote_position(cache)?;
        if quote.is_negative() {
            liabs = liabs.checked_add(quote)?;
        }
        Ok(liabs)
    }
}
