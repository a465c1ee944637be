use arrayref::{array_ref, array_refs, mut_array_refs};
use static_assertions::const_assert_eq;

use crate::error::{require_data, Result};
use crate::i80f48::I80F48;
use crate::state::metadata::{DataType, MetaData, METADATA_SIZE};
use crate::state::{MAX_PAIRS, MAX_TOKENS, QUOTE_INDEX};

const PRICE_CACHE_SIZE: usize = 24;
const ROOT_BANK_CACHE_SIZE: usize = 40;
const PERP_MARKET_CACHE_SIZE: usize = 40;
pub const MANGO_CACHE_SIZE: usize = METADATA_SIZE
    + MAX_PAIRS * PRICE_CACHE_SIZE
    + MAX_TOKENS * ROOT_BANK_CACHE_SIZE
    + MAX_PAIRS * PERP_MARKET_CACHE_SIZE;
const_assert_eq!(MANGO_CACHE_SIZE, 1608);

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PriceCache {
    pub price: I80F48, // unit is interpreted as how many quote native tokens for 1 base native token
    pub last_update: u64,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct RootBankCache {
    pub deposit_index: I80F48,
    pub borrow_index: I80F48,
    pub last_update: u64,
}

/// Cumulative funding per contract, updated by the keeper.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PerpMarketCache {
    pub long_funding: I80F48,
    pub short_funding: I80F48,
    pub last_update: u64,
}

impl PriceCache {
    fn unpack(src: &[u8; PRICE_CACHE_SIZE]) -> Self {
        let (price, last_update) = array_refs![src, 16, 8];
        Self {
            price: I80F48::from_le_bytes(*price),
            last_update: u64::from_le_bytes(*last_update),
        }
    }

    fn pack_into(&self, dst: &mut [u8; PRICE_CACHE_SIZE]) {
        let (price, last_update) = mut_array_refs![dst, 16, 8];
        *price = self.price.to_le_bytes();
        *last_update = self.last_update.to_le_bytes();
    }
}

impl RootBankCache {
    fn unpack(src: &[u8; ROOT_BANK_CACHE_SIZE]) -> Self {
        let (deposit_index, borrow_index, last_update) = array_refs![src, 16, 16, 8];
        Self {
            deposit_index: I80F48::from_le_bytes(*deposit_index),
            borrow_index: I80F48::from_le_bytes(*borrow_index),
            last_update: u64::from_le_bytes(*last_update),
        }
    }

    fn pack_into(&self, dst: &mut [u8; ROOT_BANK_CACHE_SIZE]) {
        let (deposit_index, borrow_index, last_update) = mut_array_refs![dst, 16, 16, 8];
        *deposit_index = self.deposit_index.to_le_bytes();
        *borrow_index = self.borrow_index.to_le_bytes();
        *last_update = self.last_update.to_le_bytes();
    }
}

impl PerpMarketCache {
    fn unpack(src: &[u8; PERP_MARKET_CACHE_SIZE]) -> Self {
        let (long_funding, short_funding, last_update) = array_refs![src, 16, 16, 8];
        Self {
            long_funding: I80F48::from_le_bytes(*long_funding),
            short_funding: I80F48::from_le_bytes(*short_funding),
            last_update: u64::from_le_bytes(*last_update),
        }
    }

    fn pack_into(&self, dst: &mut [u8; PERP_MARKET_CACHE_SIZE]) {
        let (long_funding, short_funding, last_update) = mut_array_refs![dst, 16, 16, 8];
        *long_funding = self.long_funding.to_le_bytes();
        *short_funding = self.short_funding.to_le_bytes();
        *last_update = self.last_update.to_le_bytes();
    }
}

/// Which markets of an account contribute to health and therefore need fresh
/// cache entries.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct UserActiveAssets {
    pub spot: [bool; MAX_PAIRS],
    pub perps: [bool; MAX_PAIRS],
}

/// Prices, bank indexes and funding for every market of a group, all taken
/// from one snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MangoCache {
    pub meta_data: MetaData,

    pub price_cache: [PriceCache; MAX_PAIRS],
    pub root_bank_cache: [RootBankCache; MAX_TOKENS],
    pub perp_market_cache: [PerpMarketCache; MAX_PAIRS],
}

impl Default for MangoCache {
    fn default() -> Self {
        Self {
            meta_data: MetaData::new(DataType::MangoCache, 0, true),
            price_cache: [PriceCache::default(); MAX_PAIRS],
            root_bank_cache: [RootBankCache::default(); MAX_TOKENS],
            perp_market_cache: [PerpMarketCache::default(); MAX_PAIRS],
        }
    }
}

impl MangoCache {
    pub fn decode(data: &[u8]) -> Result<Self> {
        require_data!(
            data.len() == MANGO_CACHE_SIZE,
            "mango cache",
            "expected {} bytes, got {}",
            MANGO_CACHE_SIZE,
            data.len()
        );
        let data = array_ref![data, 0, MANGO_CACHE_SIZE];
        let (meta, prices, root_banks, perp_markets) = array_refs![
            data,
            METADATA_SIZE,
            MAX_PAIRS * PRICE_CACHE_SIZE,
            MAX_TOKENS * ROOT_BANK_CACHE_SIZE,
            MAX_PAIRS * PERP_MARKET_CACHE_SIZE
        ];
        let meta_data = MetaData::unpack_checked(meta, DataType::MangoCache, "mango cache")?;

        let mut cache = Self {
            meta_data,
            ..Self::default()
        };
        for (entry, chunk) in cache
            .price_cache
            .iter_mut()
            .zip(prices.chunks_exact(PRICE_CACHE_SIZE))
        {
            *entry = PriceCache::unpack(array_ref![chunk, 0, PRICE_CACHE_SIZE]);
        }
        for (entry, chunk) in cache
            .root_bank_cache
            .iter_mut()
            .zip(root_banks.chunks_exact(ROOT_BANK_CACHE_SIZE))
        {
            *entry = RootBankCache::unpack(array_ref![chunk, 0, ROOT_BANK_CACHE_SIZE]);
        }
        for (entry, chunk) in cache
            .perp_market_cache
            .iter_mut()
            .zip(perp_markets.chunks_exact(PERP_MARKET_CACHE_SIZE))
        {
            *entry = PerpMarketCache::unpack(array_ref![chunk, 0, PERP_MARKET_CACHE_SIZE]);
        }
        Ok(cache)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = vec![0u8; MANGO_CACHE_SIZE];
        let dst = arrayref::array_mut_ref![data, 0, MANGO_CACHE_SIZE];
        let (meta, prices, root_banks, perp_markets) = mut_array_refs![
            dst,
            METADATA_SIZE,
            MAX_PAIRS * PRICE_CACHE_SIZE,
            MAX_TOKENS * ROOT_BANK_CACHE_SIZE,
            MAX_PAIRS * PERP_MARKET_CACHE_SIZE
        ];
        self.meta_data.pack_into(meta);
        for (entry, chunk) in self
            .price_cache
            .iter()
            .zip(prices.chunks_exact_mut(PRICE_CACHE_SIZE))
        {
            entry.pack_into(arrayref::array_mut_ref![chunk, 0, PRICE_CACHE_SIZE]);
        }
        for (entry, chunk) in self
            .root_bank_cache
            .iter()
            .zip(root_banks.chunks_exact_mut(ROOT_BANK_CACHE_SIZE))
        {
            entry.pack_into(arrayref::array_mut_ref![chunk, 0, ROOT_BANK_CACHE_SIZE]);
        }
        for (entry, chunk) in self
            .perp_market_cache
            .iter()
            .zip(perp_markets.chunks_exact_mut(PERP_MARKET_CACHE_SIZE))
        {
            entry.pack_into(arrayref::array_mut_ref![chunk, 0, PERP_MARKET_CACHE_SIZE]);
        }
        data
    }

    /// Price of token `index` in native quote per native base; the quote
    /// token is always 1.
    pub fn get_price(&self, index: usize) -> I80F48 {
        if index == QUOTE_INDEX {
            I80F48::ONE
        } else {
            self.price_cache[index].price
        }
    }

    /// Whether every cache entry the active assets depend on was updated within
    /// `valid_interval` seconds of `now_ts`.
    pub fn check_valid(
        &self,
        active_assets: &UserActiveAssets,
        now_ts: u64,
        valid_interval: u64,
    ) -> bool {
        let fresh = |last_update: u64| last_update >= now_ts.saturating_sub(valid_interval);
        for i in 0..MAX_PAIRS {
            if active_assets.spot[i]
                && (!fresh(self.price_cache[i].last_update)
                    || !fresh(self.root_bank_cache[i].last_update))
            {
                tracing::trace!(market_index = i, "stale spot cache");
                return false;
            }
            if active_assets.perps[i]
                && (!fresh(self.price_cache[i].last_update)
                    || !fresh(self.perp_market_cache[i].last_update))
            {
                tracing::trace!(market_index = i, "stale perp cache");
                return false;
            }
        }
        fresh(self.root_bank_cache[QUOTE_INDEX].last_update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_cache() -> MangoCache {
        let mut cache = MangoCache::default();
        cache.price_cache[0] = PriceCache {
            price: "21.5".parse().unwrap(),
            last_update: 100,
        };
        cache.root_bank_cache[0] = RootBankCache {
            deposit_index: "1.01".parse().unwrap(),
            borrow_index: "1.05".parse().unwrap(),
            last_update: 100,
        };
        cache.root_bank_cache[QUOTE_INDEX] = RootBankCache {
            deposit_index: I80F48::ONE,
            borrow_index: I80F48::ONE,
            last_update: 100,
        };
        cache.perp_market_cache[3] = PerpMarketCache {
            long_funding: "12.25".parse().unwrap(),
            short_funding: "-3.5".parse().unwrap(),
            last_update: 90,
        };
        cache
    }

    #[test]
    fn test_cache_layout() {
        let cache = sample_cache();
        let bytes = cache.to_bytes();
        assert_eq!(bytes.len(), 1608);
        assert_eq!(bytes[0], 7);
        // first price entry right after the metadata
        assert_eq!(
            I80F48::from_le_slice(&bytes[8..24]).unwrap(),
            "21.5".parse::<I80F48>().unwrap()
        );
        // perp market 3 long funding
        let offset = 8 + 360 + 640 + 3 * 40;
        assert_eq!(
            I80F48::from_le_slice(&bytes[offset..offset + 16]).unwrap(),
            "12.25".parse::<I80F48>().unwrap()
        );
        assert_eq!(MangoCache::decode(&bytes).unwrap(), cache);
    }

    #[test]
    fn test_cache_decode_errors() {
        let mut bytes = sample_cache().to_bytes();
        assert!(MangoCache::decode(&bytes[1..]).is_err());
        bytes[0] = 1;
        assert!(MangoCache::decode(&bytes).is_err());
    }

    #[test]
    fn test_quote_price_is_one() {
        let cache = sample_cache();
        assert_eq!(cache.get_price(QUOTE_INDEX), I80F48::ONE);
        assert_eq!(cache.get_price(0), "21.5".parse::<I80F48>().unwrap());
    }

    #[test]
    fn test_check_valid() {
        let cache = sample_cache();
        let mut active = UserActiveAssets::default();
        assert!(cache.check_valid(&active, 105, 10));
        assert!(!cache.check_valid(&active, 111, 10));

        active.spot[0] = true;
        assert!(cache.check_valid(&active, 105, 10));

        // perp 3 needs a fresh price for market 3 too, which was never set
        active.perps[3] = true;
        assert!(!cache.check_valid(&active, 105, 10));
    }
}
