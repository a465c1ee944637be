use std::collections::HashMap;

use solana_program::pubkey::Pubkey;
use tracing::{debug, warn};

use crate::config::RiskConfig;
use crate::error::{Result, RiskError};
use crate::i80f48::I80F48;
use crate::state::{
    MangoAccount, MangoCache, PerpAccount, PerpMarketCache, PerpMarketInfo, SpotMarketInfo,
    MAX_PAIRS, QUOTE_INDEX,
};

/// There are two types of health, initial health used for opening new positions and maintenance
/// health used for liquidations. They are both calculated as a weighted sum of the assets
/// minus the liabilities but the maint. health uses slightly larger weights for assets and
/// slightly smaller weights for the liabilities. Zero is used as the bright line for both
/// i.e. if your init health falls below zero, you cannot open new positions and if your maint. health
/// falls below zero you will be liquidated.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum HealthType {
    Init,
    Maint,
}

/// Where an account stands with respect to liquidation.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum AccountHealthState {
    Healthy,
    /// maint health is negative
    Liquidatable,
    /// liabilities exceed assets even with all collateral seized
    Bankrupt,
}

/// Funds sitting in a spot market's open orders account, in native units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OpenOrdersBalances {
    pub base_total: I80F48,
    pub quote_total: I80F48,
}

/// A spot token balance with the parameters to weigh it.
#[derive(Clone, Debug)]
pub struct SpotInfo {
    pub market: SpotMarketInfo,
    pub price: I80F48,
    /// native token units, negative for borrows
    pub balance: I80F48,
}

impl SpotInfo {
    #[inline(always)]
    pub fn health_contribution(&self, health_type: HealthType) -> Result<I80F48> {
        let (asset_weight, liab_weight) = self.market.weights(health_type);
        let weight = if self.balance.is_negative() {
            liab_weight
        } else {
            asset_weight
        };
        self.balance.checked_mul(self.price)?.checked_mul(weight)
    }

    pub fn value(&self) -> Result<I80F48> {
        self.balance.checked_mul(self.price)
    }
}

/// A perp position with the market parameters, price and funding to value it.
#[derive(Clone, Debug)]
pub struct PerpInfo {
    pub market: PerpMarketInfo,
    pub price: I80F48,
    pub funding: PerpMarketCache,
    pub account: PerpAccount,
}

impl PerpInfo {
    #[inline(always)]
    pub fn health_contribution(&self, health_type: HealthType) -> Result<I80F48> {
        let (asset_weight, liab_weight) = self.market.weights(health_type);
        self.account.health_contribution(
            &self.market,
            self.price,
            asset_weight,
            liab_weight,
            &self.funding,
        )
    }

    pub fn assets_and_liabs(&self) -> Result<(I80F48, I80F48)> {
        let assets = self
            .account
            .asset_value(&self.market, self.price, &self.funding)?;
        let liabs = self
            .account
            .liability_value(&self.market, self.price, &self.funding)?;
        Ok((assets, liabs))
    }
}

/// Everything needed to compute the health of one account from one snapshot.
///
/// Health is the weighted sum of the quote balance, every spot balance and
/// every perp position's health contribution. It can be negative.
#[derive(Clone, Debug)]
pub struct HealthCache {
    pub spot_infos: Vec<SpotInfo>,
    pub perp_infos: Vec<PerpInfo>,
    /// native quote, weight 1
    pub quote_balance: I80F48,
    pub being_liquidated: bool,
}

impl HealthCache {
    pub fn new(perp_infos: Vec<PerpInfo>, spot_infos: Vec<SpotInfo>, quote_balance: I80F48) -> Self {
        Self {
            spot_infos,
            perp_infos,
            quote_balance,
            being_liquidated: false,
        }
    }

    /// Collects every active spot balance and perp position of `account`.
    ///
    /// `open_orders` holds the spot open orders balances by market index; markets
    /// without an entry count as having none.
    pub fn from_account(
        account: &MangoAccount,
        cache: &MangoCache,
        config: &RiskConfig,
        open_orders: &HashMap<usize, OpenOrdersBalances>,
    ) -> Result<Self> {
        let mut quote_balance =
            account.native_balance(QUOTE_INDEX, &cache.root_bank_cache[QUOTE_INDEX])?;
        let mut spot_infos = vec![];
        let mut perp_infos = vec![];

        for i in 0..MAX_PAIRS {
            let oo = open_orders.get(&i).copied().unwrap_or_default();
            quote_balance = quote_balance.checked_add(oo.quote_total)?;

            let base_balance = account
                .native_balance(i, &cache.root_bank_cache[i])?
                .checked_add(oo.base_total)?;
            if account.in_margin_basket[i] || !base_balance.is_zero() {
                let market = config
                    .spot_market(i)
                    .ok_or(RiskError::InactiveMarket(i))?;
                spot_infos.push(SpotInfo {
                    market: market.clone(),
                    price: cache.get_price(i),
                    balance: base_balance,
                });
            }

            let perp_account = &account.perp_accounts[i];
            if perp_account.is_active() {
                let market = config
                    .perp_market(i)
                    .ok_or(RiskError::InactiveMarket(i))?;
                perp_infos.push(PerpInfo {
                    market: market.clone(),
                    price: cache.get_price(i),
                    funding: cache.perp_market_cache[i],
                    account: *perp_account,
                });
            }
        }

        Ok(Self {
            spot_infos,
            perp_infos,
            quote_balance,
            being_liquidated: account.being_liquidated,
        })
    }

    fn contributions(&self, health_type: HealthType) -> impl Iterator<Item = Result<I80F48>> + '_ {
        std::iter::once(Ok(self.quote_balance))
            .chain(
                self.spot_infos
                    .iter()
                    .map(move |info| info.health_contribution(health_type)),
            )
            .chain(
                self.perp_infos
                    .iter()
                    .map(move |info| info.health_contribution(health_type)),
            )
    }

    pub fn health(&self, health_type: HealthType) -> Result<I80F48> {
        self.contributions(health_type)
            .try_fold(I80F48::ZERO, |health, contribution| {
                health.checked_add(contribution?)
            })
    }

    /// Sum of positive and of negative (as a positive number) health contributions.
    pub fn weighted_assets_and_liabs(&self, health_type: HealthType) -> Result<(I80F48, I80F48)> {
        let mut assets = I80F48::ZERO;
        let mut liabs = I80F48::ZERO;
        for contribution in self.contributions(health_type) {
            let contribution = contribution?;
            if contribution.is_negative() {
                liabs = liabs.checked_sub(contribution)?;
            } else {
                assets = assets.checked_add(contribution)?;
            }
        }
        Ok((assets, liabs))
    }

    /// The health ratio is
    /// - 0 if health is 0 - meaning assets = liabs
    /// - 100 if there's 2x as many assets as liabs
    /// - 200 if there's 3x as many assets as liabs
    /// - MAX if liabs = 0
    ///
    /// Fails with OutOfRange when the ratio itself does not fit, e.g. for
    /// dust liabilities against large assets.
    pub fn health_ratio(&self, health_type: HealthType) -> Result<I80F48> {
        let (assets, liabs) = self.weighted_assets_and_liabs(health_type)?;
        if !liabs.is_positive() {
            return Ok(I80F48::MAX);
        }
        assets
            .checked_sub(liabs)?
            .checked_mul_div(I80F48::from(100), liabs)
    }

    /// Computes the account assets and liabilities marked to market.
    ///
    /// Contrary to weighted_assets_and_liabs, there's no health weighing and
    /// resting orders are ignored.
    ///
    /// Returns (assets, liabilities), both non-negative.
    pub fn assets_and_liabs(&self) -> Result<(I80F48, I80F48)> {
        self.balance_sheet(|spot_info| spot_info.value())
    }

    fn balance_sheet(
        &self,
        spot_value: impl Fn(&SpotInfo) -> Result<I80F48>,
    ) -> Result<(I80F48, I80F48)> {
        let mut assets = I80F48::ZERO;
        let mut liabs = I80F48::ZERO;

        if self.quote_balance.is_negative() {
            liabs = liabs.checked_sub(self.quote_balance)?;
        } else {
            assets = assets.checked_add(self.quote_balance)?;
        }

        for spot_info in self.spot_infos.iter() {
            let value = spot_value(spot_info)?;
            if value.is_negative() {
                liabs = liabs.checked_sub(value)?;
            } else {
                assets = assets.checked_add(value)?;
            }
        }

        for perp_info in self.perp_infos.iter() {
            let (perp_assets, perp_liabs) = perp_info.assets_and_liabs()?;
            assets = assets.checked_add(perp_assets)?;
            liabs = liabs.checked_sub(perp_liabs)?;
        }

        Ok((assets, liabs))
    }

    /// Computes the account leverage as ratio of liabs / (assets - liabs)
    ///
    /// The goal of this function is to provide a quick overview over the accounts balance sheet.
    /// It's not used to make margin decisions. Use health_ratio to make risk decisions.
    pub fn leverage(&self) -> Result<I80F48> {
        let (assets, liabs) = self.assets_and_liabs()?;
        let min_equity = I80F48::from_bits(I80F48::ONE.to_bits() / 1000);
        let equity = assets.checked_sub(liabs)?.max(min_equity);
        liabs.checked_div(equity)
    }

    pub fn is_liquidatable(&self) -> Result<bool> {
        Ok(self.health(HealthType::Maint)?.is_negative())
    }

    /// Balance sheet used for bankruptcy: spot balances carry their maint
    /// weights, quote and perp values are taken at mark. Resting orders are
    /// ignored.
    ///
    /// Perp base positions are not weighted: a seized perp position is closed
    /// against the quote balance at the cache price, so it realizes its mark
    /// value. Maint weights only haircut spot collateral, which has to be sold.
    /// Weighting perps too would make this sheet equal to maint health minus
    /// resting orders, and `Liquidatable` would collapse into `Bankrupt`.
    pub fn maint_assets_and_liabs(&self) -> Result<(I80F48, I80F48)> {
        self.balance_sheet(|spot_info| spot_info.health_contribution(HealthType::Maint))
    }

    /// Liabilities exceed maint weighted assets: seizing all collateral would
    /// not cover the debt.
    pub fn is_bankrupt(&self) -> Result<bool> {
        let (assets, liabs) = self.maint_assets_and_liabs()?;
        Ok(liabs > assets)
    }

    pub fn state(&self) -> Result<AccountHealthState> {
        Ok(if self.is_bankrupt()? {
            AccountHealthState::Bankrupt
        } else if self.is_liquidatable()? {
            AccountHealthState::Liquidatable
        } else {
            AccountHealthState::Healthy
        })
    }

    pub fn has_perp_open_orders(&self) -> bool {
        self.perp_infos.iter().any(|p| p.account.has_open_orders())
    }

    pub fn has_spot_borrows(&self) -> bool {
        self.quote_balance.is_negative() || self.spot_infos.iter().any(|s| s.balance.is_negative())
    }
}

/// Summary of one account's health.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccountHealthReport {
    pub address: Pubkey,
    pub init_health: I80F48,
    pub maint_health: I80F48,
    pub maint_health_ratio: I80F48,
    pub state: AccountHealthState,
}

fn evaluate(
    address: &Pubkey,
    account: &MangoAccount,
    cache: &MangoCache,
    config: &RiskConfig,
) -> Result<AccountHealthReport> {
    let health_cache = HealthCache::from_account(account, cache, config, &HashMap::new())?;
    Ok(AccountHealthReport {
        address: *address,
        init_health: health_cache.health(HealthType::Init)?,
        maint_health: health_cache.health(HealthType::Maint)?,
        maint_health_ratio: health_cache.health_ratio(HealthType::Maint)?,
        state: health_cache.state()?,
    })
}

/// Evaluates many accounts against one cache snapshot. Accounts whose health
/// cannot be computed are logged and skipped. Spot open orders funds are not
/// counted.
pub fn scan_accounts<'a>(
    accounts: impl IntoIterator<Item = (&'a Pubkey, &'a MangoAccount)>,
    cache: &MangoCache,
    config: &RiskConfig,
) -> Vec<AccountHealthReport> {
    accounts
        .into_iter()
        .filter_map(|(address, account)| {
            match evaluate(address, account, cache, config) {
                Ok(report) => {
                    debug!(%address, state = ?report.state, maint_health = %report.maint_health, "evaluated");
                    Some(report)
                }
                Err(err) => {
                    warn!(%address, "skipping account: {err}");
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::market_info::test_util::{perp_market, spot_market};
    use crate::state::{PriceCache, RootBankCache};

    fn fp(s: &str) -> I80F48 {
        s.parse().unwrap()
    }

    // weights that are exact in binary so expected values can be written down
    fn exact_perp_market(market_index: usize) -> PerpMarketInfo {
        PerpMarketInfo {
            market_index,
            maint_asset_weight: fp("0.875"),
            init_asset_weight: fp("0.75"),
            maint_liab_weight: fp("1.125"),
            init_liab_weight: fp("1.25"),
            ..perp_market(1, 1)
        }
    }

    fn exact_spot_market(market_index: usize) -> SpotMarketInfo {
        SpotMarketInfo {
            market_index,
            ..spot_market("0.75", "1.25")
        }
    }

    fn sample_cache(quote_balance: i64) -> HealthCache {
        let spot = SpotInfo {
            market: exact_spot_market(0),
            price: I80F48::from(10),
            balance: I80F48::from(2),
        };
        let perp = PerpInfo {
            market: exact_perp_market(1),
            price: I80F48::from(50),
            funding: PerpMarketCache::default(),
            account: PerpAccount {
                base_position: 10,
                quote_position: I80F48::from(-400),
                ..PerpAccount::default()
            },
        };
        HealthCache::new(vec![perp], vec![spot], I80F48::from(quote_balance))
    }

    #[test]
    fn test_health_sums_contributions() {
        let cache = sample_cache(100);
        assert_eq!(cache.health(HealthType::Init).unwrap(), I80F48::from(90));
        assert_eq!(cache.health(HealthType::Maint).unwrap(), fp("152.5"));

        assert_eq!(
            cache.weighted_assets_and_liabs(HealthType::Init).unwrap(),
            (I80F48::from(115), I80F48::from(25))
        );
        assert_eq!(
            cache.health_ratio(HealthType::Init).unwrap(),
            I80F48::from(360)
        );
        assert_eq!(
            cache.assets_and_liabs().unwrap(),
            (I80F48::from(620), I80F48::from(400))
        );
        assert!((cache.leverage().unwrap().to_f64_lossy() - 400.0 / 220.0).abs() < 1e-9);
        assert_eq!(cache.state().unwrap(), AccountHealthState::Healthy);
    }

    #[test]
    fn test_health_states() {
        let liquidatable = sample_cache(-100);
        assert_eq!(
            liquidatable.health(HealthType::Maint).unwrap(),
            fp("-47.5")
        );
        assert_eq!(
            liquidatable.maint_assets_and_liabs().unwrap(),
            (I80F48::from(515), I80F48::from(500))
        );
        assert!(liquidatable.is_liquidatable().unwrap());
        assert!(!liquidatable.is_bankrupt().unwrap());
        assert_eq!(
            liquidatable.state().unwrap(),
            AccountHealthState::Liquidatable
        );

        let bankrupt = sample_cache(-200);
        assert!(bankrupt.is_liquidatable().unwrap());
        assert!(bankrupt.is_bankrupt().unwrap());
        assert_eq!(bankrupt.state().unwrap(), AccountHealthState::Bankrupt);
        assert!(bankrupt.has_spot_borrows());
    }

    #[test]
    fn test_bankruptcy_takes_perps_at_mark() {
        let perp_only = |base_position: i64, quote_position: i64| {
            let perp = PerpInfo {
                market: exact_perp_market(1),
                price: I80F48::from(50),
                funding: PerpMarketCache::default(),
                account: PerpAccount {
                    base_position,
                    quote_position: I80F48::from(quote_position),
                    ..PerpAccount::default()
                },
            };
            HealthCache::new(vec![perp], vec![], I80F48::ZERO)
        };

        // long 10 @ 50 is worth 500 here, 437.5 in maint health
        let long = perp_only(10, -480);
        assert_eq!(
            long.maint_assets_and_liabs().unwrap(),
            (I80F48::from(500), I80F48::from(480))
        );
        assert!(long.health(HealthType::Maint).unwrap().is_negative());
        assert_eq!(long.state().unwrap(), AccountHealthState::Liquidatable);

        // short 10 @ 50 owes 500 here, 562.5 in maint health
        let short = perp_only(-10, 520);
        assert_eq!(
            short.maint_assets_and_liabs().unwrap(),
            (I80F48::from(520), I80F48::from(500))
        );
        assert_eq!(short.state().unwrap(), AccountHealthState::Liquidatable);

        let underwater = perp_only(10, -501);
        assert_eq!(underwater.state().unwrap(), AccountHealthState::Bankrupt);
    }

    #[test]
    fn test_health_ratio_bounds() {
        let no_liabs = HealthCache::new(vec![], vec![], I80F48::from(5));
        assert_eq!(no_liabs.health_ratio(HealthType::Maint).unwrap(), I80F48::MAX);

        let empty = HealthCache::new(vec![], vec![], I80F48::ZERO);
        assert_eq!(empty.health(HealthType::Init).unwrap(), I80F48::ZERO);
        assert_eq!(empty.health_ratio(HealthType::Init).unwrap(), I80F48::MAX);
        assert!(!empty.is_bankrupt().unwrap());

        // a dust borrow against a large deposit has no representable ratio
        let dust = HealthCache::new(
            vec![],
            vec![SpotInfo {
                market: exact_spot_market(0),
                price: I80F48::ONE,
                balance: I80F48::from(1_000_000_000_000),
            }],
            I80F48::from_bits(-1),
        );
        assert_eq!(dust.health_ratio(HealthType::Init), Err(RiskError::OutOfRange));
    }

    #[test]
    fn test_health_ratio_large_balances() {
        let borrow = |balance: I80F48, quote: I80F48| {
            HealthCache::new(
                vec![],
                vec![SpotInfo {
                    market: spot_market("1", "1"),
                    price: I80F48::ONE,
                    balance,
                }],
                quote,
            )
        };
        let e21 = I80F48::from_integer(10i128.pow(21)).unwrap();
        let e22 = I80F48::from_integer(10i128.pow(22)).unwrap();
        let minus_3e23 = I80F48::from_integer(-3 * 10i128.pow(23)).unwrap();

        let cache = borrow(e21.checked_neg().unwrap(), e22);
        assert_eq!(cache.health_ratio(HealthType::Maint).unwrap(), I80F48::from(900));

        let cache = borrow(minus_3e23, I80F48::ZERO);
        assert_eq!(cache.health_ratio(HealthType::Maint).unwrap(), I80F48::from(-100));

        let cache = borrow(I80F48::from(-1), I80F48::from(10));
        assert_eq!(cache.health_ratio(HealthType::Maint).unwrap(), I80F48::from(900));
    }

    #[test]
    fn test_resting_orders_lower_health() {
        let mut cache = sample_cache(100);
        let before = cache.health(HealthType::Init).unwrap();
        cache.perp_infos[0].account.bids_quantity = 4;
        let after = cache.health(HealthType::Init).unwrap();
        assert!(after < before);
        assert!(cache.has_perp_open_orders());
        // unweighted balance sheet ignores resting orders
        assert_eq!(
            cache.assets_and_liabs().unwrap(),
            sample_cache(100).assets_and_liabs().unwrap()
        );
    }

    fn sample_config() -> RiskConfig {
        RiskConfig {
            perp_markets: vec![exact_perp_market(1)],
            spot_markets: vec![exact_spot_market(0)],
            ..RiskConfig::default()
        }
    }

    fn sample_mango_cache() -> MangoCache {
        let mut cache = MangoCache::default();
        let unit_bank = RootBankCache {
            deposit_index: I80F48::ONE,
            borrow_index: I80F48::ONE,
            last_update: 0,
        };
        cache.root_bank_cache = [unit_bank; crate::state::MAX_TOKENS];
        cache.price_cache[0] = PriceCache {
            price: I80F48::from(10),
            last_update: 0,
        };
        cache.price_cache[1] = PriceCache {
            price: I80F48::from(50),
            last_update: 0,
        };
        cache
    }

    fn sample_account() -> MangoAccount {
        let mut account = MangoAccount::default();
        account.deposits[QUOTE_INDEX] = I80F48::from(100);
        account.deposits[0] = I80F48::from(2);
        account.perp_accounts[1] = PerpAccount {
            base_position: 10,
            quote_position: I80F48::from(-400),
            ..PerpAccount::default()
        };
        account
    }

    #[test]
    fn test_from_account() {
        let health_cache = HealthCache::from_account(
            &sample_account(),
            &sample_mango_cache(),
            &sample_config(),
            &HashMap::new(),
        )
        .unwrap();
        assert_eq!(health_cache.quote_balance, I80F48::from(100));
        assert_eq!(health_cache.spot_infos.len(), 1);
        assert_eq!(health_cache.perp_infos.len(), 1);
        assert_eq!(
            health_cache.health(HealthType::Init).unwrap(),
            sample_cache(100).health(HealthType::Init).unwrap()
        );
    }

    #[test]
    fn test_from_account_open_orders() {
        let mut open_orders = HashMap::new();
        open_orders.insert(
            0,
            OpenOrdersBalances {
                base_total: I80F48::from(1),
                quote_total: I80F48::from(7),
            },
        );
        let health_cache = HealthCache::from_account(
            &sample_account(),
            &sample_mango_cache(),
            &sample_config(),
            &open_orders,
        )
        .unwrap();
        assert_eq!(health_cache.quote_balance, I80F48::from(107));
        assert_eq!(health_cache.spot_infos[0].balance, I80F48::from(3));
    }

    #[test]
    fn test_from_account_missing_market() {
        let config = RiskConfig {
            perp_markets: vec![],
            ..sample_config()
        };
        let err = HealthCache::from_account(
            &sample_account(),
            &sample_mango_cache(),
            &config,
            &HashMap::new(),
        )
        .unwrap_err();
        assert_eq!(err, RiskError::InactiveMarket(1));
    }

    #[test]
    fn test_scan_accounts_skips_failures() {
        let good = sample_account();
        let mut unconfigured = sample_account();
        unconfigured.perp_accounts[7].base_position = 1;
        let mut broke = sample_account();
        broke.borrows[QUOTE_INDEX] = I80F48::from(300);

        let keys: Vec<Pubkey> = (0..3).map(|_| Pubkey::new_unique()).collect();
        let accounts = vec![(&keys[0], &good), (&keys[1], &unconfigured), (&keys[2], &broke)];
        let reports = scan_accounts(accounts, &sample_mango_cache(), &sample_config());

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].address, keys[0]);
        assert_eq!(reports[0].state, AccountHealthState::Healthy);
        assert_eq!(reports[0].init_health, I80F48::from(90));
        assert_eq!(reports[1].address, keys[2]);
        assert_eq!(reports[1].state, AccountHealthState::Bankrupt);
    }
}
