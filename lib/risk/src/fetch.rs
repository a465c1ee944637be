use anyhow::Context;
use futures::future::join_all;
use solana_program::pubkey::Pubkey;

use crate::config::RiskConfig;
use crate::health::{HealthCache, OpenOrdersBalances};
use crate::state::{BookSide, BookSideType, MangoAccount, MangoCache};

/// Source of raw account data, e.g. an rpc client or a websocket fed cache.
#[async_trait::async_trait]
pub trait AccountFetcher: Sync + Send {
    async fn fetch_raw_account(&self, address: &Pubkey) -> anyhow::Result<Vec<u8>>;
}

async fn fetch_bookside(
    fetcher: &dyn AccountFetcher,
    address: &Pubkey,
    expected: BookSideType,
) -> anyhow::Result<BookSide> {
    let data = fetcher
        .fetch_raw_account(address)
        .await
        .with_context(|| format!("fetch bookside {address}"))?;
    let book_side =
        BookSide::decode(&data).with_context(|| format!("decode bookside {address}"))?;
    anyhow::ensure!(
        book_side.book_side_type == expected,
        "bookside {address} is {:?}, expected {:?}",
        book_side.book_side_type,
        expected
    );
    Ok(book_side)
}

/// Fetches and decodes both sides of a perp book.
pub async fn fetch_book(
    fetcher: &dyn AccountFetcher,
    bids: &Pubkey,
    asks: &Pubkey,
) -> anyhow::Result<(BookSide, BookSide)> {
    futures::try_join!(
        fetch_bookside(fetcher, bids, BookSideType::Bids),
        fetch_bookside(fetcher, asks, BookSideType::Asks),
    )
}

pub async fn fetch_mango_cache(
    fetcher: &dyn AccountFetcher,
    address: &Pubkey,
) -> anyhow::Result<MangoCache> {
    let data = fetcher
        .fetch_raw_account(address)
        .await
        .with_context(|| format!("fetch mango cache {address}"))?;
    MangoCache::decode(&data).with_context(|| format!("decode mango cache {address}"))
}

pub async fn fetch_mango_account(
    fetcher: &dyn AccountFetcher,
    address: &Pubkey,
) -> anyhow::Result<MangoAccount> {
    let data = fetcher
        .fetch_raw_account(address)
        .await
        .with_context(|| format!("fetch mango account {address}"))?;
    MangoAccount::decode(&data).with_context(|| format!("decode mango account {address}"))
}

/// Fetches an account together with the cache it should be evaluated against.
pub async fn fetch_account_snapshot(
    fetcher: &dyn AccountFetcher,
    account: &Pubkey,
    cache: &Pubkey,
) -> anyhow::Result<(MangoAccount, MangoCache)> {
    futures::try_join!(
        fetch_mango_account(fetcher, account),
        fetch_mango_cache(fetcher, cache),
    )
}

/// Builds health caches for many accounts, all against one cache snapshot.
///
/// The result has one entry per requested account, in order. A failure for one
/// account does not affect the others; only failing to load the cache fails
/// the whole call.
pub async fn fetch_health_caches(
    fetcher: &dyn AccountFetcher,
    accounts: &[Pubkey],
    cache: &Pubkey,
    config: &RiskConfig,
) -> anyhow::Result<Vec<(Pubkey, anyhow::Result<HealthCache>)>> {
    let mango_cache = fetch_mango_cache(fetcher, cache).await?;
    let no_open_orders = std::collections::HashMap::<usize, OpenOrdersBalances>::new();
    let (mango_cache, no_open_orders) = (&mango_cache, &no_open_orders);

    let results = join_all(accounts.iter().map(|address| async move {
        let account = fetch_mango_account(fetcher, address).await?;
        let health_cache =
            HealthCache::from_account(&account, mango_cache, config, no_open_orders)
                .with_context(|| format!("health of {address}"))?;
        anyhow::Ok(health_cache)
    }))
    .await;

    Ok(accounts.iter().copied().zip(results).collect())
}
