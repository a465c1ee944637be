use arrayref::{array_ref, array_refs, mut_array_refs};
use solana_program::pubkey::Pubkey;
use static_assertions::const_assert_eq;

use crate::error::{require_data, Result};
use crate::i80f48::I80F48;
use crate::state::mango_cache::{RootBankCache, UserActiveAssets};
use crate::state::metadata::{DataType, MetaData, METADATA_SIZE};
use crate::state::perp_account::{PerpAccount, PERP_ACCOUNT_SIZE};
use crate::state::{MAX_PAIRS, MAX_TOKENS};

pub const MAX_PERP_OPEN_ORDERS: usize = 64;
pub const INFO_LEN: usize = 32;
pub const FREE_ORDER_SLOT: u8 = u8::MAX;

pub const MANGO_ACCOUNT_SIZE: usize = 4296;
const_assert_eq!(
    MANGO_ACCOUNT_SIZE,
    METADATA_SIZE
        + 32 * 2
        + MAX_PAIRS
        + 1
        + 16 * MAX_TOKENS * 2
        + 32 * MAX_PAIRS
        + PERP_ACCOUNT_SIZE * MAX_PAIRS
        + MAX_PERP_OPEN_ORDERS * (1 + 1 + 16 + 8)
        + 8
        + 2
        + INFO_LEN
        + 32
        + 1
        + 32
        + 5
);

/// A margin account: spot deposits/borrows for every token and a perp
/// position for every market.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MangoAccount {
    pub meta_data: MetaData,

    pub mango_group: Pubkey,
    pub owner: Pubkey,

    pub in_margin_basket: [bool; MAX_PAIRS],
    pub num_in_margin_basket: u8,

    // Spot and Margin related data
    pub deposits: [I80F48; MAX_TOKENS],
    pub borrows: [I80F48; MAX_TOKENS],
    pub spot_open_orders: [Pubkey; MAX_PAIRS],

    // Perps related data
    pub perp_accounts: [PerpAccount; MAX_PAIRS],

    pub order_market: [u8; MAX_PERP_OPEN_ORDERS],
    pub order_side: [u8; MAX_PERP_OPEN_ORDERS],
    pub orders: [i128; MAX_PERP_OPEN_ORDERS],
    pub client_order_ids: [u64; MAX_PERP_OPEN_ORDERS],

    pub msrm_amount: u64,

    /// This account cannot open new positions or borrow until `init_health >= 0`
    pub being_liquidated: bool,

    /// This account cannot do anything except go through `resolve_bankruptcy`
    pub is_bankrupt: bool,
    pub info: [u8; INFO_LEN],

    /// Starts off as zero pubkey and points to the AdvancedOrders account
    pub advanced_orders_key: Pubkey,

    /// Can this account be upgraded to v1 so it can be closed
    pub not_upgradable: bool,

    // Alternative authority/signer of transactions for a mango account
    pub delegate: Pubkey,
}

impl Default for MangoAccount {
    fn default() -> Self {
        Self {
            meta_data: MetaData::new(DataType::MangoAccount, 1, true),
            mango_group: Pubkey::default(),
            owner: Pubkey::default(),
            in_margin_basket: [false; MAX_PAIRS],
            num_in_margin_basket: 0,
            deposits: [I80F48::ZERO; MAX_TOKENS],
            borrows: [I80F48::ZERO; MAX_TOKENS],
            spot_open_orders: [Pubkey::default(); MAX_PAIRS],
            perp_accounts: [PerpAccount::default(); MAX_PAIRS],
            order_market: [FREE_ORDER_SLOT; MAX_PERP_OPEN_ORDERS],
            order_side: [0; MAX_PERP_OPEN_ORDERS],
            orders: [0; MAX_PERP_OPEN_ORDERS],
            client_order_ids: [0; MAX_PERP_OPEN_ORDERS],
            msrm_amount: 0,
            being_liquidated: false,
            is_bankrupt: false,
            info: [0; INFO_LEN],
            advanced_orders_key: Pubkey::default(),
            not_upgradable: false,
            delegate: Pubkey::default(),
        }
    }
}

fn unpack_i80f48s<const N: usize>(src: &[u8], dst: &mut [I80F48; N]) {
    for (value, chunk) in dst.iter_mut().zip(src.chunks_exact(16)) {
        *value = I80F48::from_le_bytes(*array_ref![chunk, 0, 16]);
    }
}

fn pack_i80f48s(src: &[I80F48], dst: &mut [u8]) {
    for (value, chunk) in src.iter().zip(dst.chunks_exact_mut(16)) {
        chunk.copy_from_slice(&value.to_le_bytes());
    }
}

impl MangoAccount {
    pub fn decode(data: &[u8]) -> Result<Self> {
        require_data!(
            data.len() == MANGO_ACCOUNT_SIZE,
            "mango account",
            "expected {} bytes, got {}",
            MANGO_ACCOUNT_SIZE,
            data.len()
        );
        let data = array_ref![data, 0, MANGO_ACCOUNT_SIZE];
        let (
            meta,
            mango_group,
            owner,
            in_margin_basket,
            num_in_margin_basket,
            deposits,
            borrows,
            spot_open_orders,
            perp_accounts,
            order_market,
            order_side,
            orders,
            client_order_ids,
            msrm_amount,
            being_liquidated,
            is_bankrupt,
            info,
            advanced_orders_key,
            not_upgradable,
            delegate,
            _padding,
        ) = array_refs![
            data,
            METADATA_SIZE,
            32,
            32,
            MAX_PAIRS,
            1,
            16 * MAX_TOKENS,
            16 * MAX_TOKENS,
            32 * MAX_PAIRS,
            PERP_ACCOUNT_SIZE * MAX_PAIRS,
            MAX_PERP_OPEN_ORDERS,
            MAX_PERP_OPEN_ORDERS,
            16 * MAX_PERP_OPEN_ORDERS,
            8 * MAX_PERP_OPEN_ORDERS,
            8,
            1,
            1,
            INFO_LEN,
            32,
            1,
            32,
            5
        ];

        let meta_data = MetaData::unpack_checked(meta, DataType::MangoAccount, "mango account")?;
        let mut account = MangoAccount {
            meta_data,
            mango_group: Pubkey::new_from_array(*mango_group),
            owner: Pubkey::new_from_array(*owner),
            num_in_margin_basket: num_in_margin_basket[0],
            order_market: *order_market,
            order_side: *order_side,
            msrm_amount: u64::from_le_bytes(*msrm_amount),
            being_liquidated: being_liquidated[0] != 0,
            is_bankrupt: is_bankrupt[0] != 0,
            info: *info,
            advanced_orders_key: Pubkey::new_from_array(*advanced_orders_key),
            not_upgradable: not_upgradable[0] != 0,
            delegate: Pubkey::new_from_array(*delegate),
            ..MangoAccount::default()
        };

        for (flag, byte) in account.in_margin_basket.iter_mut().zip(in_margin_basket) {
            *flag = *byte != 0;
        }
        unpack_i80f48s(deposits, &mut account.deposits);
        unpack_i80f48s(borrows, &mut account.borrows);
        for (key, chunk) in account
            .spot_open_orders
            .iter_mut()
            .zip(spot_open_orders.chunks_exact(32))
        {
            *key = Pubkey::new_from_array(*array_ref![chunk, 0, 32]);
        }
        for (perp_account, chunk) in account
            .perp_accounts
            .iter_mut()
            .zip(perp_accounts.chunks_exact(PERP_ACCOUNT_SIZE))
        {
            *perp_account = PerpAccount::unpack_from_slice(chunk)?;
        }
        for (order, chunk) in account.orders.iter_mut().zip(orders.chunks_exact(16)) {
            *order = i128::from_le_bytes(*array_ref![chunk, 0, 16]);
        }
        for (id, chunk) in account
            .client_order_ids
            .iter_mut()
            .zip(client_order_ids.chunks_exact(8))
        {
            *id = u64::from_le_bytes(*array_ref![chunk, 0, 8]);
        }
        Ok(account)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut data = vec![0u8; MANGO_ACCOUNT_SIZE];
        let dst = arrayref::array_mut_ref![data, 0, MANGO_ACCOUNT_SIZE];
        let (
            meta,
            mango_group,
            owner,
            in_margin_basket,
            num_in_margin_basket,
            deposits,
            borrows,
            spot_open_orders,
            perp_accounts,
            order_market,
            order_side,
            orders,
            client_order_ids,
            msrm_amount,
            being_liquidated,
            is_bankrupt,
            info,
            advanced_orders_key,
            not_upgradable,
            delegate,
            _padding,
        ) = mut_array_refs![
            dst,
            METADATA_SIZE,
            32,
            32,
            MAX_PAIRS,
            1,
            16 * MAX_TOKENS,
            16 * MAX_TOKENS,
            32 * MAX_PAIRS,
            PERP_ACCOUNT_SIZE * MAX_PAIRS,
            MAX_PERP_OPEN_ORDERS,
            MAX_PERP_OPEN_ORDERS,
            16 * MAX_PERP_OPEN_ORDERS,
            8 * MAX_PERP_OPEN_ORDERS,
            8,
            1,
            1,
            INFO_LEN,
            32,
            1,
            32,
            5
        ];

        self.meta_data.pack_into(meta);
        *mango_group = self.mango_group.to_bytes();
        *owner = self.owner.to_bytes();
        for (byte, flag) in in_margin_basket.iter_mut().zip(self.in_margin_basket) {
            *byte = flag as u8;
        }
        num_in_margin_basket[0] = self.num_in_margin_basket;
        pack_i80f48s(&self.deposits, deposits);
        pack_i80f48s(&self.borrows, borrows);
        for (key, chunk) in self
            .spot_open_orders
            .iter()
            .zip(spot_open_orders.chunks_exact_mut(32))
        {
            chunk.copy_from_slice(key.as_ref());
        }
        for (perp_account, chunk) in self
            .perp_accounts
            .iter()
            .zip(perp_accounts.chunks_exact_mut(PERP_ACCOUNT_SIZE))
        {
            perp_account.pack_into_slice(chunk)?;
        }
        *order_market = self.order_market;
        *order_side = self.order_side;
        for (order, chunk) in self.orders.iter().zip(orders.chunks_exact_mut(16)) {
            chunk.copy_from_slice(&order.to_le_bytes());
        }
        for (id, chunk) in self
            .client_order_ids
            .iter()
            .zip(client_order_ids.chunks_exact_mut(8))
        {
            chunk.copy_from_slice(&id.to_le_bytes());
        }
        *msrm_amount = self.msrm_amount.to_le_bytes();
        being_liquidated[0] = self.being_liquidated as u8;
        is_bankrupt[0] = self.is_bankrupt as u8;
        *info = self.info;
        *advanced_orders_key = self.advanced_orders_key.to_bytes();
        not_upgradable[0] = self.not_upgradable as u8;
        *delegate = self.delegate.to_bytes();
        Ok(data)
    }

    /// Deposits minus borrows of `token_index`, in native units.
    pub fn native_balance(&self, token_index: usize, cache: &RootBankCache) -> Result<I80F48> {
        let deposits = self.deposits[token_index].checked_mul(cache.deposit_index)?;
        let borrows = self.borrows[token_index].checked_mul(cache.borrow_index)?;
        deposits.checked_sub(borrows)
    }

    pub fn active_assets(&self) -> UserActiveAssets {
        let mut active_assets = UserActiveAssets::default();
        for i in 0..MAX_PAIRS {
            active_assets.spot[i] = self.in_margin_basket[i]
                || !self.deposits[i].is_zero()
                || !self.borrows[i].is_zero();
            active_assets.perps[i] = self.perp_accounts[i].is_active();
        }
        active_assets
    }

    /// Number of occupied perp order slots.
    pub fn num_open_orders(&self) -> usize {
        self.order_market
            .iter()
            .filter(|market| **market != FREE_ORDER_SLOT)
            .count()
    }
}
