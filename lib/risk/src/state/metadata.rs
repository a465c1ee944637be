use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::{require_data, Result, RiskError};

pub const METADATA_SIZE: usize = 8;

/// Discriminator stored in the first byte of every program account.
#[derive(Eq, PartialEq, Copy, Clone, TryFromPrimitive, IntoPrimitive, Debug)]
#[repr(u8)]
pub enum DataType {
    MangoGroup = 0,
    MangoAccount = 1,
    RootBank = 2,
    NodeBank = 3,
    PerpMarket = 4,
    Bids = 5,
    Asks = 6,
    MangoCache = 7,
    EventQueue = 8,
    AdvancedOrders = 9,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
/// Stores meta information about the `Account` on chain
pub struct MetaData {
    pub data_type: DataType,
    pub version: u8,
    pub is_initialized: bool,
    // being used by PerpMarket to store liquidity mining param
    pub extra_info: [u8; 5],
}

impl MetaData {
    pub fn new(data_type: DataType, version: u8, is_initialized: bool) -> Self {
        Self {
            data_type,
            version,
            is_initialized,
            extra_info: [0; 5],
        }
    }

    pub fn unpack(src: &[u8; METADATA_SIZE]) -> Result<Self> {
        let data_type = DataType::try_from(src[0]).map_err(|_| {
            RiskError::malformed("metadata", format!("unknown data type {}", src[0]))
        })?;
        let mut extra_info = [0u8; 5];
        extra_info.copy_from_slice(&src[3..]);
        Ok(Self {
            data_type,
            version: src[1],
            is_initialized: src[2] != 0,
            extra_info,
        })
    }

    /// Unpacks and requires the data type to be `expected`.
    pub fn unpack_checked(
        src: &[u8; METADATA_SIZE],
        expected: DataType,
        what: &'static str,
    ) -> Result<Self> {
        let meta = Self::unpack(src)?;
        require_data!(
            meta.data_type == expected,
            what,
            "expected data type {:?}, found {:?}",
            expected,
            meta.data_type
        );
        Ok(meta)
    }

    pub fn pack_into(&self, dst: &mut [u8; METADATA_SIZE]) {
        dst[0] = self.data_type.into();
        dst[1] = self.version;
        dst[2] = self.is_initialized as u8;
        dst[3..].copy_from_slice(&self.extra_info);
    }
}
