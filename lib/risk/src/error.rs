use thiserror::Error;

/// Errors produced by the risk computations and the account decoders.
///
/// All of them are local to a single computation: callers are expected to
/// log and skip the account or market in question, not abort.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RiskError {
    #[error("fixed-point value out of range")]
    OutOfRange,
    #[error("fixed-point division by zero")]
    DivideByZero,
    #[error("malformed {what}: {reason}")]
    MalformedData { what: &'static str, reason: String },
    #[error("invalid decimal string {0:?}")]
    InvalidDecimal(String),
    #[error("no market configured for index {0}")]
    InactiveMarket(usize),
}

pub type Result<T> = std::result::Result<T, RiskError>;

impl RiskError {
    pub(crate) fn malformed(what: &'static str, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        tracing::debug!(what, %reason, "rejecting malformed account data");
        RiskError::MalformedData { what, reason }
    }
}

/// Like `require!` in on-chain code, but returning `MalformedData`.
macro_rules! require_data {
    ($cond:expr, $what:expr, $($reason:tt)+) => {
        if !($cond) {
            return Err($crate::error::RiskError::malformed($what, format!($($reason)+)));
        }
    };
}
pub(crate) use require_data;
