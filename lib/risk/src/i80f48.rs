//! Signed 128-bit fixed point with 48 fractional bits.
//!
//! Bit compatible with the on-chain `I80F48`, but all arithmetic is checked and
//! rounds like the program does: multiplication and division keep a 256-bit
//! intermediate and round half away from zero at the 49th fractional bit.

use std::fmt;
use std::str::FromStr;

use primitive_types::U256;
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{Result, RiskError};

pub const FRAC_BITS: u32 = 48;
const FRAC_MASK: u128 = (1u128 << FRAC_BITS) - 1;
const HALF_ULP: u128 = 1u128 << (FRAC_BITS - 1);

/// Fractional digits used by `Display`.
pub const DISPLAY_DECIMALS: u32 = 20;

/// Fractional digits that are significant when parsing. Anything beyond can't
/// change the rounded result.
const PARSE_DECIMALS: usize = 60;

#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct I80F48 {
    bits: i128,
}

impl I80F48 {
    pub const ZERO: I80F48 = I80F48 { bits: 0 };
    pub const ONE: I80F48 = I80F48 { bits: 1 << FRAC_BITS };
    pub const NEG_ONE: I80F48 = I80F48 { bits: -(1 << FRAC_BITS) };
    pub const MIN: I80F48 = I80F48 { bits: i128::MIN };
    pub const MAX: I80F48 = I80F48 { bits: i128::MAX };
    /// Smallest positive value, 2^-48.
    pub const DELTA: I80F48 = I80F48 { bits: 1 };

    #[inline(always)]
    pub const fn from_bits(bits: i128) -> Self {
        Self { bits }
    }

    #[inline(always)]
    pub const fn to_bits(self) -> i128 {
        self.bits
    }

    /// Lift an integer, failing if it doesn't fit into 80 integer bits.
    pub fn from_integer(value: i128) -> Result<Self> {
        value
            .checked_mul(1 << FRAC_BITS)
            .map(Self::from_bits)
            .ok_or(RiskError::OutOfRange)
    }

    /// Parse a raw (already scaled by 2^48) integer of arbitrary size.
    pub fn from_raw_decimal(raw: &str) -> Result<Self> {
        let (negative, digits) = split_sign(raw.trim());
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(RiskError::InvalidDecimal(raw.to_string()));
        }
        let magnitude = U256::from_dec_str(digits).map_err(|_| RiskError::OutOfRange)?;
        Self::from_sign_magnitude(negative, magnitude)
    }

    /// Parse a decimal string like `-12.345`, rounding half away from zero to
    /// the nearest multiple of 2^-48.
    pub fn from_decimal_str(s: &str) -> Result<Self> {
        let invalid = || RiskError::InvalidDecimal(s.to_string());
        let (negative, body) = split_sign(s.trim());
        let (int_str, frac_str) = body.split_once('.').unwrap_or((body, ""));
        if int_str.is_empty() && frac_str.is_empty() {
            return Err(invalid());
        }
        if !int_str.bytes().chain(frac_str.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let int_part = if int_str.is_empty() {
            U256::zero()
        } else {
            U256::from_dec_str(int_str).map_err(|_| RiskError::OutOfRange)?
        };
        // 2^80 integer part is already out of range, and keeps the shift exact
        if int_part.bits() > 81 {
            return Err(RiskError::OutOfRange);
        }

        let kept = &frac_str[..frac_str.len().min(PARSE_DECIMALS)];
        let frac_part = if kept.is_empty() {
            U256::zero()
        } else {
            let padded = format!("{:0<width$}", kept, width = PARSE_DECIMALS);
            let numerator = U256::from_dec_str(&padded).map_err(|_| invalid())? << FRAC_BITS;
            let denominator = U256::exp10(PARSE_DECIMALS);
            round_div(numerator, denominator)
        };

        Self::from_sign_magnitude(negative, (int_part << FRAC_BITS) + frac_part)
    }

    pub fn from_le_bytes(bytes: [u8; 16]) -> Self {
        Self::from_bits(i128::from_le_bytes(bytes))
    }

    pub fn from_le_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; 16] = bytes.try_into().map_err(|_| {
            RiskError::malformed("I80F48", format!("expected 16 bytes, got {}", bytes.len()))
        })?;
        Ok(Self::from_le_bytes(bytes))
    }

    pub fn to_le_bytes(self) -> [u8; 16] {
        self.bits.to_le_bytes()
    }

    pub fn checked_add(self, other: Self) -> Result<Self> {
        self.bits
            .checked_add(other.bits)
            .map(Self::from_bits)
            .ok_or(RiskError::OutOfRange)
    }

    pub fn checked_sub(self, other: Self) -> Result<Self> {
        self.bits
            .checked_sub(other.bits)
            .map(Self::from_bits)
            .ok_or(RiskError::OutOfRange)
    }

    pub fn checked_mul(self, other: Self) -> Result<Self> {
        let negative = (self.bits < 0) != (other.bits < 0);
        // both magnitudes are <= 2^127, the product can't exceed 2^254
        let product = self.magnitude() * other.magnitude();
        let mut quotient = product >> FRAC_BITS;
        if product.bit(FRAC_BITS as usize - 1) {
            quotient = quotient + U256::one();
        }
        Self::from_sign_magnitude(negative, quotient)
    }

    pub fn checked_div(self, other: Self) -> Result<Self> {
        if other.bits == 0 {
            return Err(RiskError::DivideByZero);
        }
        let negative = (self.bits < 0) != (other.bits < 0);
        let quotient = round_div(self.magnitude() << FRAC_BITS, other.magnitude());
        Self::from_sign_magnitude(negative, quotient)
    }

    /// `self * mul / div` with a single rounding step. The product is kept at
    /// 256 bits, so only a quotient outside the 128 bit range fails.
    pub fn checked_mul_div(self, mul: Self, div: Self) -> Result<Self> {
        if div.bits == 0 {
            return Err(RiskError::DivideByZero);
        }
        let negative = ((self.bits < 0) != (mul.bits < 0)) != (div.bits < 0);
        let quotient = round_div(self.magnitude() * mul.magnitude(), div.magnitude());
        Self::from_sign_magnitude(negative, quotient)
    }

    pub fn checked_neg(self) -> Result<Self> {
        self.bits
            .checked_neg()
            .map(Self::from_bits)
            .ok_or(RiskError::OutOfRange)
    }

    pub fn checked_abs(self) -> Result<Self> {
        self.bits
            .checked_abs()
            .map(Self::from_bits)
            .ok_or(RiskError::OutOfRange)
    }

    #[inline(always)]
    pub fn is_zero(self) -> bool {
        self.bits == 0
    }

    #[inline(always)]
    pub fn is_positive(self) -> bool {
        self.bits > 0
    }

    #[inline(always)]
    pub fn is_negative(self) -> bool {
        self.bits < 0
    }

    pub fn signum(self) -> i32 {
        self.bits.signum() as i32
    }

    /// Largest integer <= self.
    pub fn floor(self) -> Self {
        Self::from_bits(self.bits & !(FRAC_MASK as i128))
    }

    /// Smallest integer >= self.
    pub fn checked_ceil(self) -> Result<Self> {
        let floor = self.floor();
        if floor == self {
            Ok(floor)
        } else {
            floor.checked_add(Self::ONE)
        }
    }

    /// Lossy conversion for display purposes only.
    pub fn to_f64_lossy(self) -> f64 {
        fixed::types::I80F48::from_bits(self.bits).to_num::<f64>()
    }

    /// The full decimal expansion, with every fractional digit.
    pub fn to_exact_string(self) -> String {
        let magnitude = self.bits.unsigned_abs();
        let int_part = magnitude >> FRAC_BITS;
        let frac = magnitude & FRAC_MASK;
        let sign = if self.bits < 0 { "-" } else { "" };
        if frac == 0 {
            return format!("{sign}{int_part}");
        }
        // 10^48 = 2^48 * 5^48, so this division is exact
        let digits = (U256::from(frac) * U256::exp10(FRAC_BITS as usize)) >> FRAC_BITS;
        let digits = format!("{:0>width$}", digits.to_string(), width = FRAC_BITS as usize);
        format!("{sign}{int_part}.{}", digits.trim_end_matches('0'))
    }

    fn magnitude(self) -> U256 {
        U256::from(self.bits.unsigned_abs())
    }

    fn from_sign_magnitude(negative: bool, magnitude: U256) -> Result<Self> {
        if magnitude.bits() > 128 {
            return Err(RiskError::OutOfRange);
        }
        let magnitude = magnitude.low_u128();
        let limit = if negative {
            i128::MIN.unsigned_abs()
        } else {
            i128::MAX as u128
        };
        if magnitude > limit {
            return Err(RiskError::OutOfRange);
        }
        Ok(Self::from_bits(if negative {
            (magnitude as i128).wrapping_neg()
        } else {
            magnitude as i128
        }))
    }
}

fn split_sign(s: &str) -> (bool, &str) {
    match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    }
}

/// `numerator / denominator`, rounded half away from zero.
fn round_div(numerator: U256, denominator: U256) -> U256 {
    let quotient = numerator / denominator;
    let remainder = numerator % denominator;
    if remainder << 1u32 >= denominator {
        quotient + U256::one()
    } else {
        quotient
    }
}

impl From<i64> for I80F48 {
    fn from(value: i64) -> Self {
        Self::from_bits((value as i128) << FRAC_BITS)
    }
}

impl From<fixed::types::I80F48> for I80F48 {
    fn from(value: fixed::types::I80F48) -> Self {
        Self::from_bits(value.to_bits())
    }
}

impl From<I80F48> for fixed::types::I80F48 {
    fn from(value: I80F48) -> Self {
        fixed::types::I80F48::from_bits(value.to_bits())
    }
}

impl FromStr for I80F48 {
    type Err = RiskError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_decimal_str(s)
    }
}

/// Renders at most `DISPLAY_DECIMALS` fractional digits, rounded half away
/// from zero, without trailing zeros.
impl fmt::Display for I80F48 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scale = 10u128.pow(DISPLAY_DECIMALS);
        let magnitude = self.bits.unsigned_abs();
        let mut int_part = magnitude >> FRAC_BITS;
        let scaled = (magnitude & FRAC_MASK) * scale;
        let mut frac_digits = scaled >> FRAC_BITS;
        if scaled & FRAC_MASK >= HALF_ULP {
            frac_digits += 1;
        }
        if frac_digits == scale {
            int_part += 1;
            frac_digits = 0;
        }

        if self.bits < 0 && (int_part != 0 || frac_digits != 0) {
            f.write_str("-")?;
        }
        write!(f, "{int_part}")?;
        if frac_digits != 0 {
            let digits = format!("{:0width$}", frac_digits, width = DISPLAY_DECIMALS as usize);
            write!(f, ".{}", digits.trim_end_matches('0'))?;
        }
        Ok(())
    }
}

impl fmt::Debug for I80F48 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "I80F48({})", self.to_exact_string())
    }
}

impl Serialize for I80F48 {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_exact_string())
    }
}

struct I80F48Visitor;

impl<'de> Visitor<'de> for I80F48Visitor {
    type Value = I80F48;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a decimal string or number")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<I80F48, E> {
        I80F48::from_decimal_str(v).map_err(E::custom)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<I80F48, E> {
        Ok(I80F48::from(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<I80F48, E> {
        I80F48::from_integer(v as i128).map_err(E::custom)
    }

    // shortest round-trip representation, so "0.9" in a config means 0.9
    fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<I80F48, E> {
        if !v.is_finite() {
            return Err(E::custom("non-finite number"));
        }
        I80F48::from_decimal_str(&format!("{v}")).map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for I80F48 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(I80F48Visitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn fp(s: &str) -> I80F48 {
        s.parse().unwrap()
    }

    #[test]
    fn test_known_values() {
        let sum = fp("604462909807314587353087")
            .checked_add(fp("0.99999999999999644729"))
            .unwrap();
        assert_eq!(sum.to_string(), "604462909807314587353087.99999999999999644729");
        assert_eq!(sum, I80F48::MAX);

        assert_eq!(fp("6").checked_mul(fp("7")).unwrap().to_string(), "42");
        assert_eq!(fp("42").checked_div(fp("7")).unwrap().to_string(), "6");
        assert_eq!(I80F48::MIN.to_string(), "-604462909807314587353088");
    }

    #[test]
    fn test_raw_bounds() {
        let max = "170141183460469231731687303715884105727";
        let min = "-170141183460469231731687303715884105728";
        assert_eq!(I80F48::from_raw_decimal(max).unwrap(), I80F48::MAX);
        assert_eq!(I80F48::from_raw_decimal(min).unwrap(), I80F48::MIN);
        assert_eq!(
            I80F48::from_raw_decimal("170141183460469231731687303715884105728"),
            Err(RiskError::OutOfRange)
        );
        assert_eq!(
            I80F48::from_raw_decimal("-170141183460469231731687303715884105729"),
            Err(RiskError::OutOfRange)
        );
        assert_eq!(
            I80F48::from_raw_decimal("99999999999999999999999999999999999999999999999999"),
            Err(RiskError::OutOfRange)
        );
    }

    #[test]
    fn test_construction_bounds() {
        assert!(I80F48::from_integer(1 << 79).is_err());
        assert_eq!(
            I80F48::from_integer(-(1 << 79)).unwrap(),
            I80F48::MIN
        );
        assert!(I80F48::from_integer((1 << 79) - 1).is_ok());
        assert_eq!(
            I80F48::from_decimal_str("604462909807314587353088"),
            Err(RiskError::OutOfRange)
        );
        assert_eq!(
            I80F48::from_decimal_str("-604462909807314587353088").unwrap(),
            I80F48::MIN
        );
        assert_eq!(
            I80F48::from_decimal_str("1000000000000000000000000000000000"),
            Err(RiskError::OutOfRange)
        );
    }

    #[test]
    fn test_overflow_is_checked() {
        assert_eq!(I80F48::MAX.checked_add(I80F48::DELTA), Err(RiskError::OutOfRange));
        assert_eq!(I80F48::MIN.checked_sub(I80F48::DELTA), Err(RiskError::OutOfRange));
        assert_eq!(I80F48::MIN.checked_neg(), Err(RiskError::OutOfRange));
        assert_eq!(I80F48::MIN.checked_abs(), Err(RiskError::OutOfRange));
        assert_eq!(I80F48::MAX.checked_mul(fp("2")), Err(RiskError::OutOfRange));
        assert_eq!(I80F48::MIN.checked_mul(I80F48::NEG_ONE), Err(RiskError::OutOfRange));
        assert_eq!(I80F48::MIN.checked_mul(I80F48::ONE).unwrap(), I80F48::MIN);
        assert_eq!(I80F48::MAX.checked_div(fp("0.5")), Err(RiskError::OutOfRange));
        assert_eq!(I80F48::ONE.checked_div(I80F48::ZERO), Err(RiskError::DivideByZero));
    }

    #[test]
    fn test_mul_rounding() {
        let half = fp("0.5");
        let quarter = fp("0.25");
        // exactly half an ulp rounds away from zero
        assert_eq!(I80F48::DELTA.checked_mul(half).unwrap(), I80F48::DELTA);
        assert_eq!(
            I80F48::DELTA.checked_neg().unwrap().checked_mul(half).unwrap(),
            I80F48::from_bits(-1)
        );
        // below half rounds toward zero
        assert_eq!(I80F48::DELTA.checked_mul(quarter).unwrap(), I80F48::ZERO);
        assert_eq!(
            I80F48::from_bits(-1).checked_mul(quarter).unwrap(),
            I80F48::ZERO
        );
        assert_eq!(
            I80F48::from_bits(3).checked_mul(half).unwrap(),
            I80F48::from_bits(2)
        );
        assert_eq!(
            I80F48::from_bits(-3).checked_mul(half).unwrap(),
            I80F48::from_bits(-2)
        );
    }

    #[test]
    fn test_div_rounding() {
        let one = I80F48::ONE;
        let three = fp("3");
        assert_eq!(
            one.checked_div(three).unwrap().to_bits(),
            (1i128 << 48) / 3
        );
        let two = fp("2");
        assert_eq!(
            two.checked_div(three).unwrap().to_bits(),
            (2i128 << 48) / 3 + 1
        );
        assert_eq!(
            two.checked_neg().unwrap().checked_div(three).unwrap().to_bits(),
            -((2i128 << 48) / 3 + 1)
        );
        assert_eq!(
            I80F48::DELTA.checked_div(two).unwrap(),
            I80F48::DELTA
        );
    }

    #[test]
    fn test_mul_div_wide_intermediate() {
        let big = fp("500000000000000000000000");
        // big * 100 alone does not fit
        assert_eq!(big.checked_mul(fp("100")), Err(RiskError::OutOfRange));
        assert_eq!(big.checked_mul_div(fp("100"), fp("1000")).unwrap(), fp("50000000000000000000000"));
        assert_eq!(
            big.checked_neg().unwrap().checked_mul_div(fp("100"), big).unwrap(),
            fp("-100")
        );
        assert_eq!(
            fp("-2").checked_mul_div(fp("1"), fp("-3")).unwrap(),
            fp("2").checked_div(fp("3")).unwrap()
        );
        assert_eq!(big.checked_mul_div(big, I80F48::ONE), Err(RiskError::OutOfRange));
        assert_eq!(big.checked_mul_div(big, I80F48::ZERO), Err(RiskError::DivideByZero));
    }

    #[test]
    fn test_parse_rounding() {
        // 2^-49 exactly is a tie, which goes away from zero
        let tie = "0.0000000000000017763568394002504646778106689453125";
        assert_eq!(fp(tie), I80F48::DELTA);
        assert_eq!(fp(&format!("-{tie}")), I80F48::from_bits(-1));
        // just below the tie
        assert_eq!(fp("0.0000000000000017763568394002504646778106689453124"), I80F48::ZERO);
        assert_eq!(fp("0.99999999999999644729").to_bits(), (1i128 << 48) - 1);
        assert_eq!(fp(".5"), fp("0.5"));
        assert_eq!(fp("+2."), fp("2"));
        assert_eq!(fp("-0"), I80F48::ZERO);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for s in ["", "-", ".", "1.2.3", "abc", "1e5", "--1", " 1 2"] {
            assert!(
                matches!(I80F48::from_decimal_str(s), Err(RiskError::InvalidDecimal(_))),
                "{s:?}"
            );
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(fp("-1.5").to_string(), "-1.5");
        assert_eq!(fp("0.125").to_string(), "0.125");
        assert_eq!(I80F48::ZERO.to_string(), "0");
        assert_eq!(I80F48::DELTA.to_string(), "0.00000000000000355271");
        assert_eq!(I80F48::from_bits(-1).to_string(), "-0.00000000000000355271");
        assert_eq!(
            I80F48::DELTA.to_exact_string(),
            "0.000000000000003552713678800500929355621337890625"
        );
    }

    #[test]
    fn test_string_round_trip() {
        for s in [
            "0", "1", "-1", "0.5", "-0.25", "1234567.125", "42", "-604462909807314587353088",
            "0.00000000000000355271", "3.14159",
        ] {
            let parsed = fp(s);
            assert_eq!(fp(&parsed.to_exact_string()), parsed);
        }
        for s in ["0", "1", "-1", "0.5", "-0.25", "1234567.125", "42", "-604462909807314587353088"] {
            assert_eq!(fp(s).to_string(), s);
        }

        let mut rng = rand::thread_rng();
        for _ in 0..1000 {
            let v = I80F48::from_bits(rng.gen::<i128>());
            assert_eq!(fp(&v.to_exact_string()), v);
            assert_eq!(I80F48::from_le_bytes(v.to_le_bytes()), v);
        }
    }

    #[test]
    fn test_arithmetic_identities() {
        let mut rng = rand::thread_rng();
        for _ in 0..1000 {
            let a = I80F48::from_bits(rng.gen::<i128>() >> 20);
            let b = I80F48::from_bits(rng.gen::<i128>() >> 20);
            assert_eq!(a.checked_add(b).unwrap().checked_sub(b).unwrap(), a);
            assert_eq!(a.checked_mul(I80F48::ONE).unwrap(), a);
            if !a.is_zero() {
                assert_eq!(a.checked_div(a).unwrap(), I80F48::ONE);
            }
        }
    }

    #[test]
    fn test_from_le_slice() {
        assert!(I80F48::from_le_slice(&[0u8; 15]).is_err());
        let mut bytes = [0u8; 16];
        bytes[6] = 1;
        assert_eq!(I80F48::from_le_slice(&bytes).unwrap(), I80F48::ONE);
    }

    #[test]
    fn test_floor_ceil() {
        assert_eq!(fp("-0.5").floor(), fp("-1"));
        assert_eq!(fp("1.5").floor(), fp("1"));
        assert_eq!(fp("1.5").checked_ceil().unwrap(), fp("2"));
        assert_eq!(fp("-1.5").checked_ceil().unwrap(), fp("-1"));
        assert!(I80F48::MAX.checked_ceil().is_err());
    }

    #[test]
    fn test_fixed_interop() {
        let v = fp("-123.456");
        let f: fixed::types::I80F48 = v.into();
        assert_eq!(I80F48::from(f), v);
        assert!((v.to_f64_lossy() + 123.456).abs() < 1e-9);
    }

    #[test]
    fn test_serde() {
        #[derive(serde_derive::Deserialize)]
        struct Weights {
            a: I80F48,
            b: I80F48,
            c: I80F48,
        }
        let w: Weights = toml::from_str("a = \"0.9\"\nb = 0.9\nc = 2").unwrap();
        assert_eq!(w.a, fp("0.9"));
        assert_eq!(w.b, fp("0.9"));
        assert_eq!(w.c, fp("2"));
        let json = serde_json::to_string(&fp("-2.5")).unwrap();
        assert_eq!(json, "\"-2.5\"");
    }
}
