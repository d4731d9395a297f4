//! Kubernetes quantity parsing.
//!
//! Quantities use the Kubernetes serialization format: an optional sign, a
//! decimal number and an optional suffix. Suffixes are either binary SI
//! (`Ki`, `Mi`, `Gi`, `Ti`, `Pi`, `Ei`), decimal SI (`n`, `u`, `m`, `k`,
//! `M`, `G`, `T`, `P`, `E`) or a decimal exponent (`e3`, `E-2`).
//!
//! A parsed [`Quantity`] is converted into canonical integers with
//! [`Quantity::value`] (base units) or [`Quantity::milli_value`] (thousandths,
//! used for CPU). Fractions are rounded up, as the API server does.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{CoreError, Result};

/// Significant digits kept in the mantissa before giving up.
const MAX_MANTISSA_DIGITS: usize = 36;

/// A parsed Kubernetes quantity.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Quantity {
    raw: String,
    negative: bool,
    mantissa: u128,
    /// Power of ten applied to the mantissa.
    exponent: i32,
    /// Power of two applied to the mantissa.
    binary: u32,
}

impl Quantity {
    /// Parse a quantity string.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidQuantity`] if the string is not a valid
    /// Kubernetes quantity.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |reason| CoreError::InvalidQuantity {
            input: input.to_string(),
            reason,
        };

        if input.is_empty() {
            return Err(invalid("empty string"));
        }

        let (negative, rest) = match input.as_bytes()[0] {
            b'-' => (true, &input[1..]),
            b'+' => (false, &input[1..]),
            _ => (false, input),
        };

        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, suffix) = rest.split_at(number_len);

        let (mantissa, fraction_digits) = parse_number(number).ok_or_else(|| {
            if number.len() > MAX_MANTISSA_DIGITS {
                invalid("too many digits")
            } else {
                invalid("expected a decimal number")
            }
        })?;

        let (suffix_exponent, binary) =
            parse_suffix(suffix).ok_or_else(|| invalid("unknown suffix"))?;
        let exponent = suffix_exponent
            .checked_sub(fraction_digits)
            .ok_or_else(|| invalid("exponent out of range"))?;

        Ok(Self {
            raw: input.to_string(),
            negative,
            mantissa,
            exponent,
            binary,
        })
    }

    /// Create a quantity from a whole number of base units.
    #[must_use]
    pub fn from_value(value: i64) -> Self {
        Self {
            raw: value.to_string(),
            negative: value < 0,
            mantissa: u128::from(value.unsigned_abs()),
            exponent: 0,
            binary: 0,
        }
    }

    /// Create a quantity from thousandths of a unit (`250` → `"250m"`).
    #[must_use]
    pub fn from_milli_value(milli: i64) -> Self {
        Self {
            raw: format!("{milli}m"),
            negative: milli < 0,
            mantissa: u128::from(milli.unsigned_abs()),
            exponent: -3,
            binary: 0,
        }
    }

    /// The quantity in base units, rounded up.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::QuantityOverflow`] if the value does not fit in an `i64`.
    pub fn value(&self) -> Result<i64> {
        self.scaled(0)
    }

    /// The quantity in thousandths of a unit, rounded up.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::QuantityOverflow`] if the value does not fit in an `i64`.
    pub fn milli_value(&self) -> Result<i64> {
        self.scaled(3)
    }

    /// The original string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether the quantity is below zero.
    #[must_use]
    pub const fn is_negative(&self) -> bool {
        self.negative && self.mantissa != 0
    }

    fn scaled(&self, extra_exponent: i32) -> Result<i64> {
        let overflow = || CoreError::QuantityOverflow(self.raw.clone());

        let mut magnitude = self
            .mantissa
            .checked_mul(2u128.checked_pow(self.binary).ok_or_else(overflow)?)
            .ok_or_else(overflow)?;

        let exponent = self
            .exponent
            .checked_add(extra_exponent)
            .ok_or_else(overflow)?;
        if exponent >= 0 {
            let factor = 10u128
                .checked_pow(exponent.unsigned_abs())
                .ok_or_else(overflow)?;
            magnitude = magnitude.checked_mul(factor).ok_or_else(overflow)?;
        } else {
            magnitude = match 10u128.checked_pow(exponent.unsigned_abs()) {
                // Rounding is towards positive infinity for both signs.
                Some(divisor) if self.negative => magnitude / divisor,
                Some(divisor) => magnitude.div_ceil(divisor),
                None if self.negative || magnitude == 0 => 0,
                None => 1,
            };
        }

        let magnitude = i64::try_from(magnitude).map_err(|_| overflow())?;
        Ok(if self.negative { -magnitude } else { magnitude })
    }
}

/// Parse `digits[.digits]` into a mantissa and the number of fractional digits.
fn parse_number(number: &str) -> Option<(u128, i32)> {
    let (whole, fraction) = match number.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (number, ""),
    };

    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if fraction.contains('.') {
        return None;
    }

    let digits = whole.trim_start_matches('0').len() + fraction.len();
    if digits > MAX_MANTISSA_DIGITS {
        return None;
    }

    let mut mantissa: u128 = 0;
    for c in whole.chars().chain(fraction.chars()) {
        let digit = c.to_digit(10)?;
        mantissa = mantissa.checked_mul(10)?.checked_add(u128::from(digit))?;
    }

    let fraction_digits = i32::try_from(fraction.len()).ok()?;
    Some((mantissa, fraction_digits))
}

/// Map a suffix to `(power of ten, power of two)`.
fn parse_suffix(suffix: &str) -> Option<(i32, u32)> {
    let scale = match suffix {
        "" => (0, 0),
        "Ki" => (0, 10),
        "Mi" => (0, 20),
        "Gi" => (0, 30),
        "Ti" => (0, 40),
        "Pi" => (0, 50),
        "Ei" => (0, 60),
        "n" => (-9, 0),
        "u" => (-6, 0),
        "m" => (-3, 0),
        "k" => (3, 0),
        "M" => (6, 0),
        "G" => (9, 0),
        "T" => (12, 0),
        "P" => (15, 0),
        "E" => (18, 0),
        _ => {
            let exponent = suffix
                .strip_prefix('e')
                .or_else(|| suffix.strip_prefix('E'))?;
            (exponent.parse::<i32>().ok()?, 0)
        }
    };
    Some(scale)
}

impl FromStr for Quantity {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Debug for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Quantity({})", self.raw)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl TryFrom<String> for Quantity {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Quantity> for String {
    fn from(quantity: Quantity) -> Self {
        quantity.raw
    }
}
