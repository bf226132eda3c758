//! Kubernetes resource quantity parsing.
//!
//! A quantity such as `500Mi`, `1.5Gi`, `100m` or `-2e9` is held in one of
//! two forms: an exact `i64` when the value is an integer that fits, or an
//! arbitrary-precision decimal otherwise. Callers only ever ask for the
//! sign, so the decimal form is never forced through a lossy cast.
//!
//! Parsing is bounded by the input length. Exponents are kept symbolic in
//! the decimal form, so `1e2000000000` costs the same as `1e2`.

use std::cmp::Ordering;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use thiserror::Error;

/// Largest number of significant digits an `i128` can always hold.
const MAX_I128_DIGITS: usize = 38;

/// Sign of a quantity
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sign {
    Negative,
    Zero,
    Positive,
}

impl Sign {
    /// Whether the value is strictly below zero
    pub fn is_negative(self) -> bool {
        self == Sign::Negative
    }
}

impl From<Ordering> for Sign {
    fn from(ordering: Ordering) -> Self {
        match ordering {
            Ordering::Less => Sign::Negative,
            Ordering::Equal => Sign::Zero,
            Ordering::Greater => Sign::Positive,
        }
    }
}

/// Errors produced while parsing a quantity string
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QuantityError {
    #[error("quantities must match the regular expression '^([+-]?[0-9.]+)([eEinumkKMGTP]*[-+]?[0-9]*)$'")]
    Empty,

    #[error("quantity {0:?} has no numeric part")]
    MissingNumber(String),

    #[error("quantity {0:?} is not a valid number")]
    InvalidNumber(String),

    #[error("quantity {quantity:?} has unknown suffix {suffix:?}")]
    UnknownSuffix { quantity: String, suffix: String },

    #[error("quantity {0:?} has an exponent outside the 32-bit range")]
    ExponentOutOfRange(String),
}

/// A parsed quantity: exact integer when possible, decimal otherwise.
#[derive(Clone, Debug, PartialEq)]
pub enum ParsedQuantity {
    Int(i64),
    Dec(BigDecimal),
}

impl ParsedQuantity {
    /// Parse a quantity in Kubernetes canonical notation.
    pub fn parse(input: &str) -> Result<Self, QuantityError> {
        let parts = Parts::split(input)?;
        match parts.exact_int() {
            Some(value) => Ok(ParsedQuantity::Int(value)),
            None => parts.to_decimal().map(ParsedQuantity::Dec),
        }
    }

    /// Sign of the value.
    ///
    /// The integer form is consulted directly; the decimal form is only
    /// compared against zero.
    pub fn sign(&self) -> Sign {
        match self {
            ParsedQuantity::Int(value) => value.cmp(&0).into(),
            ParsedQuantity::Dec(value) => value.cmp(&BigDecimal::from(0)).into(),
        }
    }

    /// The exact integer value, if it has one that fits in an `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParsedQuantity::Int(value) => Some(*value),
            ParsedQuantity::Dec(_) => None,
        }
    }
}

impl FromStr for ParsedQuantity {
    type Err = QuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Multiplier selected by the suffix
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Base {
    /// Power of 1024 (`Ki` = 1 .. `Ei` = 6)
    Binary(u32),
    /// Power of 10 (SI suffixes and `e` exponents)
    Decimal(i32),
}

/// Lexical pieces of a quantity string
#[derive(Debug)]
struct Parts<'a> {
    negative: bool,
    whole: &'a str,
    fraction: &'a str,
    base: Base,
}

impl<'a> Parts<'a> {
    fn split(input: &'a str) -> Result<Self, QuantityError> {
        if input.is_empty() {
            return Err(QuantityError::Empty);
        }

        let (negative, rest) = if let Some(rest) = input.strip_prefix('-') {
            (true, rest)
        } else if let Some(rest) = input.strip_prefix('+') {
            (false, rest)
        } else {
            (false, input)
        };

        let number_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, suffix) = rest.split_at(number_end);

        let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
        if fraction.contains('.') {
            return Err(QuantityError::InvalidNumber(input.to_string()));
        }
        if whole.is_empty() && fraction.is_empty() {
            return Err(QuantityError::MissingNumber(input.to_string()));
        }

        let base = parse_suffix(input, suffix)?;

        Ok(Self {
            negative,
            whole,
            fraction,
            base,
        })
    }

    /// Exact integer value, or `None` when the value has a fractional part
    /// or does not fit in an `i64`.
    fn exact_int(&self) -> Option<i64> {
        let digits = format!("{}{}", self.whole, self.fraction);
        let digits = digits.trim_start_matches('0');
        let significant = digits.trim_end_matches('0');
        if significant.is_empty() {
            return Some(0);
        }
        if significant.len() > MAX_I128_DIGITS {
            return None;
        }

        let mut scale = (digits.len() - significant.len()) as i64 - self.fraction.len() as i64;
        let mut value: i128 = significant.parse().ok()?;

        match self.base {
            Base::Binary(power) => value = value.checked_mul(1i128 << (10 * power))?,
            Base::Decimal(exponent) => scale += i64::from(exponent),
        }

        match scale.cmp(&0) {
            Ordering::Greater => {
                let factor = 10i128.checked_pow(u32::try_from(scale).ok()?)?;
                value = value.checked_mul(factor)?;
            }
            Ordering::Less => {
                let divisor = 10i128.checked_pow(u32::try_from(-scale).ok()?)?;
                if value % divisor != 0 {
                    return None;
                }
                value /= divisor;
            }
            Ordering::Equal => {}
        }

        if self.negative {
            value = -value;
        }
        i64::try_from(value).ok()
    }

    fn to_decimal(&self) -> Result<BigDecimal, QuantityError> {
        let whole = if self.whole.is_empty() { "0" } else { self.whole };
        let fraction = if self.fraction.is_empty() { "0" } else { self.fraction };
        let sign = if self.negative { "-" } else { "" };
        let exponent = match self.base {
            Base::Decimal(exponent) => exponent,
            Base::Binary(_) => 0,
        };

        let literal = format!("{sign}{whole}.{fraction}e{exponent}");
        let value = BigDecimal::from_str(&literal)
            .map_err(|_| QuantityError::InvalidNumber(literal.clone()))?;

        Ok(match self.base {
            Base::Binary(power) => value * BigDecimal::from(1i64 << (10 * power)),
            Base::Decimal(_) => value,
        })
    }
}

fn parse_suffix(input: &str, suffix: &str) -> Result<Base, QuantityError> {
    let base = match suffix {
        "" => Base::Decimal(0),
        "n" => Base::Decimal(-9),
        "u" => Base::Decimal(-6),
        "m" => Base::Decimal(-3),
        "k" => Base::Decimal(3),
        "M" => Base::Decimal(6),
        "G" => Base::Decimal(9),
        "T" => Base::Decimal(12),
        "P" => Base::Decimal(15),
        "E" => Base::Decimal(18),
        "Ki" => Base::Binary(1),
        "Mi" => Base::Binary(2),
        "Gi" => Base::Binary(3),
        "Ti" => Base::Binary(4),
        "Pi" => Base::Binary(5),
        "Ei" => Base::Binary(6),
        _ => {
            let unknown = || QuantityError::UnknownSuffix {
                quantity: input.to_string(),
                suffix: suffix.to_string(),
            };
            let exponent = suffix.strip_prefix(['e', 'E']).ok_or_else(unknown)?;
            let digits = exponent.strip_prefix(['+', '-']).unwrap_or(exponent);
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(unknown());
            }
            let exponent = exponent
                .parse::<i32>()
                .map_err(|_| QuantityError::ExponentOutOfRange(input.to_string()))?;
            Base::Decimal(exponent)
        }
    };
    Ok(base)
}
