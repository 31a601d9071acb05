// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.
#![allow(
    clippy::arithmetic_side_effects,
    clippy::as_conversions,
    clippy::pattern_type_mismatch
)]

use core::cmp::Ordering;
use core::fmt;
use core::str::FromStr;

use anyhow::{anyhow, bail, Result};
use num_bigint::{BigInt, Sign};
use num_traits::{One, Signed, ToPrimitive, Zero};

use serde::ser::Serializer;
use serde::Serialize;

/// Arbitrary precision decimal: `digits * 10^-scale`.
///
/// Always normalized so that `digits` carries no trailing zeros while `scale > 0`.
/// Two equal numbers therefore have identical representations.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Number {
    digits: BigInt,
    scale: u32,
}

/// Largest number of fractional digits, and largest decimal shift accepted
/// from an exponent.
pub const MAX_SCALE: u32 = 10_000;

fn checked_scale(scale: i64) -> Result<u32> {
    match u32::try_from(scale) {
        Ok(scale) if scale <= MAX_SCALE => Ok(scale),
        _ => bail!("Number exceeds the supported precision of {MAX_SCALE} digits."),
    }
}

fn pow10(exp: u32) -> BigInt {
    num_traits::pow(BigInt::from(10u8), exp as usize)
}

fn gcd(a: &BigInt, b: &BigInt) -> BigInt {
    let mut a = a.abs();
    let mut b = b.abs();
    while !b.is_zero() {
        let r = &a % &b;
        a = b;
        b = r;
    }
    a
}

impl Number {
    fn new(digits: BigInt, scale: u32) -> Self {
        let mut n = Self { digits, scale };
        n.normalize();
        n
    }

    fn normalize(&mut self) {
        if self.digits.is_zero() {
            self.scale = 0;
            return;
        }
        let ten = BigInt::from(10u8);
        while self.scale > 0 && (&self.digits % &ten).is_zero() {
            self.digits /= &ten;
            self.scale -= 1;
        }
    }

    /// Both digit sequences rescaled to the larger of the two scales.
    fn aligned(&self, other: &Number) -> (BigInt, BigInt, u32) {
        let scale = self.scale.max(other.scale);
        let a = &self.digits * pow10(scale - self.scale);
        let b = &other.digits * pow10(scale - other.scale);
        (a, b, scale)
    }

    pub fn zero() -> Self {
        Self {
            digits: BigInt::zero(),
            scale: 0,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.digits.is_zero()
    }

    pub fn is_integer(&self) -> bool {
        self.scale == 0
    }

    pub fn is_negative(&self) -> bool {
        self.digits.is_negative()
    }

    pub fn as_i64(&self) -> Option<i64> {
        if self.scale == 0 {
            self.digits.to_i64()
        } else {
            None
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.to_string().parse::<f64>().ok()
    }

    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        Number::from_str(&format!("{value}")).ok()
    }

    pub fn add(&self, other: &Number) -> Number {
        let (a, b, scale) = self.aligned(other);
        Number::new(a + b, scale)
    }

    pub fn sub(&self, other: &Number) -> Number {
        let (a, b, scale) = self.aligned(other);
        Number::new(a - b, scale)
    }

    /// Exact product. Fails when the product needs more than [`MAX_SCALE`]
    /// fractional digits.
    pub fn mul(&self, other: &Number) -> Result<Number> {
        let scale = checked_scale(i64::from(self.scale) + i64::from(other.scale))?;
        Ok(Number::new(&self.digits * &other.digits, scale))
    }

    pub fn neg(&self) -> Number {
        Number::new(-&self.digits, self.scale)
    }

    /// Exact quotient. Fails on a zero divisor or on a quotient whose decimal
    /// expansion does not terminate.
    pub fn divide(&self, other: &Number) -> Result<Number> {
        if other.is_zero() {
            bail!("Division by zero.");
        }
        let common = gcd(&self.digits, &other.digits);
        let mut numerator = &self.digits / &common;
        let mut denominator = &other.digits / &common;
        if denominator.is_negative() {
            numerator = -numerator;
            denominator = -denominator;
        }

        // A terminating expansion exists iff the reduced denominator is 2^x * 5^y.
        let (mut twos, mut fives) = (0u32, 0u32);
        let mut rest = denominator.clone();
        let two = BigInt::from(2u8);
        let five = BigInt::from(5u8);
        while (&rest % &two).is_zero() {
            rest /= &two;
            twos += 1;
        }
        while (&rest % &five).is_zero() {
            rest /= &five;
            fives += 1;
        }
        if !rest.is_one() {
            bail!("Division result {self} / {other} is not representable as a finite decimal.");
        }

        let extra = twos.max(fives);
        let scale = i64::from(extra) + i64::from(self.scale) - i64::from(other.scale);
        let shift = checked_scale(scale.abs())?;
        let digits = numerator * pow10(extra) / denominator;
        if scale >= 0 {
            Ok(Number::new(digits, shift))
        } else {
            Ok(Number::new(digits * pow10(shift), 0))
        }
    }

    /// Remainder with the sign of the divisor's magnitude: never negative.
    pub fn modulo(&self, other: &Number) -> Result<Number> {
        if other.is_zero() {
            bail!("Division by zero.");
        }
        let (a, b, scale) = self.aligned(other);
        let mut r = a % &b;
        if r.is_negative() {
            r += b.abs();
        }
        Ok(Number::new(r, scale))
    }

    fn format_decimal(&self) -> String {
        let magnitude = self.digits.abs().to_string();
        let sign = if self.digits.sign() == Sign::Minus {
            "-"
        } else {
            ""
        };
        let scale = self.scale as usize;
        if scale == 0 {
            return format!("{sign}{magnitude}");
        }
        if magnitude.len() > scale {
            let (int, frac) = magnitude.split_at(magnitude.len() - scale);
            format!("{sign}{int}.{frac}")
        } else {
            let zeros = "0".repeat(scale - magnitude.len());
            format!("{sign}0.{zeros}{magnitude}")
        }
    }
}

impl Default for Number {
    fn default() -> Self {
        Number::zero()
    }
}

impl FromStr for Number {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let text = s.trim();
        let (mantissa, exponent) = match text.find(['e', 'E']) {
            Some(idx) => {
                let exp = text[idx + 1..]
                    .parse::<i64>()
                    .map_err(|_| anyhow!("invalid exponent in {s}"))?;
                (&text[..idx], exp)
            }
            None => (text, 0),
        };

        let (negative, unsigned) = match mantissa.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, mantissa.strip_prefix('+').unwrap_or(mantissa)),
        };
        let (int, frac) = match unsigned.split_once('.') {
            Some((i, f)) => (i, f),
            None => (unsigned, ""),
        };
        if int.is_empty() && frac.is_empty() {
            bail!("invalid number {s}");
        }
        if !int.chars().chain(frac.chars()).all(|c| c.is_ascii_digit()) {
            bail!("invalid number {s}");
        }

        let all_digits = format!("{int}{frac}");
        let mut digits = BigInt::from_str(if all_digits.is_empty() {
            "0"
        } else {
            &all_digits
        })
        .map_err(|_| anyhow!("invalid number {s}"))?;
        if negative {
            digits = -digits;
        }

        let out_of_range = || anyhow!("number {s} out of range");
        let scale = (frac.len() as i64)
            .checked_sub(exponent)
            .ok_or_else(out_of_range)?;
        if scale >= 0 {
            let scale = checked_scale(scale).map_err(|_| out_of_range())?;
            Ok(Number::new(digits, scale))
        } else {
            let shift = checked_scale(-scale).map_err(|_| out_of_range())?;
            Ok(Number::new(digits * pow10(shift), 0))
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_decimal())
    }
}

impl fmt::Debug for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_decimal())
    }
}

impl Ord for Number {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, b, _) = self.aligned(other);
        a.cmp(&b)
    }
}

impl PartialOrd for Number {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Serialize for Number {
    fn serialize<S>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = self.format_decimal();
        let v = serde_json::Number::from_str(&s)
            .map_err(|_| serde::ser::Error::custom("could not serialize number"))?;
        v.serialize(serializer)
    }
}

impl From<BigInt> for Number {
    fn from(value: BigInt) -> Self {
        Number::new(value, 0)
    }
}

impl From<i64> for Number {
    fn from(value: i64) -> Self {
        Number::new(BigInt::from(value), 0)
    }
}

impl From<i32> for Number {
    fn from(value: i32) -> Self {
        Number::new(BigInt::from(value), 0)
    }
}

impl From<u64> for Number {
    fn from(value: u64) -> Self {
        Number::new(BigInt::from(value), 0)
    }
}

impl From<usize> for Number {
    fn from(value: usize) -> Self {
        Number::new(BigInt::from(value), 0)
    }
}
