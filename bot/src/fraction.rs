// bot/src/fraction.rs
//! Exact signed rational arithmetic over `I256`.
//!
//! Token amounts, income bounds and price impacts are compared as fractions so
//! that threshold checks never go through floating point. Conversion back to a
//! token amount always rounds toward zero.

use ethers::types::{I256, U256};
use num_traits::{One, Zero};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};

const BPS_DENOMINATOR: i64 = 10_000;

/// A reduced fraction with a strictly positive denominator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fraction {
    numerator: I256,
    denominator: I256,
}

impl Fraction {
    /// Builds `numerator / denominator`; `None` when the denominator is zero.
    pub fn new(numerator: I256, denominator: I256) -> Option<Self> {
        if denominator.is_zero() {
            return None;
        }
        let (numerator, denominator) = if denominator.is_negative() {
            (-numerator, -denominator)
        } else {
            (numerator, denominator)
        };
        Some(Self::reduced(numerator, denominator))
    }

    pub fn from_integer(value: I256) -> Self {
        Self { numerator: value, denominator: I256::one() }
    }

    /// Unsigned token amount as a whole-number fraction.
    ///
    /// Amounts above `I256::MAX` saturate; no ERC-20 supply gets there.
    pub fn from_amount(amount: U256) -> Self {
        Self::from_integer(I256::try_from(amount).unwrap_or(I256::MAX))
    }

    /// `a / b` for two unsigned amounts.
    pub fn ratio(a: U256, b: U256) -> Option<Self> {
        let a = I256::try_from(a).ok()?;
        let b = I256::try_from(b).ok()?;
        Self::new(a, b)
    }

    /// Basis points, e.g. `500` is 5%.
    pub fn from_bps(bps: u32) -> Self {
        Self::reduced(I256::from(bps), I256::from(BPS_DENOMINATOR))
    }

    pub fn numerator(&self) -> I256 {
        self.numerator
    }

    pub fn denominator(&self) -> I256 {
        self.denominator
    }

    pub fn is_negative(&self) -> bool {
        self.numerator.is_negative()
    }

    /// Integer part, truncated toward zero.
    pub fn to_integer_toward_zero(&self) -> I256 {
        self.numerator / self.denominator
    }

    /// Scales an unsigned amount by this fraction, truncating toward zero.
    /// Negative results clamp to zero.
    pub fn apply_to(&self, amount: U256) -> U256 {
        let scaled = (Self::from_amount(amount) * *self).to_integer_toward_zero();
        if scaled.is_negative() {
            U256::zero()
        } else {
            scaled.into_raw()
        }
    }

    /// Renders the fraction as a percentage with two decimals ("0.90%").
    pub fn percent_string(&self) -> String {
        let hundredths = (self.numerator * I256::from(BPS_DENOMINATOR)) / self.denominator;
        let sign = if hundredths.is_negative() { "-" } else { "" };
        let magnitude = hundredths.unsigned_abs();
        let whole = magnitude / U256::from(100u64);
        let rest = (magnitude % U256::from(100u64)).as_u64();
        format!("{sign}{whole}.{rest:02}%")
    }

    fn reduced(numerator: I256, denominator: I256) -> Self {
        let divisor = gcd(numerator.unsigned_abs(), denominator.unsigned_abs());
        if divisor <= U256::one() {
            return Self { numerator, denominator };
        }
        // Both magnitudes fit in I256, so their divisor does too.
        let divisor = I256::from_raw(divisor);
        Self { numerator: numerator / divisor, denominator: denominator / divisor }
    }
}

fn gcd(mut a: U256, mut b: U256) -> U256 {
    while !b.is_zero() {
        let r = a % b;
        a = b;
        b = r;
    }
    a
}

impl Add for Fraction {
    type Output = Fraction;

    fn add(self, rhs: Fraction) -> Fraction {
        Fraction::reduced(
            self.numerator * rhs.denominator + rhs.numerator * self.denominator,
            self.denominator * rhs.denominator,
        )
    }
}

impl Sub for Fraction {
    type Output = Fraction;

    fn sub(self, rhs: Fraction) -> Fraction {
        self + (-rhs)
    }
}

impl Mul for Fraction {
    type Output = Fraction;

    fn mul(self, rhs: Fraction) -> Fraction {
        Fraction::reduced(self.numerator * rhs.numerator, self.denominator * rhs.denominator)
    }
}

impl Neg for Fraction {
    type Output = Fraction;

    fn neg(self) -> Fraction {
        Fraction { numerator: -self.numerator, denominator: self.denominator }
    }
}

impl Zero for Fraction {
    fn zero() -> Self {
        Fraction::from_integer(I256::zero())
    }

    fn is_zero(&self) -> bool {
        self.numerator.is_zero()
    }
}

impl One for Fraction {
    fn one() -> Self {
        Fraction::from_integer(I256::one())
    }
}

impl PartialOrd for Fraction {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Fraction {
    fn cmp(&self, other: &Self) -> Ordering {
        // Denominators are positive, so cross-multiplying keeps the order.
        (self.numerator * other.denominator).cmp(&(other.numerator * self.denominator))
    }
}

impl fmt::Display for Fraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frac(n: i64, d: i64) -> Fraction {
        Fraction::new(I256::from(n), I256::from(d)).unwrap()
    }

    #[test]
    fn zero_denominator_is_rejected() {
        assert!(Fraction::new(I256::one(), I256::zero()).is_none());
    }

    #[test]
    fn sign_moves_to_numerator() {
        let f = frac(3, -6);
        assert_eq!(f.numerator(), I256::from(-1));
        assert_eq!(f.denominator(), I256::from(2));
    }

    #[test]
    fn rounds_toward_zero_for_both_signs() {
        assert_eq!(frac(7, 2).to_integer_toward_zero(), I256::from(3));
        assert_eq!(frac(-7, 2).to_integer_toward_zero(), I256::from(-3));
    }

    #[test]
    fn ordering_compares_exactly() {
        let impact = frac(9, 1000);
        let threshold = Fraction::from_bps(50);
        assert!(impact > threshold);
        assert!(frac(2, 1000) < threshold);
        assert_eq!(frac(5, 1000).cmp(&threshold), Ordering::Equal);
    }

    #[test]
    fn arithmetic_reduces() {
        let sum = frac(1, 3) + frac(1, 6);
        assert_eq!(sum, frac(1, 2));
        assert_eq!(frac(1, 2) - frac(3, 4), frac(-1, 4));
        assert_eq!(frac(2, 3) * frac(3, 4), frac(1, 2));
        assert!(Fraction::zero().is_zero());
    }

    #[test]
    fn applies_backoff_ratio() {
        let backoff = Fraction::from_bps(7_500);
        assert_eq!(backoff.apply_to(U256::from(1_000u64)), U256::from(750u64));
        assert_eq!(backoff.apply_to(U256::from(3u64)), U256::from(2u64));
    }

    #[test]
    fn formats_percentages() {
        assert_eq!(frac(9, 1000).percent_string(), "0.90%");
        assert_eq!(Fraction::from_bps(500).percent_string(), "5.00%");
        assert_eq!(frac(-1, 40).percent_string(), "-2.50%");
    }
}
