//! Integer minor-unit money representation.
//!
//! Every monetary field in the engine is an [`Amount`] of minor units (cents).
//! Conversion to display currency happens only at the boundary, so rounding
//! drift from floating-point dollars cannot enter settlement math.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::Neg;

/// A signed quantity of minor currency units (cents).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);
    pub const MAX: Amount = Amount(i64::MAX);

    pub const fn from_minor(minor_units: i64) -> Self {
        Amount(minor_units)
    }

    pub const fn minor(self) -> i64 {
        self.0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Scale by `numerator / denominator` in 128-bit space, truncating toward
    /// zero. Used for pool-share valuation where both factors fit in i64.
    pub fn mul_div(self, numerator: i64, denominator: i64) -> Option<Amount> {
        if denominator == 0 {
            return None;
        }
        let scaled = (self.0 as i128).checked_mul(numerator as i128)? / denominator as i128;
        i64::try_from(scaled).ok().map(Amount)
    }

    /// Split into `parts` shares that sum back to the original amount exactly.
    /// Each share is `self / parts`; the first `self % parts` shares carry one
    /// extra minor unit. Requires a non-negative amount.
    pub fn split_even(self, parts: usize) -> Vec<Amount> {
        assert!(parts > 0, "split_even requires at least one part");
        assert!(self.0 >= 0, "split_even requires a non-negative amount");
        let base = self.0 / parts as i64;
        let remainder = (self.0 % parts as i64) as usize;
        (0..parts)
            .map(|i| Amount(if i < remainder { base + 1 } else { base }))
            .collect()
    }

    /// Render as whole currency units with two decimals ("12.34").
    pub fn display_currency(self) -> String {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        format!("{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

impl Neg for Amount {
    type Output = Amount;

    fn neg(self) -> Amount {
        Amount(-self.0)
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Amount {
        iter.fold(Amount::ZERO, |acc, a| {
            Amount(acc.0.saturating_add(a.0))
        })
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
