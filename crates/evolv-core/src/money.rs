//! # Money Module
//!
//! Provides the `Money` type for handling rupee amounts safely.
//!
//! ## Why Integer Paise?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │  The storefront shows tax-inclusive prices. Extracting GST with floats: │
//! │    2999.99 / 1.05 = 2857.1333333333335                                  │
//! │  Summing per-line float bases drifts by a paisa on larger carts.        │
//! │                                                                         │
//! │  OUR SOLUTION: Integer Paise + one rounding step                        │
//! │    299999 * 10000 / 10500 = 285713.33 → 285713 (₹2857.13)               │
//! │    Rounded once, on the aggregate, half-up                              │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use evolv_core::money::Money;
//!
//! let price = Money::from_paise(149_900); // ₹1499.00
//! let doubled = price * 2u32;             // ₹2998.00
//! let total = price + Money::from_rupees(100);
//! assert_eq!(total.paise(), 159_900);
//! assert_eq!(doubled.paise(), 299_800);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};
use ts_rs::TS;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in paise (1/100 of a rupee).
///
/// ## Design Decisions
/// - **i64 (signed)**: Allows negative values for refunds and adjustments
/// - **Single field tuple struct**: Zero-cost abstraction over i64
/// - **Ord**: discounts are clamped with `min`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from paise (the smallest currency unit).
    #[inline]
    pub const fn from_paise(paise: i64) -> Self {
        Money(paise)
    }

    /// Creates a Money value from whole rupees.
    ///
    /// ```rust
    /// use evolv_core::money::Money;
    ///
    /// assert_eq!(Money::from_rupees(3000).paise(), 300_000);
    /// ```
    #[inline]
    pub const fn from_rupees(rupees: i64) -> Self {
        Money(rupees * 100)
    }

    /// Creates a Money value from rupees and paise.
    ///
    /// For negative amounts only the rupee part should be negative:
    /// `from_rupees_paise(-5, 50)` is -₹5.50.
    #[inline]
    pub const fn from_rupees_paise(rupees: i64, paise: i64) -> Self {
        if rupees < 0 {
            Money(rupees * 100 - paise)
        } else {
            Money(rupees * 100 + paise)
        }
    }

    /// Returns the value in paise.
    #[inline]
    pub const fn paise(&self) -> i64 {
        self.0
    }

    /// Returns the whole-rupee portion (truncated toward zero).
    #[inline]
    pub const fn rupees(&self) -> i64 {
        self.0 / 100
    }

    /// Returns the paise portion (always 0-99).
    #[inline]
    pub const fn paise_part(&self) -> i64 {
        (self.0 % 100).abs()
    }

    /// Returns zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Checks if the value is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checks if the value is positive (greater than zero).
    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Checks if the value is negative (less than zero).
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Returns the absolute value.
    #[inline]
    pub const fn abs(&self) -> Self {
        Money(self.0.abs())
    }

    /// Multiplies money by a quantity.
    #[inline]
    pub const fn multiply_quantity(&self, qty: i64) -> Self {
        Money(self.0 * qty)
    }

    /// Scales this amount by `numerator / denominator`, rounding half-up.
    ///
    /// This is the single rounding primitive of the pricing code. It works on
    /// i128 so an aggregate cart value never overflows the intermediate product.
    ///
    /// ```rust
    /// use evolv_core::money::Money;
    ///
    /// // ₹2999.99 inclusive of 5% GST → base ₹2857.13
    /// let base = Money::from_paise(299_999).scale_round_half_up(10_000, 10_500);
    /// assert_eq!(base.paise(), 285_713);
    /// ```
    pub fn scale_round_half_up(&self, numerator: i64, denominator: i64) -> Money {
        debug_assert!(denominator > 0);
        let product = self.0 as i128 * numerator as i128;
        let den = denominator as i128;
        let rounded = if product >= 0 {
            (2 * product + den) / (2 * den)
        } else {
            -((2 * -product + den) / (2 * den))
        };
        Money(rounded as i64)
    }

    /// Returns `bps` basis points of this amount, rounded half-up.
    ///
    /// ```rust
    /// use evolv_core::money::Money;
    ///
    /// // 10% of ₹1000
    /// assert_eq!(Money::from_rupees(1000).percentage_bps(1000), Money::from_rupees(100));
    /// ```
    #[inline]
    pub fn percentage_bps(&self, bps: u32) -> Money {
        self.scale_round_half_up(bps as i64, 10_000)
    }

    /// Returns the amount in whole rupees, rounded down (used for points).
    #[inline]
    pub const fn floor_rupees(&self) -> i64 {
        self.0.div_euclid(100)
    }

    /// Returns the amount, or zero if it is negative.
    #[inline]
    pub const fn clamp_non_negative(&self) -> Self {
        if self.0 < 0 {
            Money(0)
        } else {
            *self
        }
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Display shows rupees for logs and timeline messages. UI formatting
/// (lakh grouping, localisation) is done by the storefront.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}₹{}.{:02}", sign, self.rupees().abs(), self.paise_part())
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Mul<u32> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: u32) -> Self {
        Money(self.0 * qty as i64)
    }
}

impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_paise() {
        let money = Money::from_paise(1099);
        assert_eq!(money.paise(), 1099);
        assert_eq!(money.rupees(), 10);
        assert_eq!(money.paise_part(), 99);
    }

    #[test]
    fn test_from_rupees_paise() {
        assert_eq!(Money::from_rupees_paise(10, 99).paise(), 1099);
        assert_eq!(Money::from_rupees_paise(-5, 50).paise(), -550);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Money::from_paise(309_999)), "₹3099.99");
        assert_eq!(format!("{}", Money::from_paise(500)), "₹5.00");
        assert_eq!(format!("{}", Money::from_paise(-550)), "-₹5.50");
    }

    #[test]
    fn test_arithmetic() {
        let a = Money::from_paise(1000);
        let b = Money::from_paise(500);

        assert_eq!((a + b).paise(), 1500);
        assert_eq!((a - b).paise(), 500);
        assert_eq!((a * 3u32).paise(), 3000);
        let total: Money = vec![a, b, b].into_iter().sum();
        assert_eq!(total.paise(), 2000);
    }

    #[test]
    fn test_scale_round_half_up() {
        // exactly half a paisa rounds up
        assert_eq!(Money::from_paise(1).scale_round_half_up(1, 2).paise(), 1);
        // below half rounds down
        assert_eq!(Money::from_paise(1).scale_round_half_up(1, 3).paise(), 0);
        // negative values round away from zero on the half
        assert_eq!(Money::from_paise(-1).scale_round_half_up(1, 2).paise(), -1);
    }

    #[test]
    fn test_gst_extraction_scenario() {
        let inclusive = Money::from_paise(299_999);
        assert_eq!(inclusive.scale_round_half_up(10_000, 10_500).paise(), 285_713);
        assert_eq!(inclusive.scale_round_half_up(500, 10_500).paise(), 14_286);
    }

    #[test]
    fn test_floor_rupees() {
        assert_eq!(Money::from_paise(309_999).floor_rupees(), 3099);
        assert_eq!(Money::from_paise(99).floor_rupees(), 0);
    }

    #[test]
    fn test_clamp_non_negative() {
        assert_eq!(Money::from_paise(-10).clamp_non_negative(), Money::zero());
        assert_eq!(Money::from_paise(10).clamp_non_negative(), Money::from_paise(10));
    }
}
