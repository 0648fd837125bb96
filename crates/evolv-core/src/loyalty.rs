//! # Loyalty Accrual
//!
//! Evolv Points: earned on payment confirmation and once more as a delivery
//! bonus, redeemable 1 point = ₹1.
//!
//! ## Tiers
//! ```text
//! ┌────────┬──────────────────────┬──────────┐
//! │ Tier   │ Lifetime points      │ Rate     │
//! ├────────┼──────────────────────┼──────────┤
//! │ Bronze │ 0 – 1999             │ 1%       │
//! │ Silver │ 2000 – 4999          │ 2%       │
//! │ Gold   │ 5000+                │ 3%       │
//! └────────┴──────────────────────┴──────────┘
//! ```
//!
//! The tier used for an order is snapshotted at order creation, so a tier
//! change applies to the next order and never retroactively.

use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::money::Money;

/// Customer loyalty tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Bronze,
    Silver,
    Gold,
}

impl Tier {
    /// Lifetime points needed to reach Silver.
    pub const SILVER_THRESHOLD: i64 = 2_000;
    /// Lifetime points needed to reach Gold.
    pub const GOLD_THRESHOLD: i64 = 5_000;

    /// Tier for a cumulative lifetime point count.
    pub fn for_lifetime_points(points: i64) -> Tier {
        if points >= Self::GOLD_THRESHOLD {
            Tier::Gold
        } else if points >= Self::SILVER_THRESHOLD {
            Tier::Silver
        } else {
            Tier::Bronze
        }
    }

    /// Earning rate in basis points.
    pub const fn rate_bps(&self) -> i64 {
        match self {
            Tier::Bronze => 100,
            Tier::Silver => 200,
            Tier::Gold => 300,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Bronze => "bronze",
            Tier::Silver => "silver",
            Tier::Gold => "gold",
        }
    }
}

impl Default for Tier {
    fn default() -> Self {
        Tier::Bronze
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Points earned for an order total: floor(total × rate), in rupees.
///
/// ```rust
/// use evolv_core::loyalty::{points_for_total, Tier};
/// use evolv_core::money::Money;
///
/// assert_eq!(points_for_total(Money::from_paise(309_999), Tier::Bronze), 30);
/// assert_eq!(points_for_total(Money::from_paise(309_999), Tier::Gold), 92);
/// ```
pub fn points_for_total(total: Money, tier: Tier) -> i64 {
    if !total.is_positive() {
        return 0;
    }
    (total.paise() as i128 * tier.rate_bps() as i128 / (10_000 * 100)) as i64
}

/// Why a ledger entry exists. Each kind has at most one entry per order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum LedgerKind {
    /// Accrual on payment confirmation.
    Earn,
    /// One-time delivery bonus.
    Bonus,
    /// Point redemption, deducted on payment confirmation.
    Redeem,
}

impl LedgerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerKind::Earn => "earn",
            LedgerKind::Bonus => "bonus",
            LedgerKind::Redeem => "redeem",
        }
    }

    /// Idempotency key of this entry for an order.
    pub fn idempotency_key(&self, order_id: &str) -> String {
        format!("{}:{}", self.as_str(), order_id)
    }

    /// Sign applied to the entry's points.
    pub fn sign(&self) -> i64 {
        match self {
            LedgerKind::Redeem => -1,
            _ => 1,
        }
    }
}

/// A customer's points account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LoyaltyAccount {
    pub customer_id: String,
    /// Spendable points (earned + bonus − redeemed).
    pub balance: i64,
    /// All points ever earned; drives the tier.
    pub lifetime_points: i64,
    pub tier: Tier,
}

impl LoyaltyAccount {
    pub fn new(customer_id: impl Into<String>) -> Self {
        LoyaltyAccount {
            customer_id: customer_id.into(),
            balance: 0,
            lifetime_points: 0,
            tier: Tier::Bronze,
        }
    }

    /// Applies a ledger entry. Earned points raise the lifetime count and
    /// may promote the tier; redemptions only lower the balance.
    pub fn apply(&mut self, kind: LedgerKind, points: i64) {
        match kind {
            LedgerKind::Earn | LedgerKind::Bonus => {
                self.balance += points;
                self.lifetime_points += points;
                self.tier = Tier::for_lifetime_points(self.lifetime_points);
            }
            LedgerKind::Redeem => {
                self.balance -= points;
            }
        }
    }

    /// Balance minus points held by unpaid orders.
    pub fn available(&self, held: i64) -> i64 {
        (self.balance - held).max(0)
    }
}
