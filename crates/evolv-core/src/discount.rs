//! # Discount Resolver
//!
//! Validates and prices exactly one discount against a cart subtotal: either
//! a promo code or a loyalty-point redemption, never both.
//!
//! ## Mutual Exclusivity
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  AppliedDiscount (one enum slot, so "both" cannot be represented)       │
//! │                                                                         │
//! │      None ──apply_promo──► Promo(SAVE10, ₹100)                          │
//! │        ▲                      │                                         │
//! │        │                 apply_points(50)                               │
//! │      clear                    │                                         │
//! │        │                      ▼                                         │
//! │        └─────────────── Points(50, ₹50) ──apply_promo──► Promo(..)      │
//! │                                                                         │
//! │  A failed application leaves the previous selection untouched.         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Points are only *priced* here. The balance is reserved when the order is
//! placed and deducted once, when payment is confirmed (see the engine).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::DiscountError;
use crate::money::Money;
use crate::POINT_VALUE;

// =============================================================================
// Promo Definitions
// =============================================================================

/// Promo discount type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum PromoKind {
    /// `value` is a whole percentage (10 = 10% off).
    Percentage,
    /// `value` is an amount in paise.
    Fixed,
}

/// A promo code from the promo catalogue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PromoCode {
    /// Always upper-case.
    pub code: String,
    pub kind: PromoKind,
    pub value: i64,
    pub description: String,
    pub min_order: Option<Money>,
    #[ts(as = "Option<String>")]
    pub valid_from: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub expires_at: Option<DateTime<Utc>>,
    pub active: bool,
    pub usage_limit: Option<i64>,
    /// Redemptions already counted plus those reserved by unpaid orders.
    pub used_count: i64,
}

impl PromoCode {
    /// Prices this promo against a tax-inclusive subtotal.
    ///
    /// ## Checks (in order)
    /// 1. inactive → `INVALID_CODE`
    /// 2. before `valid_from`, at/after `expires_at`, or usage exhausted → `EXPIRED`
    /// 3. subtotal below `min_order` → `MIN_ORDER_NOT_MET`
    pub fn evaluate(
        &self,
        subtotal: Money,
        now: DateTime<Utc>,
    ) -> Result<PromoApplication, DiscountError> {
        if !self.active {
            return Err(DiscountError::InvalidCode {
                code: self.code.clone(),
            });
        }

        let not_started = self.valid_from.is_some_and(|from| now < from);
        let ended = self.expires_at.is_some_and(|until| now >= until);
        let used_up = self
            .usage_limit
            .is_some_and(|limit| self.used_count >= limit);
        if not_started || ended || used_up {
            return Err(DiscountError::Expired {
                code: self.code.clone(),
            });
        }

        if let Some(minimum) = self.min_order {
            if subtotal < minimum {
                return Err(DiscountError::MinOrderNotMet {
                    code: self.code.clone(),
                    minimum,
                });
            }
        }

        let discount_amount = match self.kind {
            PromoKind::Percentage => subtotal.percentage_bps((self.value.clamp(0, 100) * 100) as u32),
            PromoKind::Fixed => Money::from_paise(self.value.max(0)),
        }
        .min(subtotal);

        Ok(PromoApplication {
            code: self.code.clone(),
            kind: self.kind,
            value: self.value,
            discount_amount,
            description: self.description.clone(),
        })
    }
}

/// Normalises a customer-typed promo code.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

// =============================================================================
// Applied Discounts
// =============================================================================

/// A priced promo code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PromoApplication {
    pub code: String,
    pub kind: PromoKind,
    pub value: i64,
    pub discount_amount: Money,
    pub description: String,
}

/// A priced loyalty-point redemption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PointsRedemption {
    pub points: i64,
    pub discount_amount: Money,
    /// Available balance when the redemption was priced.
    pub available_points: i64,
}

/// Prices a point redemption.
pub fn evaluate_points(
    points: i64,
    available: i64,
    subtotal: Money,
) -> Result<PointsRedemption, DiscountError> {
    if points <= 0 {
        return Err(DiscountError::NonPositivePoints);
    }
    if points > available {
        return Err(DiscountError::InsufficientBalance {
            requested: points,
            available,
        });
    }
    let discount_amount = POINT_VALUE * points;
    if discount_amount > subtotal {
        return Err(DiscountError::ExceedsSubtotal {
            requested: points,
            subtotal,
        });
    }
    Ok(PointsRedemption {
        points,
        discount_amount,
        available_points: available,
    })
}

/// The single active discount on a cart or order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, Default)]
#[ts(export)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppliedDiscount {
    #[default]
    None,
    Promo(PromoApplication),
    Points(PointsRedemption),
}

impl AppliedDiscount {
    pub fn amount(&self) -> Money {
        match self {
            AppliedDiscount::None => Money::zero(),
            AppliedDiscount::Promo(p) => p.discount_amount,
            AppliedDiscount::Points(p) => p.discount_amount,
        }
    }

    pub fn promo(&self) -> Option<&PromoApplication> {
        match self {
            AppliedDiscount::Promo(p) => Some(p),
            _ => None,
        }
    }

    pub fn points(&self) -> Option<&PointsRedemption> {
        match self {
            AppliedDiscount::Points(p) => Some(p),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, AppliedDiscount::None)
    }
}

/// What the customer asked for at checkout. Re-resolved on the server; the
/// client never sends a discount amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, Default)]
#[ts(export)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiscountRequest {
    #[default]
    None,
    Promo { code: String },
    Points { points: i64 },
}

// =============================================================================
// Resolver
// =============================================================================

/// Holds the current discount selection for a cart.
#[derive(Debug, Clone, Default)]
pub struct DiscountResolver {
    applied: AppliedDiscount,
}

impl DiscountResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a promo code, clearing any point redemption.
    ///
    /// `promo` is the catalogue lookup result for `code` (None when unknown).
    pub fn apply_promo(
        &mut self,
        code: &str,
        promo: Option<&PromoCode>,
        subtotal: Money,
        now: DateTime<Utc>,
    ) -> Result<PromoApplication, DiscountError> {
        let code = normalize_code(code);
        let promo = promo
            .filter(|p| p.code == code)
            .ok_or_else(|| DiscountError::InvalidCode { code: code.clone() })?;

        let application = promo.evaluate(subtotal, now)?;
        self.applied = AppliedDiscount::Promo(application.clone());
        Ok(application)
    }

    /// Applies a point redemption, clearing any promo code.
    pub fn apply_points(
        &mut self,
        points: i64,
        available: i64,
        subtotal: Money,
    ) -> Result<PointsRedemption, DiscountError> {
        let redemption = evaluate_points(points, available, subtotal)?;
        self.applied = AppliedDiscount::Points(redemption.clone());
        Ok(redemption)
    }

    pub fn clear(&mut self) {
        self.applied = AppliedDiscount::None;
    }

    pub fn applied(&self) -> &AppliedDiscount {
        &self.applied
    }

    pub fn into_applied(self) -> AppliedDiscount {
        self.applied
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
