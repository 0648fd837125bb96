//! # Pricing Calculator
//!
//! Turns cart lines + shipping state + discount selection into a
//! [`PriceBreakdown`]. This is the only place prices are computed: the
//! storefront preview calls it through the API and checkout calls it again
//! before creating the order, rejecting any client total that differs.
//!
//! ## Breakdown Pipeline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  lines (tax-inclusive unit price × qty)                                 │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  subtotal = Σ line totals                 (exact, paise)                │
//! │       │                                                                 │
//! │       ├──► base = round(subtotal × 10000 / 10500)   ← one rounding      │
//! │       ├──► tax  = round(subtotal ×   500 / 10500)   ← on the aggregate  │
//! │       │         │                                                       │
//! │       │         ├── home state? → CGST = ⌈tax/2⌉, SGST = tax − CGST     │
//! │       │         └── otherwise   → IGST = tax                            │
//! │       │                                                                 │
//! │       ├──► shipping = 0 if subtotal ≥ ₹3000 else ₹100                   │
//! │       │                                                                 │
//! │       └──► total = base + tax + shipping − discount   (≥ 0)             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The discount never touches the tax base: GST is always computed on the
//! pre-discount subtotal.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::cart::CartLine;
use crate::discount::AppliedDiscount;
use crate::error::ValidationError;
use crate::money::Money;
use crate::{FLAT_SHIPPING_FEE, FREE_SHIPPING_THRESHOLD, GST_RATE, HOME_STATE, HOME_STATE_ALIASES};

// =============================================================================
// Types
// =============================================================================

/// How GST is split on the invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaxBreakdown {
    /// Shipping within the home state: Central + State GST.
    Intrastate { cgst: Money, sgst: Money },
    /// Shipping to any other state: Integrated GST.
    Interstate { igst: Money },
}

impl TaxBreakdown {
    pub fn cgst(&self) -> Money {
        match self {
            TaxBreakdown::Intrastate { cgst, .. } => *cgst,
            TaxBreakdown::Interstate { .. } => Money::zero(),
        }
    }

    pub fn sgst(&self) -> Money {
        match self {
            TaxBreakdown::Intrastate { sgst, .. } => *sgst,
            TaxBreakdown::Interstate { .. } => Money::zero(),
        }
    }

    pub fn igst(&self) -> Money {
        match self {
            TaxBreakdown::Interstate { igst } => *igst,
            TaxBreakdown::Intrastate { .. } => Money::zero(),
        }
    }
}

/// Result of the pricing calculator. Snapshotted onto the order at creation
/// and never recomputed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PriceBreakdown {
    /// Tax-inclusive sum of line totals.
    pub subtotal: Money,
    /// Tax-exclusive amount.
    pub base_amount: Money,
    pub tax_amount: Money,
    pub tax_breakdown: TaxBreakdown,
    pub shipping_cost: Money,
    pub discount_amount: Money,
    pub total: Money,
}

// =============================================================================
// Calculator
// =============================================================================

/// Computes the price breakdown for a set of lines.
///
/// Pure and deterministic: the same inputs always produce an identical
/// breakdown, which is what lets the server compare against a client total.
pub fn compute_breakdown(
    lines: &[CartLine],
    shipping_state: &str,
    discount: &AppliedDiscount,
) -> PriceBreakdown {
    let subtotal: Money = lines.iter().map(CartLine::line_total).sum();

    let gst_bps = GST_RATE.bps() as i64;
    let base_amount = subtotal.scale_round_half_up(10_000, 10_000 + gst_bps);
    let tax_amount = subtotal.scale_round_half_up(gst_bps, 10_000 + gst_bps);

    let tax_breakdown = if is_home_state(shipping_state) {
        let cgst = Money::from_paise((tax_amount.paise() + 1) / 2);
        TaxBreakdown::Intrastate {
            cgst,
            sgst: tax_amount - cgst,
        }
    } else {
        TaxBreakdown::Interstate { igst: tax_amount }
    };

    let shipping_cost = shipping_for(subtotal);
    let discount_amount = discount.amount();
    let total = (base_amount + tax_amount + shipping_cost - discount_amount).clamp_non_negative();

    PriceBreakdown {
        subtotal,
        base_amount,
        tax_amount,
        tax_breakdown,
        shipping_cost,
        discount_amount,
        total,
    }
}

/// Shipping fee for a tax-inclusive subtotal.
///
/// Free at or above the threshold; an empty cart ships nothing and costs nothing.
pub fn shipping_for(subtotal: Money) -> Money {
    if subtotal.is_zero() || subtotal >= FREE_SHIPPING_THRESHOLD {
        Money::zero()
    } else {
        FLAT_SHIPPING_FEE
    }
}

/// Normalises a state name for comparison: lower-case, whitespace removed.
pub fn normalize_state(state: &str) -> String {
    state
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// True when the shipping state is the seller's home state.
pub fn is_home_state(state: &str) -> bool {
    let normalized = normalize_state(state);
    normalized == normalize_state(HOME_STATE) || HOME_STATE_ALIASES.contains(&normalized.as_str())
}

/// Rejects a client-submitted total that differs from the recomputed one.
pub fn verify_client_total(
    breakdown: &PriceBreakdown,
    submitted: Money,
) -> Result<(), ValidationError> {
    if breakdown.total != submitted {
        return Err(ValidationError::TotalMismatch {
            submitted,
            computed: breakdown.total,
        });
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discount::{PointsRedemption, PromoApplication, PromoKind};

    fn line(price_paise: i64, qty: u32) -> CartLine {
        CartLine {
            product_id: "kurta-07".to_string(),
            name: "Block Print Kurta".to_string(),
            size: "M".to_string(),
            color: "Indigo".to_string(),
            unit_price: Money::from_paise(price_paise),
            quantity: qty,
        }
    }

    #[test]
    fn test_home_state_scenario() {
        let b = compute_breakdown(&[line(299_999, 1)], "Tamil Nadu", &AppliedDiscount::None);
        assert_eq!(b.base_amount, Money::from_paise(285_713));
        assert_eq!(b.tax_amount, Money::from_paise(14_286));
        assert_eq!(
            b.tax_breakdown,
            TaxBreakdown::Intrastate {
                cgst: Money::from_paise(7_143),
                sgst: Money::from_paise(7_143),
            }
        );
        assert_eq!(b.shipping_cost, Money::from_rupees(100));
        assert_eq!(b.discount_amount, Money::zero());
        assert_eq!(b.total, Money::from_paise(309_999));
    }

    #[test]
    fn test_home_state_spellings() {
        for state in ["tamil nadu", "TAMIL NADU", "Tamilnadu", "  tamil   nadu ", "TamilNadu"] {
            assert!(is_home_state(state), "{state} should be home state");
        }
        assert!(!is_home_state("Karnataka"));
        assert!(!is_home_state(""));
    }

    #[test]
    fn test_interstate_is_igst() {
        let b = compute_breakdown(&[line(299_999, 1)], "Kerala", &AppliedDiscount::None);
        assert_eq!(
            b.tax_breakdown,
            TaxBreakdown::Interstate {
                igst: Money::from_paise(14_286)
            }
        );
        assert_eq!(b.tax_breakdown.cgst(), Money::zero());
        assert_eq!(b.tax_breakdown.sgst(), Money::zero());
    }

    #[test]
    fn test_odd_paisa_tax_split_still_sums() {
        // ₹106.00 → tax 505 paise
        let b = compute_breakdown(&[line(10_600, 1)], "Tamil Nadu", &AppliedDiscount::None);
        assert_eq!(b.tax_amount.paise(), 505);
        assert_eq!(b.tax_breakdown.cgst().paise(), 253);
        assert_eq!(b.tax_breakdown.sgst().paise(), 252);
        assert_eq!(b.tax_breakdown.cgst() + b.tax_breakdown.sgst(), b.tax_amount);
    }

    #[test]
    fn test_free_shipping_threshold_edge() {
        let at = compute_breakdown(&[line(300_000, 1)], "Kerala", &AppliedDiscount::None);
        assert_eq!(at.shipping_cost, Money::zero());

        let below = compute_breakdown(&[line(299_999, 1)], "Kerala", &AppliedDiscount::None);
        assert_eq!(below.shipping_cost, FLAT_SHIPPING_FEE);
    }

    #[test]
    fn test_discount_does_not_change_tax() {
        let promo = AppliedDiscount::Promo(PromoApplication {
            code: "SAVE10".to_string(),
            kind: PromoKind::Percentage,
            value: 10,
            discount_amount: Money::from_rupees(100),
            description: "10% off".to_string(),
        });
        let plain = compute_breakdown(&[line(100_000, 1)], "Kerala", &AppliedDiscount::None);
        let discounted = compute_breakdown(&[line(100_000, 1)], "Kerala", &promo);

        assert_eq!(plain.tax_amount, discounted.tax_amount);
        assert_eq!(plain.base_amount, discounted.base_amount);
        assert_eq!(discounted.total, plain.total - Money::from_rupees(100));
    }

    #[test]
    fn test_total_identity_holds() {
        let prices = [1, 99, 10_550, 49_900, 129_999, 250_001, 299_999, 300_000];
        for (i, &p) in prices.iter().enumerate() {
            let points = AppliedDiscount::Points(PointsRedemption {
                points: 1,
                discount_amount: Money::from_rupees(1).min(Money::from_paise(p)),
                available_points: 10,
            });
            let lines = vec![line(p, (i as u32 % 3) + 1), line(p / 2 + 7, 1)];
            let b = compute_breakdown(&lines, "Goa", &points);
            assert_eq!(
                b.total,
                b.base_amount + b.tax_amount + b.shipping_cost - b.discount_amount
            );
        }
    }

    #[test]
    fn test_aggregate_rounding_not_per_line() {
        // three lines of ₹0.31: per-line rounding would give 3 × 30 = 90 paise
        let lines = vec![line(31, 1), line(31, 1), line(31, 1)];
        let b = compute_breakdown(&lines, "Goa", &AppliedDiscount::None);
        assert_eq!(b.base_amount.paise(), 89);
        assert_eq!(b.tax_amount.paise(), 4);
    }

    #[test]
    fn test_breakdown_is_byte_stable() {
        let lines = vec![line(149_900, 2), line(89_950, 1)];
        let a = compute_breakdown(&lines, "tamilnadu", &AppliedDiscount::None);
        let b = compute_breakdown(&lines, "tamilnadu", &AppliedDiscount::None);
        assert_eq!(a, b);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_verify_client_total() {
        let b = compute_breakdown(&[line(299_999, 1)], "Tamil Nadu", &AppliedDiscount::None);
        assert!(verify_client_total(&b, Money::from_paise(309_999)).is_ok());
        let err = verify_client_total(&b, Money::from_paise(309_998)).unwrap_err();
        assert!(matches!(err, ValidationError::TotalMismatch { .. }));
    }

    #[test]
    fn test_empty_cart_costs_nothing() {
        let b = compute_breakdown(&[], "Goa", &AppliedDiscount::None);
        assert_eq!(b.total, Money::zero());
    }
}
