//! # Shared Value Types
//!
//! Small value types used by several modules.
//!
//! ```text
//! ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐
//! │    TaxRate      │   │    Address      │   │    Shipment     │
//! │  ─────────────  │   │  ─────────────  │   │  ─────────────  │
//! │  bps (u32)      │   │  name, phone    │   │  shipment_id    │
//! │  500 = 5% GST   │   │  line1..state   │   │  awb            │
//! └─────────────────┘   │  pincode        │   │  tracking_url   │
//!                       └─────────────────┘   └─────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use ts_rs::TS;

// =============================================================================
// Tax Rate
// =============================================================================

/// Tax rate represented in basis points (bps).
///
/// ## Why Basis Points?
/// 1 basis point = 0.01% = 1/10000
/// 500 bps = 5% (apparel GST slab)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TaxRate(u32);

impl TaxRate {
    /// Creates a tax rate from basis points.
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        TaxRate(bps)
    }

    /// Returns the rate in basis points.
    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    /// Returns the rate as a percentage (for display only).
    #[inline]
    pub fn percentage(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Half of the rate, as shown on intrastate invoices (CGST and SGST each).
    #[inline]
    pub const fn half(&self) -> TaxRate {
        TaxRate(self.0 / 2)
    }
}

// =============================================================================
// Address
// =============================================================================

/// A postal address snapshot. Copied onto the order at checkout so later
/// profile edits never change where an order ships.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Address {
    pub full_name: String,
    pub phone: String,
    pub line1: String,
    #[serde(default)]
    pub line2: Option<String>,
    pub city: String,
    /// Free text as typed by the customer; normalised only for tax decisions.
    pub state: String,
    pub pincode: String,
    #[serde(default = "default_country")]
    pub country: String,
}

fn default_country() -> String {
    "India".to_string()
}

// =============================================================================
// Shipment
// =============================================================================

/// Identifiers returned by the carrier for a created shipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Shipment {
    pub shipment_id: String,
    /// Air waybill number assigned by the carrier.
    pub awb: String,
    pub tracking_url: String,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tax_rate_from_bps() {
        let rate = TaxRate::from_bps(500);
        assert_eq!(rate.bps(), 500);
        assert!((rate.percentage() - 5.0).abs() < 0.001);
        assert_eq!(rate.half().bps(), 250);
    }

    #[test]
    fn test_address_country_defaults_to_india() {
        let json = r#"{
            "full_name": "Asha R",
            "phone": "9876543210",
            "line1": "12 Anna Salai",
            "city": "Chennai",
            "state": "Tamil Nadu",
            "pincode": "600002"
        }"#;
        let addr: Address = serde_json::from_str(json).unwrap();
        assert_eq!(addr.country, "India");
        assert!(addr.line2.is_none());
    }
}
