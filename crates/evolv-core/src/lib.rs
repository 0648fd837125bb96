//! # evolv-core: Pure Business Logic for the Evolv Storefront
//!
//! This crate holds the order pricing, discount, loyalty and lifecycle rules
//! as pure functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Evolv Storefront Architecture                       │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐    │
//! │  │                 Storefront UI (browser)                         │    │
//! │  │    Cart ──► Price preview ──► Checkout ──► Order tracking       │    │
//! │  └─────────────────────────────┬───────────────────────────────────┘    │
//! │                                │ HTTP (storefront-api)                  │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐    │
//! │  │                    evolv-engine services                        │    │
//! │  │    OrderService, ExchangeService, Sweeper, collaborators        │    │
//! │  └─────────────────────────────┬───────────────────────────────────┘    │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐    │
//! │  │               ★ evolv-core (THIS CRATE) ★                       │    │
//! │  │                                                                 │    │
//! │  │  ┌─────────┐ ┌──────────┐ ┌──────────┐ ┌─────────┐ ┌─────────┐  │    │
//! │  │  │ pricing │ │ discount │ │  order   │ │exchange │ │ loyalty │  │    │
//! │  │  │breakdown│ │ resolver │ │lifecycle │ │ refunds │ │  tiers  │  │    │
//! │  │  └─────────┘ └──────────┘ └──────────┘ └─────────┘ └─────────┘  │    │
//! │  │                                                                 │    │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • NO CLOCK                  │    │
//! │  └─────────────────────────────────────────────────────────────────┘    │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐    │
//! │  │                    evolv-db (Database Layer)                    │    │
//! │  └─────────────────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`money`] - Money type in integer paise
//! - [`types`] - Shared value types (TaxRate, Address, Shipment)
//! - [`cart`] - Customer cart
//! - [`pricing`] - Price breakdown with GST split and shipping
//! - [`discount`] - Promo code / points resolver (mutually exclusive)
//! - [`loyalty`] - Tiers and point accrual
//! - [`order`] - Order state machine and customer view
//! - [`exchange`] - Exchange request workflow
//! - [`validation`] - Input validation
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use evolv_core::cart::Cart;
//! use evolv_core::discount::AppliedDiscount;
//! use evolv_core::money::Money;
//! use evolv_core::pricing::compute_breakdown;
//!
//! let mut cart = Cart::new("cust-1");
//! cart.add_line("tee-01", "Linen Tee", "M", "Ivory", Money::from_paise(299_999), 1)
//!     .unwrap();
//!
//! let breakdown = compute_breakdown(cart.lines(), "tamil nadu", &AppliedDiscount::None);
//! assert_eq!(breakdown.total.paise(), 309_999);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod cart;
pub mod discount;
pub mod error;
pub mod exchange;
pub mod loyalty;
pub mod money;
pub mod order;
pub mod pricing;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, DiscountError, ErrorKind, LifecycleError, ValidationError};
pub use money::Money;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================
// Business rules fixed at compile time. The preview endpoint and checkout read
// these same constants, so there is exactly one definition of each.

/// GST rate applied to every product (5%).
pub const GST_RATE: TaxRate = TaxRate::from_bps(500);

/// Seller's home state. Orders shipped here split GST into CGST + SGST.
pub const HOME_STATE: &str = "Tamil Nadu";

/// Accepted spellings of the home state, compared after normalisation
/// (lower-case, whitespace removed).
pub const HOME_STATE_ALIASES: &[&str] = &["tamilnadu"];

/// Tax-inclusive subtotal at or above which shipping is free (₹3000).
pub const FREE_SHIPPING_THRESHOLD: Money = Money::from_rupees(3000);

/// Flat shipping fee below the free-shipping threshold (₹100).
pub const FLAT_SHIPPING_FEE: Money = Money::from_rupees(100);

/// Hours a pending order waits for payment before the sweeper cancels it.
pub const PAYMENT_WINDOW_HOURS: i64 = 12;

/// Days after delivery during which an exchange may be requested.
pub const EXCHANGE_WINDOW_DAYS: i64 = 7;

/// Value of one loyalty point (₹1).
pub const POINT_VALUE: Money = Money::from_rupees(1);

/// Currency code sent to the payment gateway.
pub const CURRENCY: &str = "INR";

/// Maximum distinct lines in a cart
///
/// ## Business Reason
/// Keeps a single shipment within carrier parcel limits.
pub const MAX_CART_LINES: usize = 50;

/// Maximum quantity of a single size/colour in cart
pub const MAX_LINE_QUANTITY: u32 = 10;
