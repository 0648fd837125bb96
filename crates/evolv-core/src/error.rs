//! # Error Types
//!
//! Domain-specific error types for evolv-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  evolv-core errors (this file)                                          │
//! │  ├── CoreError        - General domain errors (cart, stock)             │
//! │  ├── ValidationError  - Malformed or inconsistent input                 │
//! │  ├── DiscountError    - Promo / points resolution failures              │
//! │  └── LifecycleError   - Transition attempted from an incompatible state │
//! │                                                                         │
//! │  evolv-db errors (separate crate)                                       │
//! │  └── DbError          - Database operation failures                     │
//! │                                                                         │
//! │  evolv-engine errors                                                    │
//! │  └── EngineError      - Validation / Conflict / External / Expired      │
//! │                                                                         │
//! │  storefront-api errors                                                  │
//! │  └── ApiError         - What the browser sees (serialized)              │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → EngineError → ApiError → Browser   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every error reports an [`ErrorKind`] so the outer layers can map it to the
//! taxonomy (validation, conflict, expired) without matching on variants.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::exchange::ExchangeStatus;
use crate::money::Money;
use crate::order::{OrderStatus, PaymentStatus, RefundStatus};

// =============================================================================
// Error Kind
// =============================================================================

/// Coarse category of a domain error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or inconsistent input. Rejected before any mutation.
    Validation,
    /// Incompatible current state. Callers should re-read and reconcile.
    Conflict,
    /// A time window (payment, exchange, promo validity) has closed.
    Expired,
    /// Referenced entity does not exist.
    NotFound,
}

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Product cannot be found in the catalogue.
    #[error("Product not found: {0}")]
    ProductNotFound(String),

    /// Insufficient stock to place the order.
    ///
    /// ## When This Occurs
    /// - Checkout re-reads stock from the catalogue and finds less than the
    ///   cart quantity (another customer bought the last units)
    #[error("Insufficient stock for {product_id} ({size}): available {available}, requested {requested}")]
    InsufficientStock {
        product_id: String,
        size: String,
        available: u32,
        requested: u32,
    },

    /// Cart has exceeded maximum allowed lines.
    #[error("Cart cannot have more than {max} items")]
    CartTooLarge { max: usize },

    /// Line quantity exceeds maximum allowed.
    #[error("Quantity {requested} exceeds maximum allowed ({max})")]
    QuantityTooLarge { requested: u32, max: u32 },

    /// The referenced line is not in the cart.
    #[error("{product_id} ({size}/{color}) is not in the cart")]
    LineNotInCart {
        product_id: String,
        size: String,
        color: String,
    },

    /// Checkout was attempted with an empty cart.
    #[error("Cart is empty")]
    EmptyCart,

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Discount resolution failed.
    #[error(transparent)]
    Discount(#[from] DiscountError),

    /// Lifecycle transition refused.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

impl CoreError {
    /// Returns the taxonomy category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::ProductNotFound(_) => ErrorKind::NotFound,
            CoreError::InsufficientStock { .. } => ErrorKind::Conflict,
            CoreError::CartTooLarge { .. }
            | CoreError::QuantityTooLarge { .. }
            | CoreError::LineNotInCart { .. }
            | CoreError::EmptyCart
            | CoreError::Validation(_) => ErrorKind::Validation,
            CoreError::Discount(e) => e.kind(),
            CoreError::Lifecycle(e) => e.kind(),
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These occur when input is malformed or disagrees with what the server
/// recomputes. They are raised before any state is touched.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., pincode, phone).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// The total the browser submitted differs from the server recomputation.
    ///
    /// ## User Workflow
    /// ```text
    /// Browser preview: ₹3099.99     (stale: promo expired meanwhile)
    ///      │
    ///      ▼
    /// Server recompute: ₹3199.99
    ///      │
    ///      ▼
    /// TotalMismatch → UI refreshes the preview, customer re-confirms
    /// ```
    #[error("Submitted total {submitted} does not match computed total {computed}")]
    TotalMismatch { submitted: Money, computed: Money },

    /// A cart line's price differs from the catalogue price.
    #[error("Price of {product_id} changed from {cart_price} to {catalogue_price}")]
    PriceChanged {
        product_id: String,
        cart_price: Money,
        catalogue_price: Money,
    },

    /// The gateway reported a paid amount that is not the order total.
    #[error("Paid amount {received} does not match order total {expected}")]
    PaymentAmountMismatch { expected: Money, received: Money },

    /// The payment callback signature did not verify.
    #[error("Payment signature is invalid")]
    InvalidSignature,

    /// An exchange names an item that is not on the order.
    #[error("{product_id} ({size}/{color}) is not part of this order")]
    UnknownItem {
        product_id: String,
        size: String,
        color: String,
    },
}

// =============================================================================
// Discount Error
// =============================================================================

/// Discount resolver errors, each with a stable machine-readable code.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DiscountError {
    /// Code is unknown or has been deactivated.
    #[error("Promo code {code} is not valid")]
    InvalidCode { code: String },

    /// Code is outside its validity window or its usage limit is used up.
    #[error("Promo code {code} has expired")]
    Expired { code: String },

    /// Cart subtotal is below the promo's minimum order value.
    #[error("Promo code {code} needs a minimum order of {minimum}")]
    MinOrderNotMet { code: String, minimum: Money },

    /// Customer tried to redeem more points than available.
    #[error("Cannot redeem {requested} points, only {available} available")]
    InsufficientBalance { requested: i64, available: i64 },

    /// Points value is larger than the cart subtotal.
    #[error("{requested} points exceed the cart subtotal of {subtotal}")]
    ExceedsSubtotal { requested: i64, subtotal: Money },

    /// Zero or negative points.
    #[error("Points to redeem must be positive")]
    NonPositivePoints,
}

impl DiscountError {
    /// Stable error code sent to the storefront.
    pub fn code(&self) -> &'static str {
        match self {
            DiscountError::InvalidCode { .. } => "INVALID_CODE",
            DiscountError::Expired { .. } => "EXPIRED",
            DiscountError::MinOrderNotMet { .. } => "MIN_ORDER_NOT_MET",
            DiscountError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            DiscountError::ExceedsSubtotal { .. } => "EXCEEDS_SUBTOTAL",
            DiscountError::NonPositivePoints => "INVALID_POINTS",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DiscountError::Expired { .. } => ErrorKind::Expired,
            _ => ErrorKind::Validation,
        }
    }
}

// =============================================================================
// Lifecycle Error
// =============================================================================

/// Order and exchange state machine refusals.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// The requested status change is not an edge of the state machine.
    #[error("Cannot move order from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// A forward status arrived before its predecessor, or after a later one.
    ///
    /// ## When This Occurs
    /// - Carrier sends `delivered` while the order is still `processing`
    /// - A delayed `shipped` webhook arrives after `delivered`
    #[error("Out-of-order status {received} for order in {current}")]
    OutOfOrder {
        current: OrderStatus,
        received: OrderStatus,
    },

    /// Customer cancel on an order that is past `pending` or already paid.
    #[error("Order in {status} with payment {payment} cannot be cancelled")]
    CancelNotAllowed {
        status: OrderStatus,
        payment: PaymentStatus,
    },

    /// Payment change that contradicts the recorded payment state.
    #[error("Payment is {current}, cannot mark {attempted}")]
    PaymentConflict {
        current: PaymentStatus,
        attempted: PaymentStatus,
    },

    /// Payment confirmation for an order that was already cancelled.
    #[error("Payment received for cancelled order {order_number}")]
    LatePayment { order_number: String },

    /// Sweeper tried to expire an order whose window is still open.
    #[error("Payment window is open until {deadline}")]
    PaymentWindowOpen { deadline: DateTime<Utc> },

    /// Shipment bookkeeping on an order that cannot ship.
    #[error("Order in {status} cannot be fulfilled")]
    NotFulfillable { status: OrderStatus },

    /// Exchange requested on an order that is not delivered.
    #[error("Only delivered orders can be exchanged, order is {status}")]
    NotDelivered { status: OrderStatus },

    /// Exchange window after delivery has closed.
    #[error("Exchange window closed on {closed_at}")]
    ExchangeWindowClosed { closed_at: DateTime<Utc> },

    /// A non-rejected exchange already exists for the order.
    #[error("Exchange {exchange_id} is already open for this order")]
    ExchangeAlreadyOpen { exchange_id: String },

    /// Exchange already approved or rejected.
    #[error("Exchange is already {status}")]
    ExchangeDecided { status: ExchangeStatus },

    /// Exchange step attempted out of sequence (e.g., receive before pickup).
    #[error("Exchange in {status} cannot {step}")]
    ExchangeStep {
        status: ExchangeStatus,
        step: &'static str,
    },

    /// Refund sub-state change that is not forward.
    #[error("Refund cannot move from {from:?} to {to}")]
    RefundTransition {
        from: Option<RefundStatus>,
        to: RefundStatus,
    },
}

impl LifecycleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LifecycleError::ExchangeWindowClosed { .. } => ErrorKind::Expired,
            _ => ErrorKind::Conflict,
        }
    }

    /// True for states that indicate an upstream anomaly worth a warning log.
    pub fn is_anomaly(&self) -> bool {
        matches!(
            self,
            LifecycleError::OutOfOrder { .. } | LifecycleError::LatePayment { .. }
        )
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::InsufficientStock {
            product_id: "tee-01".to_string(),
            size: "M".to_string(),
            available: 1,
            requested: 2,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock for tee-01 (M): available 1, requested 2"
        );
    }

    #[test]
    fn test_discount_codes() {
        let err = DiscountError::MinOrderNotMet {
            code: "SAVE10".to_string(),
            minimum: Money::from_rupees(999),
        };
        assert_eq!(err.code(), "MIN_ORDER_NOT_MET");
        assert_eq!(err.to_string(), "Promo code SAVE10 needs a minimum order of ₹999.00");
        assert_eq!(
            DiscountError::Expired { code: "X".into() }.kind(),
            ErrorKind::Expired
        );
    }

    #[test]
    fn test_lifecycle_kinds() {
        let err = LifecycleError::OutOfOrder {
            current: OrderStatus::Processing,
            received: OrderStatus::Delivered,
        };
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(err.is_anomaly());
        assert_eq!(
            err.to_string(),
            "Out-of-order status delivered for order in processing"
        );
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let core_err: CoreError = ValidationError::Required {
            field: "reason".to_string(),
        }
        .into();
        assert!(matches!(core_err, CoreError::Validation(_)));
        assert_eq!(core_err.kind(), ErrorKind::Validation);
    }
}
