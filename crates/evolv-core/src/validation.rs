//! # Validation Module
//!
//! Input validation for checkout and exchange requests.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Storefront (TypeScript)                                       │
//! │  └── Immediate feedback on empty fields                                 │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: storefront-api / engine (Rust)                                │
//! │  ├── Type validation (deserialization)                                  │
//! │  └── THIS MODULE: field rules, before any order mutation                │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                             │
//! │  ├── NOT NULL / CHECK constraints                                       │
//! │  └── UNIQUE (order number, ledger idempotency keys)                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::ValidationError;
use crate::types::Address;
use crate::MAX_LINE_QUANTITY;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Maximum length of free-text reasons (exchange, rejection).
pub const MAX_REASON_LEN: usize = 500;

// =============================================================================
// String Validators
// =============================================================================

/// Validates a free-text reason.
///
/// ## Example
/// ```rust
/// use evolv_core::validation::validate_reason;
///
/// assert!(validate_reason("Wrong size delivered").is_ok());
/// assert!(validate_reason("   ").is_err());
/// ```
pub fn validate_reason(reason: &str) -> ValidationResult<()> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(ValidationError::Required {
            field: "reason".to_string(),
        });
    }
    if reason.chars().count() > MAX_REASON_LEN {
        return Err(ValidationError::TooLong {
            field: "reason".to_string(),
            max: MAX_REASON_LEN,
        });
    }
    Ok(())
}

/// Validates an Indian mobile number: 10 digits, optional +91 / 0 prefix.
pub fn validate_phone(phone: &str) -> ValidationResult<()> {
    let digits: String = phone.chars().filter(|c| !c.is_whitespace() && *c != '-').collect();
    let digits = digits
        .strip_prefix("+91")
        .or_else(|| digits.strip_prefix('0'))
        .unwrap_or(&digits);

    if digits.len() != 10 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::InvalidFormat {
            field: "phone".to_string(),
            reason: "must be a 10 digit mobile number".to_string(),
        });
    }
    Ok(())
}

/// Validates a 6-digit PIN code (first digit non-zero).
pub fn validate_pincode(pincode: &str) -> ValidationResult<()> {
    let pincode = pincode.trim();
    let valid = pincode.len() == 6
        && pincode.chars().all(|c| c.is_ascii_digit())
        && !pincode.starts_with('0');
    if !valid {
        return Err(ValidationError::InvalidFormat {
            field: "pincode".to_string(),
            reason: "must be 6 digits".to_string(),
        });
    }
    Ok(())
}

/// Validates a shipping or billing address.
pub fn validate_address(address: &Address) -> ValidationResult<()> {
    for (field, value) in [
        ("full_name", &address.full_name),
        ("line1", &address.line1),
        ("city", &address.city),
        ("state", &address.state),
    ] {
        if value.trim().is_empty() {
            return Err(ValidationError::Required {
                field: field.to_string(),
            });
        }
    }
    validate_phone(&address.phone)?;
    validate_pincode(&address.pincode)?;
    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a line quantity.
pub fn validate_quantity(qty: u32) -> ValidationResult<()> {
    if qty == 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }
    if qty > MAX_LINE_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_LINE_QUANTITY as i64,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address() -> Address {
        Address {
            full_name: "Ravi K".to_string(),
            phone: "+91 98765 43210".to_string(),
            line1: "4 MG Road".to_string(),
            line2: None,
            city: "Bengaluru".to_string(),
            state: "Karnataka".to_string(),
            pincode: "560001".to_string(),
            country: "India".to_string(),
        }
    }

    #[test]
    fn test_valid_address() {
        assert!(validate_address(&address()).is_ok());
    }

    #[test]
    fn test_address_missing_state() {
        let mut addr = address();
        addr.state = " ".to_string();
        assert!(matches!(
            validate_address(&addr),
            Err(ValidationError::Required { field }) if field == "state"
        ));
    }

    #[test]
    fn test_phone_formats() {
        assert!(validate_phone("9876543210").is_ok());
        assert!(validate_phone("09876543210").is_ok());
        assert!(validate_phone("98765-43210").is_ok());
        assert!(validate_phone("12345").is_err());
    }

    #[test]
    fn test_pincode() {
        assert!(validate_pincode("600002").is_ok());
        assert!(validate_pincode("060002").is_err());
        assert!(validate_pincode("60002").is_err());
    }

    #[test]
    fn test_quantity_bounds() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(10).is_ok());
        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(11).is_err());
    }

    #[test]
    fn test_reason_length() {
        assert!(validate_reason(&"x".repeat(MAX_REASON_LEN)).is_ok());
        assert!(validate_reason(&"x".repeat(MAX_REASON_LEN + 1)).is_err());
    }
}
