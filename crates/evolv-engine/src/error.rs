//! # Engine Error Types
//!
//! The error taxonomy every caller of the engine sees.
//!
//! ## Error Categories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Engine Error Categories                           │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐  │
//! │  │   Validation    │  │    Conflict     │  │   ExternalService       │  │
//! │  │                 │  │                 │  │                         │  │
//! │  │  TOTAL_MISMATCH │  │  wrong state    │  │  gateway / carrier      │  │
//! │  │  INVALID_CODE   │  │  stale version  │  │  unreachable or 4xx/5xx │  │
//! │  │  bad address    │  │  + current view │  │  retryable flag         │  │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘  │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐  │
//! │  │    Expired      │  │    NotFound     │  │   Database / Config     │  │
//! │  │                 │  │                 │  │                         │  │
//! │  │  payment window │  │  order, product │  │  pool, query, toml      │  │
//! │  │  exchange window│  │  exchange       │  │                         │  │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Conflicts carry the order as it is now, so the storefront can redraw
//! instead of retrying blindly.

use evolv_core::order::OrderView;
use evolv_core::{CoreError, DiscountError, ErrorKind, LifecycleError, ValidationError};
use evolv_db::DbError;
use thiserror::Error;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine error type.
#[derive(Debug, Error)]
pub enum EngineError {
    // =========================================================================
    // Caller Errors
    // =========================================================================
    /// Malformed or inconsistent input; nothing was changed.
    #[error("{message}")]
    Validation { code: &'static str, message: String },

    /// The entity is in a state that does not allow the operation.
    ///
    /// ## When This Occurs
    /// - Cancel on an order that was already paid
    /// - Out-of-order carrier webhook
    /// - A second exchange request while one is open
    /// - Another writer committed first (stale version)
    #[error("{message}")]
    Conflict {
        message: String,
        current: Option<Box<OrderView>>,
    },

    /// A time window has closed.
    #[error("{message}")]
    Expired { message: String },

    /// Referenced entity does not exist (or belongs to someone else).
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    // =========================================================================
    // Collaborator Errors
    // =========================================================================
    /// Gateway or carrier failed.
    #[error("{service} error: {message}")]
    ExternalService {
        service: &'static str,
        message: String,
        retryable: bool,
    },

    // =========================================================================
    // Infrastructure Errors
    // =========================================================================
    #[error("Database error: {0}")]
    Database(DbError),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl EngineError {
    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        EngineError::Validation {
            code,
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>, current: Option<OrderView>) -> Self {
        EngineError::Conflict {
            message: message.into(),
            current: current.map(Box::new),
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn external(service: &'static str, message: impl Into<String>, retryable: bool) -> Self {
        EngineError::ExternalService {
            service,
            message: message.into(),
            retryable,
        }
    }

    /// Maps a domain error, attaching the current order for conflicts.
    pub fn from_core(err: CoreError, current: Option<OrderView>) -> Self {
        let message = err.to_string();
        match err.kind() {
            ErrorKind::Validation => EngineError::Validation {
                code: core_code(&err),
                message,
            },
            ErrorKind::Conflict => EngineError::conflict(message, current),
            ErrorKind::Expired => EngineError::Expired { message },
            ErrorKind::NotFound => EngineError::NotFound {
                entity: "Product",
                id: match err {
                    CoreError::ProductNotFound(id) => id,
                    _ => String::new(),
                },
            },
        }
    }

    /// Wraps an HTTP client error from `service`.
    ///
    /// Timeouts, connection failures, 5xx and 429 are retryable; any other
    /// status (bad request, auth) is not.
    pub fn from_http(service: &'static str, err: reqwest::Error) -> Self {
        let retryable = err.is_timeout()
            || err.is_connect()
            || err
                .status()
                .is_some_and(|s| s.is_server_error() || s.as_u16() == 429);
        EngineError::ExternalService {
            service,
            message: err.to_string(),
            retryable,
        }
    }

    /// Returns true if the failed operation may succeed when repeated.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::ExternalService { retryable, .. } => *retryable,
            EngineError::Database(DbError::ConnectionFailed(_))
            | EngineError::Database(DbError::PoolExhausted) => true,
            _ => false,
        }
    }

    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation { code, .. } => code,
            EngineError::Conflict { .. } => "CONFLICT",
            EngineError::Expired { .. } => "EXPIRED",
            EngineError::NotFound { .. } => "NOT_FOUND",
            EngineError::ExternalService { .. } => "EXTERNAL_SERVICE",
            EngineError::Database(_) | EngineError::Config(_) => "INTERNAL",
        }
    }
}

fn core_code(err: &CoreError) -> &'static str {
    match err {
        CoreError::Discount(d) => d.code(),
        CoreError::Validation(v) => validation_code(v),
        CoreError::EmptyCart => "EMPTY_CART",
        CoreError::CartTooLarge { .. } | CoreError::QuantityTooLarge { .. } => "CART_LIMIT",
        _ => "VALIDATION",
    }
}

fn validation_code(err: &ValidationError) -> &'static str {
    match err {
        ValidationError::TotalMismatch { .. } => "TOTAL_MISMATCH",
        ValidationError::PriceChanged { .. } => "PRICE_CHANGED",
        ValidationError::PaymentAmountMismatch { .. } => "AMOUNT_MISMATCH",
        ValidationError::InvalidSignature => "INVALID_SIGNATURE",
        _ => "VALIDATION",
    }
}

// =============================================================================
// Conversions
// =============================================================================

impl From<CoreError> for EngineError {
    fn from(err: CoreError) -> Self {
        EngineError::from_core(err, None)
    }
}

impl From<ValidationError> for EngineError {
    fn from(err: ValidationError) -> Self {
        CoreError::from(err).into()
    }
}

impl From<DiscountError> for EngineError {
    fn from(err: DiscountError) -> Self {
        CoreError::from(err).into()
    }
}

impl From<LifecycleError> for EngineError {
    fn from(err: LifecycleError) -> Self {
        CoreError::from(err).into()
    }
}

impl From<DbError> for EngineError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::VersionConflict { entity, id, .. } => EngineError::conflict(
                format!("{entity} {id} was changed by another request, reload and retry"),
                None,
            ),
            DbError::ReservationRejected { reason } => EngineError::conflict(reason, None),
            DbError::NotFound { id, .. } => EngineError::NotFound {
                entity: "Record",
                id,
            },
            other => EngineError::Database(other),
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(err: toml::de::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Database(DbError::Serialization(err))
    }
}
