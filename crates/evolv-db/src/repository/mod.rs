//! # Repository Module
//!
//! Database repository implementations for the storefront.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  evolv-engine (OrderService, ExchangeService, Sweeper)                  │
//! │       │                                                                 │
//! │       │  db.orders().commit_with(&mut order, &effects)                  │
//! │       ▼                                                                 │
//! │  OrderRepository                                                        │
//! │  ├── insert_placed(&order)      order + timeline + reservation + cart   │
//! │  ├── get_by_id(&id)             snapshot + timeline rows                │
//! │  └── commit_with(..)            UPDATE ... WHERE version = ? + points   │
//! │       │                                                                 │
//! │       │  SQL (one transaction per call)                                 │
//! │       ▼                                                                 │
//! │  SQLite Database                                                        │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`OrderRepository`](order::OrderRepository) - Orders, timeline, sweeps
//! - [`ExchangeRepository`](exchange::ExchangeRepository) - Exchange requests
//! - [`LoyaltyRepository`](loyalty::LoyaltyRepository) - Ledger, accounts, reservations
//! - [`PromoRepository`](promo::PromoRepository) - Promo catalogue
//! - [`CartRepository`](cart::CartRepository) - Persisted carts
//! - [`InterventionRepository`](intervention::InterventionRepository) - Manual reconciliation queue

pub mod cart;
pub mod exchange;
pub mod intervention;
pub mod loyalty;
pub mod order;
pub mod promo;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{DbError, DbResult};

/// Formats a timestamp for storage.
///
/// Fixed-width UTC (`2026-03-01T10:00:00.000000Z`) so TEXT comparisons in
/// sweep queries order the same way the instants do.
pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parses a stored timestamp.
pub(crate) fn parse_timestamp(raw: &str) -> DbResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::Internal(format!("bad timestamp '{raw}': {e}")))
}
