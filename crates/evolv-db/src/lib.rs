//! # evolv-db: Database Layer for the Evolv Storefront
//!
//! This crate owns every SQL statement in the system. It uses SQLite through
//! `sqlx` with runtime-checked queries and embedded migrations.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  evolv-engine (OrderService / ExchangeService / Sweeper)                │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐    │
//! │  │                     evolv-db (THIS CRATE)                       │    │
//! │  │                                                                 │    │
//! │  │   ┌───────────────┐    ┌────────────────┐    ┌──────────────┐   │    │
//! │  │   │   Database    │    │  Repositories  │    │  Migrations  │   │    │
//! │  │   │   (pool.rs)   │    │                │    │  (embedded)  │   │    │
//! │  │   │               │    │ OrderRepo      │    │              │   │    │
//! │  │   │ SqlitePool    │◄───│ ExchangeRepo   │    │ 001_initial  │   │    │
//! │  │   │ WAL, FKs on   │    │ LoyaltyRepo    │    │   _schema    │   │    │
//! │  │   │               │    │ Promo/Cart/... │    │              │   │    │
//! │  │   └───────────────┘    └────────────────┘    └──────────────┘   │    │
//! │  │                                                                 │    │
//! │  └─────────────────────────────────────────────────────────────────┘    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite database file (path from EngineConfig)                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use evolv_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("storefront.db")).await?;
//!
//! db.orders().insert_placed(&order).await?;
//! let mut order = db.orders().get_by_id(&id).await?.ok_or(...)?;
//! order.apply(event, now)?;
//! db.orders().commit(&mut order).await?;   // rejected if someone else won
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::cart::CartRepository;
pub use repository::exchange::ExchangeRepository;
pub use repository::intervention::{Intervention, InterventionKind, InterventionRepository};
pub use repository::loyalty::{
    LedgerEntry, LoyaltyRepository, Reservation, ReservationKind, ReservationState,
};
pub use repository::order::OrderRepository;
pub use repository::promo::PromoRepository;
