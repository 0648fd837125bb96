//! # evolv-engine: Order Lifecycle Engine for the Evolv Storefront
//!
//! Runs the order and exchange state machines from `evolv-core` against the
//! database and the outside world (payment gateway, courier, notifications).
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           Engine                                        │
//! │                                                                         │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐                 │
//! │  │ CartService  │   │ OrderService │◄──│ Exchange     │                 │
//! │  │              │   │              │   │ Service      │                 │
//! │  └──────┬───────┘   └──────┬───────┘   └──────┬───────┘                 │
//! │         │                  │                  │                         │
//! │         │        ┌─────────┴──────────────────┴───────┐                 │
//! │         │        │ EngineContext                      │◄── Sweeper      │
//! │         │        │  db, locks, retry policy,          │    (interval)   │
//! │         │        │  collaborators                     │                 │
//! │         │        └─────────┬──────────────────────────┘                 │
//! │         ▼                  ▼                                            │
//! │  ┌─────────────────────────────────────────────────────────────────┐    │
//! │  │ PaymentGateway · ShipmentCarrier · Notifier · CatalogStore ·    │    │
//! │  │ Clock                      (traits, swapped for fakes in tests) │    │
//! │  └─────────────────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`orders`] - Checkout, payment, fulfillment, refunds
//! - [`exchanges`] - Post-delivery exchange workflow
//! - [`cart`] - Server-side cart
//! - [`sweeper`] - Payment window expiry, tracking reconciliation, retries
//! - [`jobs`] - Background carrier bookings requested by transitions
//! - [`gateway`] / [`carrier`] / [`notify`] / [`catalog`] - Collaborators
//! - [`retry`] / [`locks`] - Backoff and per-entity serialisation
//! - [`config`] / [`error`] - Configuration and error types

// =============================================================================
// Module Declarations
// =============================================================================

pub mod carrier;
pub mod cart;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod error;
pub mod exchanges;
pub mod gateway;
pub mod jobs;
pub mod locks;
pub mod notify;
pub mod orders;
pub mod retry;
pub mod sweeper;

// =============================================================================
// Re-exports
// =============================================================================

pub use carrier::{CarrierEvent, HttpCarrier, ShipmentCarrier};
pub use cart::{AddToCart, CartService};
pub use catalog::{CatalogProduct, CatalogStore, StaticCatalog, Variant};
pub use clock::{Clock, SystemClock};
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use exchanges::ExchangeService;
pub use gateway::{parse_gateway_event, GatewayEvent, HttpPaymentGateway, PaymentGateway};
pub use jobs::{BookingJob, BookingQueue, BookingWorker};
pub use notify::{LogNotifier, Notification, Notifier};
pub use orders::{CheckoutPreview, CheckoutReceipt, CheckoutRequest, OrderService, PaymentCallback};
pub use sweeper::{SweepReport, Sweeper, SweeperHandle};

use chrono::{DateTime, Utc};
use evolv_db::{Database, DbConfig, Intervention};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{RetrySettings, SweeperSettings};
use crate::locks::EntityLocks;
use crate::retry::RetryPolicy;

// =============================================================================
// Wiring
// =============================================================================

/// Everything outside the database the engine talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub gateway: Arc<dyn PaymentGateway>,
    pub carrier: Arc<dyn ShipmentCarrier>,
    pub notifier: Arc<dyn Notifier>,
    pub catalog: Arc<dyn CatalogStore>,
    pub clock: Arc<dyn Clock>,
}

/// State shared by the services. Cheap to clone.
#[derive(Clone)]
pub struct EngineContext {
    pub(crate) db: Database,
    pub(crate) collaborators: Collaborators,
    pub(crate) locks: EntityLocks,
    pub(crate) retry: RetryPolicy,
    pub(crate) bookings: BookingQueue,
    /// Total carrier attempts across sweeper rounds before a booking goes
    /// to the intervention queue.
    pub(crate) give_up_after: u32,
}

impl EngineContext {
    pub fn new(
        db: Database,
        collaborators: Collaborators,
        retry: &RetrySettings,
        bookings: BookingQueue,
    ) -> Self {
        EngineContext {
            db,
            collaborators,
            locks: EntityLocks::new(),
            retry: RetryPolicy::from(retry),
            bookings,
            give_up_after: retry.give_up_after,
        }
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.collaborators.clock.now()
    }
}

/// The assembled engine.
#[derive(Clone)]
pub struct Engine {
    pub orders: OrderService,
    pub exchanges: ExchangeService,
    pub carts: CartService,
    ctx: EngineContext,
}

impl Engine {
    /// Assembles the services and starts the booking worker on the current
    /// Tokio runtime.
    pub fn new(db: Database, collaborators: Collaborators, retry: &RetrySettings) -> Self {
        let carts = CartService::new(
            db.clone(),
            collaborators.catalog.clone(),
            collaborators.clock.clone(),
        );
        let (bookings, booking_rx) = BookingQueue::new();
        let ctx = EngineContext::new(db, collaborators, retry, bookings);
        let orders = OrderService::new(ctx.clone());
        let exchanges = ExchangeService::new(ctx.clone(), orders.clone());

        let worker = BookingWorker::new(orders.clone(), exchanges.clone(), booking_rx);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(worker.run());
            }
            Err(_) => warn!("No Tokio runtime, bookings are left to the sweeper"),
        }
        Engine {
            orders,
            exchanges,
            carts,
            ctx,
        }
    }

    /// Opens the database and builds the HTTP collaborators from config.
    pub async fn from_config(config: &EngineConfig) -> EngineResult<Self> {
        let path = config.database.resolved_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::new(
            DbConfig::new(&path).max_connections(config.database.max_connections),
        )
        .await?;
        info!(path = %path.display(), "Database ready");

        let catalog = match &config.server.catalog_path {
            Some(path) => StaticCatalog::from_file(path)?,
            None => StaticCatalog::default(),
        };

        let collaborators = Collaborators {
            gateway: Arc::new(HttpPaymentGateway::new(&config.gateway)?),
            carrier: Arc::new(HttpCarrier::new(&config.carrier)?),
            notifier: Arc::new(LogNotifier),
            catalog: Arc::new(catalog),
            clock: Arc::new(SystemClock),
        };
        Ok(Self::new(db, collaborators, &config.retry))
    }

    /// Builds the background sweeper. The caller spawns [`Sweeper::run`].
    pub fn sweeper(&self, settings: SweeperSettings) -> (Sweeper, SweeperHandle) {
        Sweeper::new(
            self.ctx.clone(),
            self.orders.clone(),
            self.exchanges.clone(),
            settings,
        )
    }

    /// Open manual-intervention items, oldest first.
    pub async fn interventions(&self, limit: i64) -> EngineResult<Vec<Intervention>> {
        Ok(self.ctx.db.interventions().list_open(limit).await?)
    }

    /// Closes an intervention once an operator has dealt with it.
    ///
    /// ## Errors
    /// `NotFound` if the id is unknown or already resolved.
    pub async fn resolve_intervention(&self, id: &str) -> EngineResult<()> {
        if !self.ctx.db.interventions().resolve(id, self.ctx.now()).await? {
            return Err(EngineError::not_found("Intervention", id));
        }
        info!(intervention_id = id, "Intervention resolved");
        Ok(())
    }

    pub fn db(&self) -> &Database {
        &self.ctx.db
    }

    pub fn gateway(&self) -> &Arc<dyn PaymentGateway> {
        &self.ctx.collaborators.gateway
    }

    pub fn carrier(&self) -> &Arc<dyn ShipmentCarrier> {
        &self.ctx.collaborators.carrier
    }
}
