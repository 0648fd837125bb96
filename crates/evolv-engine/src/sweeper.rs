//! # Sweeper
//!
//! Periodic background pass over work that no request will trigger.
//!
//! ## Sweep Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Sweeper Tick                                   │
//! │                                                                         │
//! │  1. Expire: pending + unpaid, placed more than 12h ago                  │
//! │             → PaymentWindowExpired (releases points / promo usage)      │
//! │                                                                         │
//! │  2. Reconcile: shipped / out for delivery with no update for            │
//! │                `stale_after_mins` → poll carrier tracking               │
//! │                                                                         │
//! │  3. Shipments: confirmed orders still retry-pending after               │
//! │                `shipment_retry_after_secs` → another booking round      │
//! │                                                                         │
//! │  4. Pickups: approved exchanges without a booked reverse pickup         │
//! │                                                                         │
//! │  5. Replacements: received replacement exchanges whose new parcel       │
//! │                   is still unbooked                                     │
//! │                                                                         │
//! │  Each item is handled independently; one failure never stops the pass.  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use evolv_core::PAYMENT_WINDOW_HOURS;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::SweeperSettings;
use crate::error::EngineResult;
use crate::exchanges::ExchangeService;
use crate::orders::OrderService;
use crate::EngineContext;

/// What one pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired: usize,
    pub reconciled: usize,
    pub shipments_retried: usize,
    pub pickups_retried: usize,
    pub replacements_retried: usize,
    pub failures: usize,
}

impl SweepReport {
    fn is_empty(&self) -> bool {
        *self == SweepReport::default()
    }
}

pub struct Sweeper {
    ctx: EngineContext,
    orders: OrderService,
    exchanges: ExchangeService,
    settings: SweeperSettings,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for stopping a running sweeper.
#[derive(Clone)]
pub struct SweeperHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl SweeperHandle {
    /// Triggers graceful shutdown. The current pass finishes first.
    pub async fn shutdown(&self) {
        if self.shutdown_tx.send(()).await.is_err() {
            debug!("Sweeper already stopped");
        }
    }
}

impl Sweeper {
    pub fn new(
        ctx: EngineContext,
        orders: OrderService,
        exchanges: ExchangeService,
        settings: SweeperSettings,
    ) -> (Self, SweeperHandle) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let sweeper = Sweeper {
            ctx,
            orders,
            exchanges,
            settings,
            shutdown_rx,
        };
        (sweeper, SweeperHandle { shutdown_tx })
    }

    /// Runs until shutdown. Spawn this as a background task.
    pub async fn run(mut self) {
        info!(interval_secs = self.settings.interval_secs, "Sweeper starting");

        let mut interval = tokio::time::interval(Duration::from_secs(self.settings.interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.sweep_once(self.ctx.now()).await {
                        Ok(report) if !report.is_empty() => info!(?report, "Sweep finished"),
                        Ok(_) => debug!("Nothing to sweep"),
                        Err(e) => error!(?e, "Sweep failed"),
                    }
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Sweeper shutting down");
                    break;
                }
            }
        }

        info!("Sweeper stopped");
    }

    /// One pass over every queue.
    ///
    /// ## Errors
    /// Only when a queue itself cannot be read. Per-item failures are
    /// logged and counted in [`SweepReport::failures`].
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> EngineResult<SweepReport> {
        let mut report = SweepReport::default();
        let limit = self.settings.batch_size;
        let orders = self.ctx.db.orders();

        let cutoff = now - ChronoDuration::hours(PAYMENT_WINDOW_HOURS);
        for id in orders.expired_pending(cutoff, limit).await? {
            match self.orders.expire(&id).await {
                Ok(_) => report.expired += 1,
                Err(e) => {
                    warn!(order_id = %id, error = %e, "Could not expire order");
                    report.failures += 1;
                }
            }
        }

        let stale = now - ChronoDuration::minutes(self.settings.stale_after_mins);
        for id in orders.stale_in_transit(stale, limit).await? {
            match self.orders.reconcile(&id).await {
                Ok(_) => report.reconciled += 1,
                Err(e) => {
                    warn!(order_id = %id, error = %e, "Tracking poll failed");
                    report.failures += 1;
                }
            }
        }

        let retry_due = now - ChronoDuration::seconds(self.settings.shipment_retry_after_secs);
        for id in orders.shipments_pending(retry_due, limit).await? {
            match self.orders.book_shipment(&id).await {
                Ok(_) => report.shipments_retried += 1,
                Err(e) => {
                    warn!(order_id = %id, error = %e, "Shipment retry failed");
                    report.failures += 1;
                }
            }
        }

        for id in self.exchanges.pickups_pending(limit).await? {
            match self.exchanges.book_reverse_pickup(&id).await {
                Ok(_) => report.pickups_retried += 1,
                Err(e) => {
                    warn!(exchange_id = %id, error = %e, "Reverse pickup retry failed");
                    report.failures += 1;
                }
            }
        }

        for id in self.exchanges.replacements_pending(limit).await? {
            match self.exchanges.book_replacement(&id).await {
                Ok(_) => report.replacements_retried += 1,
                Err(e) => {
                    warn!(exchange_id = %id, error = %e, "Replacement retry failed");
                    report.failures += 1;
                }
            }
        }

        Ok(report)
    }
}
