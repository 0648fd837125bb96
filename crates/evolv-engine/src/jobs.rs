//! # Booking Jobs
//!
//! Carrier bookings requested by a committed transition run here, off the
//! request path.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  OrderService / ExchangeService                                         │
//! │     commit ─► effects ─► BookingQueue::enqueue(job)    (never blocks)   │
//! │                                   │                                     │
//! │                                   ▼  unbounded mpsc                     │
//! │                           BookingWorker::run                            │
//! │                             ├── BookShipment       ─► book_shipment     │
//! │                             ├── BookReversePickup  ─► book_reverse_...  │
//! │                             └── BookReplacement    ─► book_replacement  │
//! │                                                                         │
//! │  A job lost to a restart is picked up again by the sweeper: every       │
//! │  booking is also visible as a not-requested / retry-pending row.        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::exchanges::ExchangeService;
use crate::orders::OrderService;

/// A carrier booking to make.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingJob {
    /// Forward shipment for a confirmed order.
    BookShipment { order_id: String },
    /// Pickup of returned items for an approved exchange.
    BookReversePickup { exchange_id: String },
    /// Replacement parcel once the returned items are in.
    BookReplacement { exchange_id: String },
}

/// Sending side, held by the services. Cheap to clone.
#[derive(Debug, Clone)]
pub struct BookingQueue {
    tx: mpsc::UnboundedSender<BookingJob>,
}

impl BookingQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<BookingJob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (BookingQueue { tx }, rx)
    }

    /// Queues a booking. If the worker is gone the sweeper books it later.
    pub fn enqueue(&self, job: BookingJob) {
        debug!(?job, "Booking queued");
        if let Err(e) = self.tx.send(job) {
            warn!(job = ?e.0, "Booking worker stopped, leaving job to the sweeper");
        }
    }
}

/// Drains the booking queue one job at a time.
pub struct BookingWorker {
    orders: OrderService,
    exchanges: ExchangeService,
    rx: mpsc::UnboundedReceiver<BookingJob>,
}

impl BookingWorker {
    pub fn new(
        orders: OrderService,
        exchanges: ExchangeService,
        rx: mpsc::UnboundedReceiver<BookingJob>,
    ) -> Self {
        BookingWorker {
            orders,
            exchanges,
            rx,
        }
    }

    /// Runs until every [`BookingQueue`] is dropped.
    pub async fn run(mut self) {
        info!("Booking worker starting");
        while let Some(job) = self.rx.recv().await {
            self.handle(job).await;
        }
        info!("Booking worker stopped");
    }

    async fn handle(&self, job: BookingJob) {
        match job {
            BookingJob::BookShipment { order_id } => {
                if let Err(e) = self.orders.book_shipment(&order_id).await {
                    error!(order_id = %order_id, error = %e, "Shipment booking failed");
                }
            }
            BookingJob::BookReversePickup { exchange_id } => {
                if let Err(e) = self.exchanges.book_reverse_pickup(&exchange_id).await {
                    error!(exchange_id = %exchange_id, error = %e, "Reverse pickup booking failed");
                }
            }
            BookingJob::BookReplacement { exchange_id } => {
                if let Err(e) = self.exchanges.book_replacement(&exchange_id).await {
                    error!(exchange_id = %exchange_id, error = %e, "Replacement booking failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queue_delivers_in_order() {
        let (queue, mut rx) = BookingQueue::new();
        queue.enqueue(BookingJob::BookShipment {
            order_id: "o-1".to_string(),
        });
        queue.enqueue(BookingJob::BookReplacement {
            exchange_id: "ex-1".to_string(),
        });

        assert_eq!(
            rx.recv().await,
            Some(BookingJob::BookShipment {
                order_id: "o-1".to_string()
            })
        );
        assert_eq!(
            rx.recv().await,
            Some(BookingJob::BookReplacement {
                exchange_id: "ex-1".to_string()
            })
        );
    }

    #[test]
    fn test_enqueue_after_worker_gone_does_not_panic() {
        let (queue, rx) = BookingQueue::new();
        drop(rx);
        queue.enqueue(BookingJob::BookReversePickup {
            exchange_id: "ex-1".to_string(),
        });
    }
}
