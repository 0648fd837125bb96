//! # Exchange Service
//!
//! Post-delivery exchanges and the refunds they lead to.
//!
//! ```text
//! request ──► pending ──approve──► approved ──► reverse pickup booked
//!                │                                   │
//!              reject                          mark_received
//!                ▼                                   ├─► replacement shipment
//!            rejected                                └─► refund (OrderService)
//! ```
//!
//! Requests for one order are serialized on the order lock, so two browser
//! tabs cannot both open one. Everything after that runs under
//! `exchange:{id}`.

use evolv_core::exchange::{
    ExchangeEffect, ExchangeInput, ExchangeRequest, ExchangeResolution, ExchangeStatus,
};
use evolv_core::order::{FulfillmentState, Order, OrderView};
use evolv_core::{CoreError, CoreResult, LifecycleError, Money};
use evolv_db::{DbError, InterventionKind};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::carrier::{Direction, ShipmentItem, ShipmentRequest};
use crate::error::{EngineError, EngineResult};
use crate::jobs::BookingJob;
use crate::notify::{dispatch, Notification};
use crate::orders::OrderService;
use crate::retry::{settle_booking, with_backoff};
use crate::EngineContext;

fn lock_key(exchange_id: &str) -> String {
    format!("exchange:{exchange_id}")
}

fn pending_attempts(state: &FulfillmentState) -> Option<u32> {
    match state {
        FulfillmentState::NotRequested => Some(0),
        FulfillmentState::RetryPending { attempts, .. } => Some(*attempts),
        FulfillmentState::Created { .. } | FulfillmentState::NeedsIntervention { .. } => None,
    }
}

#[derive(Clone)]
pub struct ExchangeService {
    ctx: EngineContext,
    orders: OrderService,
}

impl ExchangeService {
    pub fn new(ctx: EngineContext, orders: OrderService) -> Self {
        ExchangeService { ctx, orders }
    }

    pub async fn get(&self, exchange_id: &str) -> EngineResult<ExchangeRequest> {
        self.ctx
            .db
            .exchanges()
            .get_by_id(exchange_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Exchange", exchange_id))
    }

    /// The customer's requests for one of their orders.
    pub async fn list_for_order(
        &self,
        customer_id: &str,
        order_id: &str,
    ) -> EngineResult<Vec<ExchangeRequest>> {
        self.orders.view(customer_id, order_id).await?;
        Ok(self.ctx.db.exchanges().list_for_order(order_id).await?)
    }

    /// Requests awaiting an admin decision, oldest first.
    pub async fn pending(&self, limit: i64) -> EngineResult<Vec<ExchangeRequest>> {
        Ok(self
            .ctx
            .db
            .exchanges()
            .list_by_status(ExchangeStatus::Pending, limit)
            .await?)
    }

    /// Opens an exchange on a delivered order.
    ///
    /// ## Errors
    /// - `NotFound` if the order is not the customer's
    /// - `Conflict` if the order is not delivered or a request is already open
    /// - `Expired` after the exchange window
    /// - `Validation` for unknown items or quantities
    pub async fn request(
        &self,
        customer_id: &str,
        order_id: &str,
        input: ExchangeInput,
    ) -> EngineResult<ExchangeRequest> {
        let _order_lock = self.ctx.locks.lock(&format!("order:{order_id}")).await;

        let order = self.orders.get(order_id).await?;
        if order.customer_id != customer_id {
            return Err(EngineError::not_found("Order", order_id));
        }
        let existing = self.ctx.db.exchanges().list_for_order(order_id).await?;
        let id = Uuid::new_v4().simple().to_string();
        let request = ExchangeRequest::open(id, &order, input, &existing, self.ctx.now())
            .map_err(|e| EngineError::from_core(e, Some(OrderView::from(&order))))?;

        match self.ctx.db.exchanges().insert(&request).await {
            Ok(()) => {}
            Err(e) if e.is_unique_violation() => {
                warn!(order_id, "Concurrent exchange request rejected by index");
                return Err(EngineError::conflict(
                    "An exchange is already open for this order",
                    Some(OrderView::from(&order)),
                ));
            }
            Err(e) => return Err(e.into()),
        }
        info!(
            exchange_id = %request.id,
            order_id,
            resolution = ?request.resolution,
            "Exchange requested"
        );
        Ok(request)
    }

    /// Admin approval. Books the reverse pickup in the background.
    pub async fn approve(&self, exchange_id: &str) -> EngineResult<ExchangeRequest> {
        let now = self.ctx.now();
        let request = self.update(exchange_id, |r| r.approve(now).map(Some)).await?;
        info!(exchange_id, "Exchange approved");
        Ok(request)
    }

    /// Admin rejection with a mandatory reason.
    pub async fn reject(&self, exchange_id: &str, reason: &str) -> EngineResult<ExchangeRequest> {
        let now = self.ctx.now();
        let request = self
            .update(exchange_id, |r| r.reject(reason, now).map(Some))
            .await?;
        info!(exchange_id, "Exchange rejected");
        Ok(request)
    }

    /// Warehouse confirms the returned items arrived.
    pub async fn mark_received(&self, exchange_id: &str) -> EngineResult<ExchangeRequest> {
        let now = self.ctx.now();
        self.update(exchange_id, |r| {
            r.mark_received(now)
                .map(|effects| (!effects.is_empty()).then_some(effects))
        })
        .await
    }

    /// Books the pickup of the returned items from the customer.
    pub async fn book_reverse_pickup(&self, exchange_id: &str) -> EngineResult<ExchangeRequest> {
        let _booking = self.ctx.locks.lock(&format!("pickup:{exchange_id}")).await;
        let request = self.get(exchange_id).await?;
        let Some(prior) = pending_attempts(&request.reverse_shipment) else {
            return Ok(request);
        };
        if request.status != ExchangeStatus::Approved {
            return Ok(request);
        }

        let order = self.orders.get(&request.order_id).await?;
        let parcel = ShipmentRequest {
            reference: format!("{}-RET-{}", order.order_number, short_id(&request.id)),
            direction: Direction::Reverse,
            address: order.shipping_address.clone(),
            items: return_items(&order, &request, false),
            declared_value: request.refund_amount,
        };
        let carrier = &self.ctx.collaborators.carrier;
        let outcome = with_backoff(&self.ctx.retry, "create_reverse_pickup", || {
            carrier.create_shipment(&parcel)
        })
        .await;

        let (state, failed) = settle_booking(prior, outcome, self.ctx.give_up_after);
        let request = self
            .update(exchange_id, |r| {
                r.record_reverse_shipment(state).map(|changed| changed.then(Vec::new))
            })
            .await?;
        if let Some(detail) = failed {
            self.raise(&request.order_id, InterventionKind::ReversePickupFailed, detail)
                .await;
        }
        Ok(request)
    }

    /// Ships the replacement sizes/colours once the return is in.
    pub async fn book_replacement(&self, exchange_id: &str) -> EngineResult<ExchangeRequest> {
        let _booking = self.ctx.locks.lock(&format!("replacement:{exchange_id}")).await;
        let request = self.get(exchange_id).await?;
        let Some(prior) = pending_attempts(&request.forward_shipment) else {
            return Ok(request);
        };

        let order = self.orders.get(&request.order_id).await?;
        let parcel = ShipmentRequest {
            reference: format!("{}-EXC-{}", order.order_number, short_id(&request.id)),
            direction: Direction::Forward,
            address: order.shipping_address.clone(),
            items: return_items(&order, &request, true),
            declared_value: request.refund_amount,
        };
        let carrier = &self.ctx.collaborators.carrier;
        let outcome = with_backoff(&self.ctx.retry, "create_replacement_shipment", || {
            carrier.create_shipment(&parcel)
        })
        .await;

        let (state, failed) = settle_booking(prior, outcome, self.ctx.give_up_after);
        let request = self
            .update(exchange_id, |r| {
                r.record_forward_shipment(state).map(|changed| changed.then(Vec::new))
            })
            .await?;
        if let Some(detail) = failed {
            self.raise(&request.order_id, InterventionKind::ShipmentFailed, detail)
                .await;
        }
        Ok(request)
    }

    /// Received replacement exchanges whose new parcel is not booked yet
    /// (sweeper input).
    pub(crate) async fn replacements_pending(&self, limit: i64) -> EngineResult<Vec<String>> {
        let approved = self
            .ctx
            .db
            .exchanges()
            .list_by_status(ExchangeStatus::Approved, limit)
            .await?;
        Ok(approved
            .into_iter()
            .filter(|r| {
                r.resolution == ExchangeResolution::Replacement
                    && r.received_at.is_some()
                    && pending_attempts(&r.forward_shipment).is_some()
            })
            .map(|r| r.id)
            .collect())
    }

    /// Approved requests whose pickup is not booked yet (sweeper input).
    pub(crate) async fn pickups_pending(&self, limit: i64) -> EngineResult<Vec<String>> {
        let approved = self
            .ctx
            .db
            .exchanges()
            .list_by_status(ExchangeStatus::Approved, limit)
            .await?;
        Ok(approved
            .into_iter()
            .filter(|r| pending_attempts(&r.reverse_shipment).is_some())
            .map(|r| r.id)
            .collect())
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    /// Lock, read, mutate, commit, unlock; then run the effects.
    ///
    /// `change` returns `None` when nothing changed (nothing is committed).
    async fn update<F>(&self, exchange_id: &str, change: F) -> EngineResult<ExchangeRequest>
    where
        F: FnOnce(&mut ExchangeRequest) -> CoreResult<Option<Vec<ExchangeEffect>>>,
    {
        let (request, effects) = {
            let _guard = self.ctx.locks.lock(&lock_key(exchange_id)).await;
            let mut request = self.get(exchange_id).await?;
            let effects = match change(&mut request) {
                Ok(Some(effects)) => effects,
                Ok(None) => return Ok(request),
                Err(e) => return Err(self.refusal(&request, e).await),
            };
            if let Err(e) = self.ctx.db.exchanges().commit(&mut request, self.ctx.now()).await {
                if matches!(e, DbError::VersionConflict { .. }) {
                    warn!(exchange_id, "Stale exchange version, change rejected");
                }
                return Err(e.into());
            }
            (request, effects)
        };

        self.run_effects(&request, effects).await;
        Ok(request)
    }

    async fn run_effects(&self, request: &ExchangeRequest, effects: Vec<ExchangeEffect>) {
        for effect in effects {
            match effect {
                ExchangeEffect::Notify(kind) => match self.orders.get(&request.order_id).await {
                    Ok(order) => dispatch(
                        self.ctx.collaborators.notifier.clone(),
                        Notification {
                            customer_id: order.customer_id,
                            order_id: order.id,
                            order_number: order.order_number,
                            kind,
                        },
                    ),
                    Err(e) => error!(exchange_id = %request.id, error = %e, "Notification skipped"),
                },
                ExchangeEffect::ScheduleReversePickup => {
                    self.ctx.bookings.enqueue(BookingJob::BookReversePickup {
                        exchange_id: request.id.clone(),
                    })
                }
                ExchangeEffect::ScheduleReplacement => {
                    self.ctx.bookings.enqueue(BookingJob::BookReplacement {
                        exchange_id: request.id.clone(),
                    })
                }
                ExchangeEffect::InitiateRefund { amount } => {
                    self.refund(request, amount).await;
                }
            }
        }
    }

    async fn refund(&self, request: &ExchangeRequest, amount: Money) {
        let reason = format!("Exchange {} refund", short_id(&request.id));
        if let Err(e) = self
            .orders
            .initiate_refund(&request.order_id, amount, &reason)
            .await
        {
            error!(exchange_id = %request.id, error = %e, "Refund could not be initiated");
            self.raise(&request.order_id, InterventionKind::RefundFailed, e.to_string())
                .await;
        }
    }

    /// Maps a refused step, attaching the order as it stands.
    async fn refusal(&self, request: &ExchangeRequest, err: CoreError) -> EngineError {
        if let CoreError::Lifecycle(LifecycleError::ExchangeStep { status, step }) = &err {
            warn!(exchange_id = %request.id, %status, step, "Exchange step out of sequence");
        }
        let current = self
            .orders
            .get(&request.order_id)
            .await
            .ok()
            .map(|order| OrderView::from(&order));
        EngineError::from_core(err, current)
    }

    async fn raise(&self, order_id: &str, kind: InterventionKind, detail: String) {
        if let Err(e) = self
            .ctx
            .db
            .interventions()
            .raise(order_id, kind, detail, self.ctx.now())
            .await
        {
            error!(order_id, kind = kind.as_str(), error = %e, "Failed to queue intervention");
        }
    }
}

fn short_id(id: &str) -> String {
    id.chars().take(6).collect::<String>().to_uppercase()
}

/// Parcel lines for the returned items, or for their replacements.
fn return_items(order: &Order, request: &ExchangeRequest, replacement: bool) -> Vec<ShipmentItem> {
    request
        .items
        .iter()
        .map(|item| {
            let (size, color) = if replacement {
                (
                    item.replacement_size.as_deref().unwrap_or(&item.size),
                    item.replacement_color.as_deref().unwrap_or(&item.color),
                )
            } else {
                (item.size.as_str(), item.color.as_str())
            };
            let line = order.items.iter().find(|l| {
                l.product_id == item.product_id && l.size == item.size && l.color == item.color
            });
            ShipmentItem {
                sku: format!("{}-{size}-{color}", item.product_id),
                name: line.map_or_else(|| item.product_id.clone(), |l| l.name.clone()),
                quantity: item.quantity,
                unit_price: line.map_or(Money::zero(), |l| l.unit_price),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("3f9a2b7c11"), "3F9A2B");
        assert_eq!(short_id("ab"), "AB");
    }
}
