//! # Order Service
//!
//! Drives the order state machine from checkout to delivery.
//!
//! ## Transition Discipline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   trigger (webhook, customer, sweeper)                                  │
//! │        │                                                                │
//! │        ▼                                                                │
//! │   lock(order) ─► read ─► apply(event) ─► commit(version) ─► unlock      │
//! │                              │               + points   │               │
//! │                              │ Err           + reserve  │ stale version │
//! │                              ▼                          ▼               │
//! │                    Conflict + current view   Conflict + re-read view    │
//! │                                                                         │
//! │   after unlock: notify (spawned), shipment booking (BookingQueue)       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Gateway and carrier calls never happen while the order lock is held. The
//! shipment booking reads the order, calls the carrier with backoff, then
//! takes the lock again only to record the outcome.

use evolv_core::cart::Cart;
use evolv_core::discount::{AppliedDiscount, DiscountRequest, DiscountResolver};
use evolv_core::order::{
    format_order_number, Effect, FulfillmentState, NewOrder, NotificationKind, Order, OrderEvent,
    OrderStatus, OrderView, RefundStatus, Transition,
};
use evolv_core::pricing::{compute_breakdown, verify_client_total, PriceBreakdown};
use evolv_core::validation::validate_address;
use evolv_core::{Address, CoreError, LifecycleError, Money, ValidationError, CURRENCY};
use evolv_db::{Database, DbError, InterventionKind};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::carrier::{CarrierEvent, Direction, ShipmentItem, ShipmentRequest};
use crate::error::{EngineError, EngineResult};
use crate::gateway::{GatewayEvent, GatewayOrder};
use crate::jobs::BookingJob;
use crate::notify::{dispatch, Notification};
use crate::retry::{settle_booking, with_backoff};
use crate::{Collaborators, EngineContext};

// =============================================================================
// Requests and Responses
// =============================================================================

/// Price preview shown on the checkout page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutPreview {
    pub pricing: PriceBreakdown,
    pub discount: AppliedDiscount,
    /// Redeemable points right now (balance minus points held by open orders).
    pub available_points: i64,
}

/// Checkout submission. The discount is re-resolved; only its selection is
/// taken from the browser.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutRequest {
    pub shipping_address: Address,
    #[serde(default)]
    pub billing_address: Option<Address>,
    #[serde(default)]
    pub discount: DiscountRequest,
    /// Total the browser displayed; must match the recomputation to the paisa.
    pub submitted_total: Money,
}

/// Result of a successful checkout.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutReceipt {
    pub order: OrderView,
    /// Payment widget parameters. `None` when nothing is left to pay.
    pub payment: Option<GatewayOrder>,
}

/// Browser callback after the payment widget closes.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentCallback {
    pub gateway_order_id: String,
    pub payment_id: String,
    pub signature: String,
}

fn lock_key(order_id: &str) -> String {
    format!("order:{order_id}")
}

// =============================================================================
// Service
// =============================================================================

/// Order Lifecycle Manager.
#[derive(Clone)]
pub struct OrderService {
    ctx: EngineContext,
}

impl OrderService {
    pub fn new(ctx: EngineContext) -> Self {
        OrderService { ctx }
    }

    fn db(&self) -> &Database {
        &self.ctx.db
    }

    fn services(&self) -> &Collaborators {
        &self.ctx.collaborators
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Full order, for admin and internal use.
    pub async fn get(&self, order_id: &str) -> EngineResult<Order> {
        self.db()
            .orders()
            .get_by_id(order_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Order", order_id))
    }

    /// Customer-facing view. Someone else's order reads as not found.
    pub async fn view(&self, customer_id: &str, order_id: &str) -> EngineResult<OrderView> {
        let order = self.owned(customer_id, order_id).await?;
        Ok(OrderView::from(&order))
    }

    pub async fn list(&self, customer_id: &str, limit: i64) -> EngineResult<Vec<OrderView>> {
        let orders = self.db().orders().list_for_customer(customer_id, limit).await?;
        Ok(orders.iter().map(OrderView::from).collect())
    }

    async fn owned(&self, customer_id: &str, order_id: &str) -> EngineResult<Order> {
        let order = self.get(order_id).await?;
        if order.customer_id != customer_id {
            return Err(EngineError::not_found("Order", order_id));
        }
        Ok(order)
    }

    // -------------------------------------------------------------------------
    // Checkout
    // -------------------------------------------------------------------------

    /// Resolves a discount selection against a subtotal.
    ///
    /// Promo and points are mutually exclusive: the request names one.
    pub async fn resolve_discount(
        &self,
        customer_id: &str,
        subtotal: Money,
        request: &DiscountRequest,
    ) -> EngineResult<AppliedDiscount> {
        let mut resolver = DiscountResolver::new();
        match request {
            DiscountRequest::None => {}
            DiscountRequest::Promo { code } => {
                let promo = self.db().promos().get(code).await?;
                resolver.apply_promo(code, promo.as_ref(), subtotal, self.ctx.now())?;
            }
            DiscountRequest::Points { points } => {
                let available = self.db().loyalty().available(customer_id).await?;
                resolver.apply_points(*points, available, subtotal)?;
            }
        }
        Ok(resolver.into_applied())
    }

    /// Prices the customer's cart without placing anything.
    pub async fn preview(
        &self,
        customer_id: &str,
        shipping_state: &str,
        discount: &DiscountRequest,
    ) -> EngineResult<CheckoutPreview> {
        let cart = self.db().carts().get(customer_id).await?;
        let applied = self
            .resolve_discount(customer_id, cart.subtotal(), discount)
            .await?;
        Ok(CheckoutPreview {
            pricing: compute_breakdown(cart.lines(), shipping_state, &applied),
            discount: applied,
            available_points: self.db().loyalty().available(customer_id).await?,
        })
    }

    async fn verify_against_catalog(&self, cart: &Cart) -> EngineResult<()> {
        for line in cart.lines() {
            let product = self
                .services()
                .catalog
                .product(&line.product_id)
                .await?
                .ok_or_else(|| CoreError::ProductNotFound(line.product_id.clone()))?;
            if product.price != line.unit_price {
                return Err(ValidationError::PriceChanged {
                    product_id: line.product_id.clone(),
                    cart_price: line.unit_price,
                    catalogue_price: product.price,
                }
                .into());
            }
            let available = product.stock_for(&line.size, &line.color);
            if available < line.quantity {
                return Err(CoreError::InsufficientStock {
                    product_id: line.product_id.clone(),
                    size: line.size.clone(),
                    available,
                    requested: line.quantity,
                }
                .into());
            }
        }
        Ok(())
    }

    /// Places an order from the customer's cart.
    ///
    /// ## Errors
    /// - `Validation` for a bad address, empty cart, changed price, invalid
    ///   discount or a submitted total that differs from the recomputation
    /// - `Conflict` when stock ran out
    /// - `ExternalService` when the gateway order could not be created
    pub async fn checkout(
        &self,
        customer_id: &str,
        request: CheckoutRequest,
    ) -> EngineResult<CheckoutReceipt> {
        validate_address(&request.shipping_address)?;
        if let Some(billing) = &request.billing_address {
            validate_address(billing)?;
        }

        let cart = self.db().carts().get(customer_id).await?;
        if cart.is_empty() {
            return Err(CoreError::EmptyCart.into());
        }
        self.verify_against_catalog(&cart).await?;

        let discount = self
            .resolve_discount(customer_id, cart.subtotal(), &request.discount)
            .await?;
        let pricing = compute_breakdown(cart.lines(), &request.shipping_address.state, &discount);
        verify_client_total(&pricing, request.submitted_total)?;

        let tier = self.db().loyalty().get_account(customer_id).await?.tier;
        let now = self.ctx.now();
        let id = Uuid::new_v4().simple().to_string();
        let order_number = format_order_number(now, &id);

        let payment = if pricing.total.is_positive() {
            let gateway = &self.services().gateway;
            let created = with_backoff(&self.ctx.retry, "create_gateway_order", || {
                gateway.create_order(&order_number, pricing.total, CURRENCY)
            })
            .await
            .map_err(|exhausted| exhausted.last_error)?;
            Some(created)
        } else {
            None
        };

        let order = Order::place(
            NewOrder {
                id: id.clone(),
                order_number: order_number.clone(),
                customer_id: customer_id.to_string(),
                items: cart.into_lines(),
                billing_address: request
                    .billing_address
                    .unwrap_or_else(|| request.shipping_address.clone()),
                shipping_address: request.shipping_address,
                pricing,
                discount,
                loyalty_tier: tier,
                gateway_order_id: payment.as_ref().map(|p| p.gateway_order_id.clone()),
            },
            now,
        );

        self.db()
            .orders()
            .insert_placed(&order)
            .await
            .map_err(|e| match e {
                DbError::ReservationRejected { reason } => {
                    EngineError::validation("DISCOUNT_UNAVAILABLE", reason)
                }
                other => other.into(),
            })?;
        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            total = %order.total(),
            "Order placed"
        );
        self.notify(&order, NotificationKind::OrderPlaced);

        let order = if payment.is_none() {
            // fully covered by the discount
            self.transition(
                &order.id,
                OrderEvent::PaymentVerified {
                    payment_id: format!("free_{}", order.order_number),
                    method: Some("discount".to_string()),
                    amount: Money::zero(),
                },
            )
            .await?
        } else {
            order
        };

        Ok(CheckoutReceipt {
            order: OrderView::from(&order),
            payment,
        })
    }

    // -------------------------------------------------------------------------
    // Payment
    // -------------------------------------------------------------------------

    /// Browser callback. The signature binds the payment to the gateway
    /// order, which was created for exactly the order total.
    pub async fn confirm_payment(&self, callback: PaymentCallback) -> EngineResult<OrderView> {
        if !self.services().gateway.verify_payment(
            &callback.gateway_order_id,
            &callback.payment_id,
            &callback.signature,
        ) {
            warn!(gateway_order_id = %callback.gateway_order_id, "Payment signature rejected");
            return Err(ValidationError::InvalidSignature.into());
        }
        let order = self.by_gateway_order(&callback.gateway_order_id).await?;
        let amount = order.total();
        let order = self
            .transition(
                &order.id,
                OrderEvent::PaymentVerified {
                    payment_id: callback.payment_id,
                    method: None,
                    amount,
                },
            )
            .await?;
        Ok(OrderView::from(&order))
    }

    /// Applies a gateway webhook whose signature the caller has verified.
    pub async fn handle_gateway_event(&self, event: GatewayEvent) -> EngineResult<OrderView> {
        let order = match event {
            GatewayEvent::PaymentCaptured {
                gateway_order_id,
                payment_id,
                method,
                amount,
            } => {
                let order = self.by_gateway_order(&gateway_order_id).await?;
                self.transition(
                    &order.id,
                    OrderEvent::PaymentVerified {
                        payment_id,
                        method,
                        amount,
                    },
                )
                .await?
            }
            GatewayEvent::PaymentFailed {
                gateway_order_id,
                reason,
            } => {
                let order = self.by_gateway_order(&gateway_order_id).await?;
                self.transition(&order.id, OrderEvent::PaymentFailed { reason })
                    .await?
            }
            GatewayEvent::Refund {
                order_id,
                refund_id,
                status,
                amount,
            } => {
                self.apply_refund_update(&order_id, status, Some(refund_id), Some(amount))
                    .await?
            }
        };
        Ok(OrderView::from(&order))
    }

    async fn by_gateway_order(&self, gateway_order_id: &str) -> EngineResult<Order> {
        self.db()
            .orders()
            .get_by_gateway_order_id(gateway_order_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Order", gateway_order_id))
    }

    // -------------------------------------------------------------------------
    // Customer Actions
    // -------------------------------------------------------------------------

    /// Cancels an unpaid pending order.
    pub async fn cancel(&self, customer_id: &str, order_id: &str) -> EngineResult<OrderView> {
        self.owned(customer_id, order_id).await?;
        let order = self.transition(order_id, OrderEvent::CustomerCancel).await?;
        Ok(OrderView::from(&order))
    }

    /// "I received my order". Awards the delivery bonus once.
    pub async fn confirm_delivery(&self, customer_id: &str, order_id: &str) -> EngineResult<OrderView> {
        self.owned(customer_id, order_id).await?;
        let order = self.transition(order_id, OrderEvent::ConfirmDelivery).await?;
        Ok(OrderView::from(&order))
    }

    // -------------------------------------------------------------------------
    // Fulfillment
    // -------------------------------------------------------------------------

    /// Admin status change. Same forward-only rules as carrier webhooks.
    pub async fn update_status(
        &self,
        order_id: &str,
        status: OrderStatus,
        note: Option<String>,
    ) -> EngineResult<Order> {
        self.transition(order_id, OrderEvent::StatusUpdate { status, note })
            .await
    }

    /// Applies a carrier webhook whose signature the caller has verified.
    ///
    /// Labels that do not map to a status leave the order untouched.
    pub async fn handle_carrier_event(&self, event: CarrierEvent) -> EngineResult<Order> {
        let order = self
            .db()
            .orders()
            .get_by_awb(&event.awb)
            .await?
            .ok_or_else(|| EngineError::not_found("Shipment", event.awb.clone()))?;
        let Some(status) = event.status() else {
            debug!(awb = %event.awb, label = %event.current_status, "Carrier status ignored");
            return Ok(order);
        };
        self.transition(
            &order.id,
            OrderEvent::StatusUpdate {
                status,
                note: event.note(),
            },
        )
        .await
    }

    /// Books the forward shipment for a confirmed order.
    ///
    /// One round of attempts with backoff. A transient failure parks the
    /// order as retry-pending for the sweeper; a permanent one, or running
    /// past the configured total, queues a manual intervention.
    pub async fn book_shipment(&self, order_id: &str) -> EngineResult<Order> {
        let _booking = self.ctx.locks.lock(&format!("shipment:{order_id}")).await;

        let order = self.get(order_id).await?;
        let prior_attempts = match &order.fulfillment {
            FulfillmentState::NotRequested => 0,
            FulfillmentState::RetryPending { attempts, .. } => *attempts,
            FulfillmentState::Created { .. } | FulfillmentState::NeedsIntervention { .. } => {
                return Ok(order)
            }
        };
        if order.status != OrderStatus::Confirmed {
            return Ok(order);
        }

        let request = ShipmentRequest {
            reference: order.order_number.clone(),
            direction: Direction::Forward,
            address: order.shipping_address.clone(),
            items: order.items.iter().map(ShipmentItem::from).collect(),
            declared_value: order.total(),
        };
        let carrier = &self.services().carrier;
        let outcome = with_backoff(&self.ctx.retry, "create_shipment", || {
            carrier.create_shipment(&request)
        })
        .await;

        let (state, failed) = settle_booking(prior_attempts, outcome, self.ctx.give_up_after);
        let event = match state {
            FulfillmentState::Created { shipment } => OrderEvent::ShipmentCreated { shipment },
            FulfillmentState::RetryPending { attempts, last_error } => {
                OrderEvent::ShipmentRetrying { attempts, last_error }
            }
            FulfillmentState::NeedsIntervention { attempts, last_error } => {
                OrderEvent::ShipmentFailed { attempts, last_error }
            }
            FulfillmentState::NotRequested => return Ok(order),
        };

        let order = self.transition(order_id, event).await?;
        if let Some(detail) = failed {
            self.raise(order_id, InterventionKind::ShipmentFailed, detail).await;
        }
        Ok(order)
    }

    /// Polls the carrier for an in-transit order whose webhooks went quiet.
    pub async fn reconcile(&self, order_id: &str) -> EngineResult<Order> {
        let order = self.get(order_id).await?;
        let Some(awb) = order.fulfillment.shipment().map(|s| s.awb.clone()) else {
            return Ok(order);
        };
        let tracked = self.services().carrier.track(&awb).await?;
        self.db().orders().mark_polled(order_id, self.ctx.now()).await?;
        match tracked {
            Some(status) if order.status.advances_to(status) => {
                info!(order_id, awb = %awb, %status, "Reconciliation advanced order");
                self.transition(
                    order_id,
                    OrderEvent::StatusUpdate {
                        status,
                        note: None,
                    },
                )
                .await
            }
            _ => Ok(order),
        }
    }

    /// Cancels an unpaid order whose payment window has elapsed.
    pub async fn expire(&self, order_id: &str) -> EngineResult<Order> {
        self.transition(order_id, OrderEvent::PaymentWindowExpired)
            .await
    }

    // -------------------------------------------------------------------------
    // Refunds
    // -------------------------------------------------------------------------

    /// Records a refund and asks the gateway to pay it out.
    ///
    /// The refund record moves to `initiated` first, so a crash between the
    /// two steps leaves a visible initiated refund rather than a silent one.
    pub async fn initiate_refund(
        &self,
        order_id: &str,
        amount: Money,
        reason: &str,
    ) -> EngineResult<Order> {
        let order = self
            .transition(
                order_id,
                OrderEvent::RefundInitiated {
                    amount,
                    reason: reason.to_string(),
                },
            )
            .await?;
        let Some(payment_id) = order.payment.transaction_id.clone() else {
            return Err(EngineError::conflict(
                "Order has no captured payment to refund",
                Some(OrderView::from(&order)),
            ));
        };

        let gateway = &self.services().gateway;
        let outcome = with_backoff(&self.ctx.retry, "refund", || {
            gateway.refund(order_id, &payment_id, amount)
        })
        .await;

        match outcome {
            Ok(receipt) if receipt.status != RefundStatus::Initiated => {
                self.apply_refund_update(order_id, receipt.status, Some(receipt.refund_id), None)
                    .await
            }
            Ok(_) => Ok(order),
            Err(exhausted) => {
                let detail = format!("refund of {amount}: {}", exhausted.last_error);
                let order = self
                    .apply_refund_update(order_id, RefundStatus::Failed, None, None)
                    .await?;
                self.raise(order_id, InterventionKind::RefundFailed, detail).await;
                Ok(order)
            }
        }
    }

    /// Advances the refund sub-state (gateway webhook or refund response).
    pub async fn apply_refund_update(
        &self,
        order_id: &str,
        status: RefundStatus,
        refund_id: Option<String>,
        amount: Option<Money>,
    ) -> EngineResult<Order> {
        let amount = amount.filter(|a| a.is_positive());
        self.transition(
            order_id,
            OrderEvent::RefundUpdated {
                status,
                refund_id,
                amount,
            },
        )
        .await
    }

    // -------------------------------------------------------------------------
    // Transition Core
    // -------------------------------------------------------------------------

    /// Lock, read, apply, commit, unlock; then run the effects.
    pub(crate) async fn transition(&self, order_id: &str, event: OrderEvent) -> EngineResult<Order> {
        let late_payment_ref = match &event {
            OrderEvent::PaymentVerified { payment_id, .. } => Some(payment_id.clone()),
            _ => None,
        };

        let (order, effects) = {
            let guard = self.ctx.locks.lock(&lock_key(order_id)).await;
            let current = self.get(order_id).await?;
            let mut next = current.clone();

            match next.apply(event, self.ctx.now()) {
                Err(err) => {
                    drop(guard);
                    return Err(self.refuse(&current, err, late_payment_ref).await);
                }
                Ok(Transition::NoOp) => {
                    debug!(order_id, status = %current.status, "Transition was a no-op");
                    return Ok(current);
                }
                Ok(Transition::Applied(effects)) => {
                    if let Err(e) = self.db().orders().commit_with(&mut next, &effects).await {
                        return Err(self.stale(order_id, e).await);
                    }
                    (next, effects)
                }
            }
        };

        debug!(order_id, status = %order.status, version = order.version, "Transition committed");
        self.run_effects(&order, effects);
        Ok(order)
    }

    async fn refuse(&self, current: &Order, err: CoreError, payment_ref: Option<String>) -> EngineError {
        if let CoreError::Lifecycle(lifecycle) = &err {
            if lifecycle.is_anomaly() {
                warn!(
                    order_id = %current.id,
                    status = %current.status,
                    error = %lifecycle,
                    "Anomalous transition rejected"
                );
            }
            if let LifecycleError::LatePayment { order_number } = lifecycle {
                let detail = format!(
                    "payment {} captured for cancelled order {order_number}",
                    payment_ref.as_deref().unwrap_or("unknown")
                );
                self.raise(&current.id, InterventionKind::LatePayment, detail).await;
            }
        }
        EngineError::from_core(err, Some(OrderView::from(current)))
    }

    async fn stale(&self, order_id: &str, err: DbError) -> EngineError {
        if !matches!(err, DbError::VersionConflict { .. }) {
            return err.into();
        }
        warn!(order_id, "Stale order version, transition rejected");
        let current = self.get(order_id).await.ok().map(|o| OrderView::from(&o));
        EngineError::conflict(
            "Order was changed by another request, reload and retry",
            current,
        )
    }

    async fn raise(&self, order_id: &str, kind: InterventionKind, detail: String) {
        if let Err(e) = self
            .db()
            .interventions()
            .raise(order_id, kind, detail, self.ctx.now())
            .await
        {
            error!(order_id, kind = kind.as_str(), error = %e, "Failed to queue intervention");
        }
    }

    fn notify(&self, order: &Order, kind: NotificationKind) {
        dispatch(
            self.services().notifier.clone(),
            Notification {
                customer_id: order.customer_id.clone(),
                order_id: order.id.clone(),
                order_number: order.order_number.clone(),
                kind,
            },
        );
    }

    /// Effects outside the database. Points and reservations were written
    /// by the commit itself.
    fn run_effects(&self, order: &Order, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Notify(kind) => self.notify(order, kind),
                Effect::ScheduleShipment => self.ctx.bookings.enqueue(BookingJob::BookShipment {
                    order_id: order.id.clone(),
                }),
                Effect::CreditPoints { .. }
                | Effect::ConsumeReservation
                | Effect::ReleaseReservation => {}
            }
        }
    }
}
