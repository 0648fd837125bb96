//! # Order Lifecycle
//!
//! The order record and its state machine. [`Order::apply`] is the only way an
//! order changes after it is placed: it validates an [`OrderEvent`] against
//! the current state, mutates the order, appends timeline entries, and returns
//! the side effects the engine must run after committing.
//!
//! ## Status Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  pending ──payment──► confirmed ──► processing ──► shipped ──┐          │
//! │     │                                                 │      │          │
//! │     │ customer cancel (unpaid)                        │      ▼          │
//! │     │ payment window expired                          │  out_for_       │
//! │     ▼                                                 │  delivery       │
//! │  cancelled (terminal)                                 │      │          │
//! │                                                       ▼      ▼          │
//! │                                                   delivered (terminal)  │
//! │                                                                         │
//! │  payment:  pending ──► paid        refund (on paid orders):             │
//! │               │                      initiated ──► processing           │
//! │               ▼                          │              │               │
//! │             failed ──(retry)──► paid     └──► completed | failed        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Forward statuses never regress. A status that skips its predecessor
//! (`delivered` while `processing`) is rejected as out of order; the only
//! permitted skip is `shipped → delivered`.
//!
//! ## Applying Events
//! ```text
//! engine: lock ─► read order ─► clone ─► apply(event) ─► commit(version) ─► unlock
//!                                            │
//!                                            └─► Vec<Effect>  (run after commit)
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::cart::CartLine;
use crate::discount::AppliedDiscount;
use crate::error::{CoreResult, LifecycleError, ValidationError};
use crate::loyalty::{points_for_total, LedgerKind, Tier};
use crate::money::Money;
use crate::pricing::PriceBreakdown;
use crate::types::{Address, Shipment};
use crate::PAYMENT_WINDOW_HOURS;

// =============================================================================
// Status Enums
// =============================================================================

/// Order lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Placed, waiting for payment.
    Pending,
    /// Paid; shipment being booked.
    Confirmed,
    /// Shipment booked with the carrier.
    Processing,
    Shipped,
    OutForDelivery,
    /// Terminal.
    Delivered,
    /// Terminal.
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::OutForDelivery => "out_for_delivery",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<OrderStatus> {
        Some(match s {
            "pending" => OrderStatus::Pending,
            "confirmed" => OrderStatus::Confirmed,
            "processing" => OrderStatus::Processing,
            "shipped" => OrderStatus::Shipped,
            "out_for_delivery" => OrderStatus::OutForDelivery,
            "delivered" => OrderStatus::Delivered,
            "cancelled" => OrderStatus::Cancelled,
            _ => return None,
        })
    }

    /// Position on the forward chain. `Cancelled` is off the chain.
    fn stage(&self) -> Option<u8> {
        match self {
            OrderStatus::Pending => Some(0),
            OrderStatus::Confirmed => Some(1),
            OrderStatus::Processing => Some(2),
            OrderStatus::Shipped => Some(3),
            OrderStatus::OutForDelivery => Some(4),
            OrderStatus::Delivered => Some(5),
            OrderStatus::Cancelled => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// Statuses a carrier or admin may set.
    pub fn is_fulfillment_status(&self) -> bool {
        matches!(
            self,
            OrderStatus::Processing
                | OrderStatus::Shipped
                | OrderStatus::OutForDelivery
                | OrderStatus::Delivered
        )
    }

    /// Whether `next` is a legal forward step from `self`.
    pub fn advances_to(&self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Confirmed, OrderStatus::Processing)
                | (OrderStatus::Processing, OrderStatus::Shipped)
                | (OrderStatus::Shipped, OrderStatus::OutForDelivery)
                | (OrderStatus::Shipped, OrderStatus::Delivered)
                | (OrderStatus::OutForDelivery, OrderStatus::Delivered)
        )
    }

    fn default_message(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "Order Placed",
            OrderStatus::Confirmed => "Payment received, order confirmed",
            OrderStatus::Processing => "Order is being packed",
            OrderStatus::Shipped => "Order shipped",
            OrderStatus::OutForDelivery => "Out for delivery",
            OrderStatus::Delivered => "Order delivered",
            OrderStatus::Cancelled => "Order cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment status, tracked independently of the order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Refund sub-state on a paid order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum RefundStatus {
    Initiated,
    Processing,
    /// Authoritative: funds have returned to the customer.
    Completed,
    Failed,
}

impl RefundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundStatus::Initiated => "initiated",
            RefundStatus::Processing => "processing",
            RefundStatus::Completed => "completed",
            RefundStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<RefundStatus> {
        Some(match s {
            "initiated" => RefundStatus::Initiated,
            "processing" => RefundStatus::Processing,
            "completed" => RefundStatus::Completed,
            "failed" => RefundStatus::Failed,
            _ => return None,
        })
    }

    fn advances_to(&self, next: RefundStatus) -> bool {
        matches!(
            (self, next),
            (RefundStatus::Initiated, RefundStatus::Processing)
                | (RefundStatus::Initiated, RefundStatus::Completed)
                | (RefundStatus::Initiated, RefundStatus::Failed)
                | (RefundStatus::Processing, RefundStatus::Completed)
                | (RefundStatus::Processing, RefundStatus::Failed)
        )
    }
}

impl fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Sub-records
// =============================================================================

/// Refund bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RefundRecord {
    /// Gateway refund id, once the gateway has accepted the request.
    pub refund_id: Option<String>,
    pub status: RefundStatus,
    /// Amount requested.
    pub amount: Money,
    pub reason: String,
    #[ts(as = "String")]
    pub initiated_at: DateTime<Utc>,
    /// Set only when `status == Completed`.
    pub refunded_amount: Option<Money>,
    /// Set only when `status == Completed`.
    #[ts(as = "Option<String>")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Payment sub-record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PaymentRecord {
    /// Instrument reported by the gateway (upi, card, netbanking, ...).
    pub method: Option<String>,
    pub status: PaymentStatus,
    pub gateway_order_id: Option<String>,
    /// Gateway payment id once paid.
    pub transaction_id: Option<String>,
    #[ts(as = "Option<String>")]
    pub paid_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub refund: Option<RefundRecord>,
}

impl PaymentRecord {
    fn new() -> Self {
        PaymentRecord {
            method: None,
            status: PaymentStatus::Pending,
            gateway_order_id: None,
            transaction_id: None,
            paid_at: None,
            failure_reason: None,
            refund: None,
        }
    }
}

/// An append-only audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TimelineEntry {
    pub status: OrderStatus,
    pub message: String,
    #[ts(as = "String")]
    pub timestamp: DateTime<Utc>,
}

/// Progress of the outbound shipment booking.
///
/// Carrier failures leave the order in `RetryPending` rather than failing it;
/// only after retries are exhausted does it become `NeedsIntervention`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, Default)]
#[ts(export)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FulfillmentState {
    #[default]
    NotRequested,
    RetryPending { attempts: u32, last_error: String },
    Created { shipment: Shipment },
    NeedsIntervention { attempts: u32, last_error: String },
}

impl FulfillmentState {
    pub fn shipment(&self) -> Option<&Shipment> {
        match self {
            FulfillmentState::Created { shipment } => Some(shipment),
            _ => None,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, FulfillmentState::Created { .. })
    }
}

// =============================================================================
// Events and Effects
// =============================================================================

/// Something that happened to an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderEvent {
    /// Gateway confirmed payment (signature already verified).
    PaymentVerified {
        payment_id: String,
        method: Option<String>,
        amount: Money,
    },
    PaymentFailed { reason: String },
    CustomerCancel,
    /// Raised by the sweeper.
    PaymentWindowExpired,
    /// Carrier webhook, reconciliation poll or admin update.
    StatusUpdate {
        status: OrderStatus,
        note: Option<String>,
    },
    /// Customer pressed "I received my order".
    ConfirmDelivery,
    ShipmentRetrying { attempts: u32, last_error: String },
    ShipmentCreated { shipment: Shipment },
    ShipmentFailed { attempts: u32, last_error: String },
    RefundInitiated { amount: Money, reason: String },
    RefundUpdated {
        status: RefundStatus,
        refund_id: Option<String>,
        amount: Option<Money>,
    },
}

/// Customer notifications. Dispatch is fire-and-forget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationKind {
    OrderPlaced,
    OrderConfirmed,
    PaymentFailed,
    OrderCancelled { reason: String },
    OrderShipped,
    OutForDelivery,
    OrderDelivered,
    RefundInitiated,
    RefundCompleted,
    ExchangeApproved,
    ExchangeRejected { reason: String },
}

/// Work the engine performs after a transition commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Credit loyalty points under the order's idempotency key.
    CreditPoints { kind: LedgerKind, points: i64 },
    /// Payment confirmed: deduct held points / count promo usage.
    ConsumeReservation,
    /// Order cancelled: return held points / promo usage.
    ReleaseReservation,
    Notify(NotificationKind),
    /// Book the outbound shipment with the carrier.
    ScheduleShipment,
}

/// Outcome of [`Order::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// State changed; commit and run the effects.
    Applied(Vec<Effect>),
    /// Duplicate delivery of an already-applied event. Nothing to commit.
    NoOp,
}

impl Transition {
    pub fn is_noop(&self) -> bool {
        matches!(self, Transition::NoOp)
    }

    pub fn effects(&self) -> &[Effect] {
        match self {
            Transition::Applied(effects) => effects,
            Transition::NoOp => &[],
        }
    }
}

// =============================================================================
// Order
// =============================================================================

/// Everything needed to place an order. Built by checkout after pricing.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub id: String,
    pub order_number: String,
    pub customer_id: String,
    pub items: Vec<CartLine>,
    pub shipping_address: Address,
    pub billing_address: Address,
    pub pricing: PriceBreakdown,
    pub discount: AppliedDiscount,
    pub loyalty_tier: Tier,
    pub gateway_order_id: Option<String>,
}

/// A placed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Order {
    pub id: String,
    /// Human-readable identity, e.g. `EV-20260301-7K2Q9D`.
    pub order_number: String,
    pub customer_id: String,
    /// Frozen copies of the cart lines at checkout.
    pub items: Vec<CartLine>,
    pub shipping_address: Address,
    pub billing_address: Address,
    /// Price snapshot at creation. Never recomputed.
    pub pricing: PriceBreakdown,
    pub discount: AppliedDiscount,
    /// Tier at order time; decides the earning rate.
    pub loyalty_tier: Tier,
    pub payment: PaymentRecord,
    pub status: OrderStatus,
    pub timeline: Vec<TimelineEntry>,
    pub fulfillment: FulfillmentState,
    pub points_earned: i64,
    pub delivery_bonus_awarded: bool,
    /// Optimistic concurrency counter, bumped by every commit.
    pub version: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub delivered_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Creates a `pending` order with its first timeline entry.
    pub fn place(new: NewOrder, now: DateTime<Utc>) -> Order {
        let mut payment = PaymentRecord::new();
        payment.gateway_order_id = new.gateway_order_id;

        Order {
            id: new.id,
            order_number: new.order_number,
            customer_id: new.customer_id,
            items: new.items,
            shipping_address: new.shipping_address,
            billing_address: new.billing_address,
            pricing: new.pricing,
            discount: new.discount,
            loyalty_tier: new.loyalty_tier,
            payment,
            status: OrderStatus::Pending,
            timeline: vec![TimelineEntry {
                status: OrderStatus::Pending,
                message: OrderStatus::Pending.default_message().to_string(),
                timestamp: now,
            }],
            fulfillment: FulfillmentState::NotRequested,
            points_earned: 0,
            delivery_bonus_awarded: false,
            version: 0,
            created_at: now,
            updated_at: now,
            delivered_at: None,
        }
    }

    /// Moment after which an unpaid order is cancelled.
    pub fn payment_deadline(&self) -> DateTime<Utc> {
        self.created_at + Duration::hours(PAYMENT_WINDOW_HOURS)
    }

    pub fn total(&self) -> Money {
        self.pricing.total
    }

    pub fn last_message(&self) -> &str {
        self.timeline
            .last()
            .map(|e| e.message.as_str())
            .unwrap_or_default()
    }

    /// Validates `event` against the current state and applies it.
    ///
    /// On error the order is left untouched.
    pub fn apply(&mut self, event: OrderEvent, now: DateTime<Utc>) -> CoreResult<Transition> {
        let transition = match event {
            OrderEvent::PaymentVerified {
                payment_id,
                method,
                amount,
            } => self.on_payment_verified(payment_id, method, amount, now)?,
            OrderEvent::PaymentFailed { reason } => self.on_payment_failed(reason, now)?,
            OrderEvent::CustomerCancel => self.on_customer_cancel(now)?,
            OrderEvent::PaymentWindowExpired => self.on_window_expired(now)?,
            OrderEvent::StatusUpdate { status, note } => self.on_status_update(status, note, now)?,
            OrderEvent::ConfirmDelivery => self.on_confirm_delivery(now)?,
            OrderEvent::ShipmentRetrying {
                attempts,
                last_error,
            } => self.on_shipment_progress(
                FulfillmentState::RetryPending {
                    attempts,
                    last_error,
                },
                now,
            )?,
            OrderEvent::ShipmentFailed {
                attempts,
                last_error,
            } => self.on_shipment_progress(
                FulfillmentState::NeedsIntervention {
                    attempts,
                    last_error,
                },
                now,
            )?,
            OrderEvent::ShipmentCreated { shipment } => self.on_shipment_created(shipment, now)?,
            OrderEvent::RefundInitiated { amount, reason } => {
                self.on_refund_initiated(amount, reason, now)?
            }
            OrderEvent::RefundUpdated {
                status,
                refund_id,
                amount,
            } => self.on_refund_updated(status, refund_id, amount, now)?,
        };

        if !transition.is_noop() {
            self.updated_at = now;
        }
        Ok(transition)
    }

    fn push_timeline(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.timeline.push(TimelineEntry {
            status: self.status,
            message: message.into(),
            timestamp: now,
        });
    }

    // -------------------------------------------------------------------------
    // Payment
    // -------------------------------------------------------------------------

    fn on_payment_verified(
        &mut self,
        payment_id: String,
        method: Option<String>,
        amount: Money,
        now: DateTime<Utc>,
    ) -> CoreResult<Transition> {
        if self.payment.status == PaymentStatus::Paid {
            return Ok(Transition::NoOp);
        }
        if self.status == OrderStatus::Cancelled {
            return Err(LifecycleError::LatePayment {
                order_number: self.order_number.clone(),
            }
            .into());
        }
        if self.status != OrderStatus::Pending {
            return Err(LifecycleError::InvalidTransition {
                from: self.status,
                to: OrderStatus::Confirmed,
            }
            .into());
        }
        if amount != self.pricing.total {
            return Err(ValidationError::PaymentAmountMismatch {
                expected: self.pricing.total,
                received: amount,
            }
            .into());
        }

        self.payment.status = PaymentStatus::Paid;
        self.payment.transaction_id = Some(payment_id);
        self.payment.method = method;
        self.payment.paid_at = Some(now);
        self.payment.failure_reason = None;
        self.status = OrderStatus::Confirmed;
        self.points_earned = points_for_total(self.pricing.total, self.loyalty_tier);
        self.push_timeline(OrderStatus::Confirmed.default_message(), now);

        let mut effects = vec![Effect::ConsumeReservation];
        if self.points_earned > 0 {
            effects.push(Effect::CreditPoints {
                kind: LedgerKind::Earn,
                points: self.points_earned,
            });
        }
        effects.push(Effect::Notify(NotificationKind::OrderConfirmed));
        effects.push(Effect::ScheduleShipment);
        Ok(Transition::Applied(effects))
    }

    fn on_payment_failed(&mut self, reason: String, now: DateTime<Utc>) -> CoreResult<Transition> {
        match self.payment.status {
            PaymentStatus::Paid => {
                return Err(LifecycleError::PaymentConflict {
                    current: PaymentStatus::Paid,
                    attempted: PaymentStatus::Failed,
                }
                .into())
            }
            PaymentStatus::Failed => return Ok(Transition::NoOp),
            PaymentStatus::Pending => {}
        }
        if self.status == OrderStatus::Cancelled {
            return Ok(Transition::NoOp);
        }

        self.payment.status = PaymentStatus::Failed;
        self.payment.failure_reason = Some(reason);
        self.push_timeline("Payment Failed", now);
        Ok(Transition::Applied(vec![Effect::Notify(
            NotificationKind::PaymentFailed,
        )]))
    }

    // -------------------------------------------------------------------------
    // Cancellation
    // -------------------------------------------------------------------------

    fn on_customer_cancel(&mut self, now: DateTime<Utc>) -> CoreResult<Transition> {
        if self.status != OrderStatus::Pending || self.payment.status == PaymentStatus::Paid {
            return Err(LifecycleError::CancelNotAllowed {
                status: self.status,
                payment: self.payment.status,
            }
            .into());
        }
        self.cancel("Order cancelled by customer", now)
    }

    fn on_window_expired(&mut self, now: DateTime<Utc>) -> CoreResult<Transition> {
        if self.status == OrderStatus::Cancelled {
            return Ok(Transition::NoOp);
        }
        if self.status != OrderStatus::Pending || self.payment.status == PaymentStatus::Paid {
            return Err(LifecycleError::InvalidTransition {
                from: self.status,
                to: OrderStatus::Cancelled,
            }
            .into());
        }
        let deadline = self.payment_deadline();
        if now < deadline {
            return Err(LifecycleError::PaymentWindowOpen { deadline }.into());
        }
        self.cancel("Payment not received in time, order cancelled", now)
    }

    fn cancel(&mut self, message: &str, now: DateTime<Utc>) -> CoreResult<Transition> {
        self.status = OrderStatus::Cancelled;
        self.push_timeline(message, now);
        Ok(Transition::Applied(vec![
            Effect::ReleaseReservation,
            Effect::Notify(NotificationKind::OrderCancelled {
                reason: message.to_string(),
            }),
        ]))
    }

    // -------------------------------------------------------------------------
    // Fulfillment
    // -------------------------------------------------------------------------

    fn on_status_update(
        &mut self,
        target: OrderStatus,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> CoreResult<Transition> {
        if !target.is_fulfillment_status()
            || matches!(self.status, OrderStatus::Pending | OrderStatus::Cancelled)
        {
            return Err(LifecycleError::InvalidTransition {
                from: self.status,
                to: target,
            }
            .into());
        }
        if target == self.status {
            return Ok(Transition::NoOp);
        }
        if !self.status.advances_to(target) {
            return Err(LifecycleError::OutOfOrder {
                current: self.status,
                received: target,
            }
            .into());
        }

        self.status = target;
        let message = note.unwrap_or_else(|| target.default_message().to_string());
        self.push_timeline(message, now);

        let notification = match target {
            OrderStatus::Shipped => Some(NotificationKind::OrderShipped),
            OrderStatus::OutForDelivery => Some(NotificationKind::OutForDelivery),
            OrderStatus::Delivered => {
                self.delivered_at = Some(now);
                Some(NotificationKind::OrderDelivered)
            }
            _ => None,
        };
        Ok(Transition::Applied(
            notification.map(Effect::Notify).into_iter().collect(),
        ))
    }

    fn on_confirm_delivery(&mut self, now: DateTime<Utc>) -> CoreResult<Transition> {
        let mut effects = Vec::new();
        match self.status {
            OrderStatus::Shipped | OrderStatus::OutForDelivery => {
                self.status = OrderStatus::Delivered;
                self.delivered_at = Some(now);
                effects.push(Effect::Notify(NotificationKind::OrderDelivered));
            }
            OrderStatus::Delivered if !self.delivery_bonus_awarded => {}
            OrderStatus::Delivered => return Ok(Transition::NoOp),
            other => {
                return Err(LifecycleError::InvalidTransition {
                    from: other,
                    to: OrderStatus::Delivered,
                }
                .into())
            }
        }

        self.delivery_bonus_awarded = true;
        self.push_timeline("Delivery confirmed by customer", now);
        let bonus = points_for_total(self.pricing.total, self.loyalty_tier);
        if bonus > 0 {
            effects.insert(
                0,
                Effect::CreditPoints {
                    kind: LedgerKind::Bonus,
                    points: bonus,
                },
            );
        }
        Ok(Transition::Applied(effects))
    }

    fn ensure_fulfillable(&self) -> CoreResult<()> {
        if matches!(self.status, OrderStatus::Pending | OrderStatus::Cancelled) {
            return Err(LifecycleError::NotFulfillable {
                status: self.status,
            }
            .into());
        }
        Ok(())
    }

    fn on_shipment_progress(
        &mut self,
        state: FulfillmentState,
        now: DateTime<Utc>,
    ) -> CoreResult<Transition> {
        self.ensure_fulfillable()?;
        if self.fulfillment.is_created() || self.fulfillment == state {
            return Ok(Transition::NoOp);
        }
        let message = match &state {
            FulfillmentState::RetryPending { attempts, .. } => {
                format!("Shipment booking delayed after {attempts} attempts, will retry")
            }
            FulfillmentState::NeedsIntervention { attempts, .. } => {
                format!("Shipment booking failed after {attempts} attempts, needs attention")
            }
            FulfillmentState::NotRequested | FulfillmentState::Created { .. } => String::new(),
        };
        self.fulfillment = state;
        if !message.is_empty() {
            self.push_timeline(message, now);
        }
        Ok(Transition::Applied(Vec::new()))
    }

    fn on_shipment_created(&mut self, shipment: Shipment, now: DateTime<Utc>) -> CoreResult<Transition> {
        self.ensure_fulfillable()?;
        if self.fulfillment.is_created() {
            return Ok(Transition::NoOp);
        }
        let awb = shipment.awb.clone();
        self.fulfillment = FulfillmentState::Created { shipment };
        if self.status == OrderStatus::Confirmed {
            self.status = OrderStatus::Processing;
        }
        self.push_timeline(format!("Shipment booked, AWB {awb}"), now);
        Ok(Transition::Applied(Vec::new()))
    }

    // -------------------------------------------------------------------------
    // Refunds
    // -------------------------------------------------------------------------

    fn on_refund_initiated(
        &mut self,
        amount: Money,
        reason: String,
        now: DateTime<Utc>,
    ) -> CoreResult<Transition> {
        let current = self.payment.refund.as_ref().map(|r| r.status);
        if self.payment.status != PaymentStatus::Paid
            || !matches!(current, None | Some(RefundStatus::Failed))
        {
            return Err(LifecycleError::RefundTransition {
                from: current,
                to: RefundStatus::Initiated,
            }
            .into());
        }
        if !amount.is_positive() || amount > self.pricing.total {
            return Err(ValidationError::OutOfRange {
                field: "refund amount".to_string(),
                min: 1,
                max: self.pricing.total.paise(),
            }
            .into());
        }

        self.payment.refund = Some(RefundRecord {
            refund_id: None,
            status: RefundStatus::Initiated,
            amount,
            reason,
            initiated_at: now,
            refunded_amount: None,
            completed_at: None,
        });
        self.push_timeline(format!("Refund of {amount} initiated"), now);
        Ok(Transition::Applied(vec![Effect::Notify(
            NotificationKind::RefundInitiated,
        )]))
    }

    fn on_refund_updated(
        &mut self,
        next: RefundStatus,
        refund_id: Option<String>,
        amount: Option<Money>,
        now: DateTime<Utc>,
    ) -> CoreResult<Transition> {
        let Some(current) = self.payment.refund.as_ref().map(|r| r.status) else {
            return Err(LifecycleError::RefundTransition {
                from: None,
                to: next,
            }
            .into());
        };
        if current == next {
            return Ok(Transition::NoOp);
        }
        if !current.advances_to(next) {
            return Err(LifecycleError::RefundTransition {
                from: Some(current),
                to: next,
            }
            .into());
        }

        let mut effects = Vec::new();
        let message = {
            let Some(refund) = self.payment.refund.as_mut() else {
                return Ok(Transition::NoOp);
            };
            refund.status = next;
            if refund_id.is_some() {
                refund.refund_id = refund_id;
            }
            match next {
                RefundStatus::Completed => {
                    let refunded = amount.unwrap_or(refund.amount);
                    refund.refunded_amount = Some(refunded);
                    refund.completed_at = Some(now);
                    effects.push(Effect::Notify(NotificationKind::RefundCompleted));
                    format!("Refund of {refunded} completed")
                }
                RefundStatus::Processing => "Refund is being processed".to_string(),
                RefundStatus::Failed => "Refund failed, our team will retry".to_string(),
                RefundStatus::Initiated => String::new(),
            }
        };
        self.push_timeline(message, now);
        Ok(Transition::Applied(effects))
    }
}

/// Formats an order number: `EV-YYYYMMDD-XXXXXX`.
///
/// `entropy` supplies the suffix (its first six alphanumerics, upper-cased);
/// callers pass a fresh random string.
pub fn format_order_number(now: DateTime<Utc>, entropy: &str) -> String {
    let suffix: String = entropy
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(6)
        .map(|c| c.to_ascii_uppercase())
        .collect();
    format!("EV-{}-{}", now.format("%Y%m%d"), suffix)
}

// =============================================================================
// Customer View
// =============================================================================

/// What a customer sees for an order. Internal fulfillment errors and
/// anomaly details are not included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderView {
    pub id: String,
    pub order_number: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub refund_status: Option<RefundStatus>,
    pub pricing: PriceBreakdown,
    pub items: Vec<CartLine>,
    pub tracking_url: Option<String>,
    pub last_message: String,
    pub timeline: Vec<TimelineEntry>,
    pub points_earned: i64,
    pub version: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub delivered_at: Option<DateTime<Utc>>,
}

impl From<&Order> for OrderView {
    fn from(order: &Order) -> Self {
        OrderView {
            id: order.id.clone(),
            order_number: order.order_number.clone(),
            status: order.status,
            payment_status: order.payment.status,
            refund_status: order.payment.refund.as_ref().map(|r| r.status),
            pricing: order.pricing.clone(),
            items: order.items.clone(),
            tracking_url: order.fulfillment.shipment().map(|s| s.tracking_url.clone()),
            last_message: order.last_message().to_string(),
            timeline: order.timeline.clone(),
            points_earned: order.points_earned,
            version: order.version,
            created_at: order.created_at,
            delivered_at: order.delivered_at,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::discount::AppliedDiscount;
    use crate::error::CoreError;
    use crate::pricing::compute_breakdown;
    use chrono::TimeZone;

    pub(crate) fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap()
    }

    pub(crate) fn address() -> Address {
        Address {
            full_name: "Asha R".to_string(),
            phone: "9876543210".to_string(),
            line1: "12 Anna Salai".to_string(),
            line2: None,
            city: "Chennai".to_string(),
            state: "Tamil Nadu".to_string(),
            pincode: "600002".to_string(),
            country: "India".to_string(),
        }
    }

    pub(crate) fn pending_order() -> Order {
        let items = vec![CartLine {
            product_id: "saree-11".to_string(),
            name: "Kanchi Silk Saree".to_string(),
            size: "Free".to_string(),
            color: "Maroon".to_string(),
            unit_price: Money::from_paise(299_999),
            quantity: 1,
        }];
        let pricing = compute_breakdown(&items, "Tamil Nadu", &AppliedDiscount::None);
        Order::place(
            NewOrder {
                id: "order-1".to_string(),
                order_number: format_order_number(t0(), "a1b2c3d4"),
                customer_id: "cust-1".to_string(),
                items,
                shipping_address: address(),
                billing_address: address(),
                pricing,
                discount: AppliedDiscount::None,
                loyalty_tier: Tier::Bronze,
                gateway_order_id: Some("gw_order_1".to_string()),
            },
            t0(),
        )
    }

    fn paid(amount: Money) -> OrderEvent {
        OrderEvent::PaymentVerified {
            payment_id: "pay_1".to_string(),
            method: Some("upi".to_string()),
            amount,
        }
    }

    pub(crate) fn delivered_order() -> Order {
        let mut order = pending_order();
        let total = order.total();
        order.apply(paid(total), t0()).unwrap();
        for status in [
            OrderStatus::Processing,
            OrderStatus::Shipped,
            OrderStatus::Delivered,
        ] {
            order
                .apply(OrderEvent::StatusUpdate { status, note: None }, t0())
                .unwrap();
        }
        order
    }

    #[test]
    fn test_place_creates_pending_with_timeline() {
        let order = pending_order();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.payment.status, PaymentStatus::Pending);
        assert_eq!(order.timeline.len(), 1);
        assert_eq!(order.last_message(), "Order Placed");
        assert_eq!(order.order_number, "EV-20260301-A1B2C3");
    }

    #[test]
    fn test_payment_confirms_and_credits_once() {
        let mut order = pending_order();
        let total = order.total();

        let first = order.apply(paid(total), t0()).unwrap();
        assert_eq!(order.status, OrderStatus::Confirmed);
        assert_eq!(order.payment.status, PaymentStatus::Paid);
        assert!(first.effects().contains(&Effect::CreditPoints {
            kind: LedgerKind::Earn,
            points: 30,
        }));
        assert!(first.effects().contains(&Effect::ScheduleShipment));

        let timeline_len = order.timeline.len();
        let second = order.apply(paid(total), t0()).unwrap();
        assert!(second.is_noop());
        assert_eq!(order.timeline.len(), timeline_len);
    }

    #[test]
    fn test_payment_amount_mismatch_rejected() {
        let mut order = pending_order();
        let err = order.apply(paid(Money::from_rupees(1)), t0()).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Validation(ValidationError::PaymentAmountMismatch { .. })
        ));
        assert_eq!(order.status, OrderStatus::Pending);
    }

    #[test]
    fn test_late_payment_on_cancelled_order() {
        let mut order = pending_order();
        order.apply(OrderEvent::CustomerCancel, t0()).unwrap();
        let total = order.total();
        let err = order.apply(paid(total), t0()).unwrap_err();
        assert!(matches!(err, CoreError::Lifecycle(LifecycleError::LatePayment { .. })));
        assert_eq!(order.status, OrderStatus::Cancelled);
        assert_eq!(order.payment.status, PaymentStatus::Pending);
    }

    #[test]
    fn test_payment_failure_keeps_order_pending() {
        let mut order = pending_order();
        order
            .apply(
                OrderEvent::PaymentFailed {
                    reason: "bank declined".to_string(),
                },
                t0(),
            )
            .unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.payment.status, PaymentStatus::Failed);
        assert_eq!(order.last_message(), "Payment Failed");

        // the customer retries on the same gateway order
        let total = order.total();
        order.apply(paid(total), t0()).unwrap();
        assert_eq!(order.status, OrderStatus::Confirmed);
    }

    #[test]
    fn test_cancel_only_while_pending() {
        let mut order = pending_order();
        let total = order.total();
        order.apply(paid(total), t0()).unwrap();
        let err = order.apply(OrderEvent::CustomerCancel, t0()).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Lifecycle(LifecycleError::CancelNotAllowed { .. })
        ));
    }

    #[test]
    fn test_window_expiry() {
        let mut order = pending_order();
        let early = order
            .apply(OrderEvent::PaymentWindowExpired, t0() + Duration::hours(11))
            .unwrap_err();
        assert!(matches!(
            early,
            CoreError::Lifecycle(LifecycleError::PaymentWindowOpen { .. })
        ));

        let transition = order
            .apply(OrderEvent::PaymentWindowExpired, t0() + Duration::hours(12))
            .unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
        assert!(transition.effects().contains(&Effect::ReleaseReservation));

        // a second sweep is harmless
        assert!(order
            .apply(OrderEvent::PaymentWindowExpired, t0() + Duration::hours(13))
            .unwrap()
            .is_noop());
    }

    #[test]
    fn test_out_of_order_webhook_rejected() {
        let mut order = pending_order();
        let total = order.total();
        order.apply(paid(total), t0()).unwrap();
        order
            .apply(
                OrderEvent::StatusUpdate {
                    status: OrderStatus::Processing,
                    note: None,
                },
                t0(),
            )
            .unwrap();
        let before = order.clone();

        let err = order
            .apply(
                OrderEvent::StatusUpdate {
                    status: OrderStatus::Delivered,
                    note: None,
                },
                t0(),
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::Lifecycle(LifecycleError::OutOfOrder { .. })));
        assert_eq!(order, before);
    }

    #[test]
    fn test_status_never_regresses() {
        let mut order = delivered_order();
        for status in [
            OrderStatus::Processing,
            OrderStatus::Shipped,
            OrderStatus::OutForDelivery,
        ] {
            let err = order
                .apply(OrderEvent::StatusUpdate { status, note: None }, t0())
                .unwrap_err();
            assert!(matches!(err, CoreError::Lifecycle(LifecycleError::OutOfOrder { .. })));
            assert_eq!(order.status, OrderStatus::Delivered);
        }
    }

    #[test]
    fn test_confirm_delivery_awards_bonus_once() {
        let mut order = pending_order();
        let total = order.total();
        order.apply(paid(total), t0()).unwrap();
        for status in [OrderStatus::Processing, OrderStatus::Shipped] {
            order
                .apply(OrderEvent::StatusUpdate { status, note: None }, t0())
                .unwrap();
        }

        let first = order.apply(OrderEvent::ConfirmDelivery, t0()).unwrap();
        assert_eq!(order.status, OrderStatus::Delivered);
        assert!(order.delivery_bonus_awarded);
        assert!(first.effects().contains(&Effect::CreditPoints {
            kind: LedgerKind::Bonus,
            points: 30,
        }));

        assert!(order.apply(OrderEvent::ConfirmDelivery, t0()).unwrap().is_noop());
    }

    #[test]
    fn test_confirm_after_carrier_delivery_still_awards_bonus() {
        let mut order = delivered_order();
        let transition = order.apply(OrderEvent::ConfirmDelivery, t0()).unwrap();
        assert!(matches!(
            transition.effects().first(),
            Some(Effect::CreditPoints {
                kind: LedgerKind::Bonus,
                ..
            })
        ));
    }

    #[test]
    fn test_shipment_created_moves_to_processing() {
        let mut order = pending_order();
        let total = order.total();
        order.apply(paid(total), t0()).unwrap();
        order
            .apply(
                OrderEvent::ShipmentRetrying {
                    attempts: 1,
                    last_error: "carrier timeout".to_string(),
                },
                t0(),
            )
            .unwrap();
        assert!(matches!(order.fulfillment, FulfillmentState::RetryPending { attempts: 1, .. }));
        let last = order.timeline.last().unwrap();
        assert_eq!(last.status, OrderStatus::Confirmed);
        assert!(last.message.contains("delayed after 1 attempts"));

        order
            .apply(
                OrderEvent::ShipmentCreated {
                    shipment: Shipment {
                        shipment_id: "shp_1".to_string(),
                        awb: "AWB123".to_string(),
                        tracking_url: "https://track.example/AWB123".to_string(),
                    },
                },
                t0(),
            )
            .unwrap();
        assert_eq!(order.status, OrderStatus::Processing);
        assert_eq!(order.timeline.last().unwrap().message, "Shipment booked, AWB AWB123");
        let view = OrderView::from(&order);
        assert_eq!(view.tracking_url.as_deref(), Some("https://track.example/AWB123"));
    }

    #[test]
    fn test_failed_booking_recorded_on_timeline() {
        let mut order = pending_order();
        let total = order.total();
        order.apply(paid(total), t0()).unwrap();
        let before = order.timeline.len();

        order
            .apply(
                OrderEvent::ShipmentFailed {
                    attempts: 6,
                    last_error: "pincode not serviceable".to_string(),
                },
                t0(),
            )
            .unwrap();
        assert_eq!(order.timeline.len(), before + 1);
        assert!(order
            .timeline
            .last()
            .unwrap()
            .message
            .contains("failed after 6 attempts"));

        // a manual booking on an order that already moved on is still recorded
        order
            .apply(
                OrderEvent::StatusUpdate {
                    status: OrderStatus::Processing,
                    note: None,
                },
                t0(),
            )
            .unwrap();
        let before = order.timeline.len();
        order
            .apply(
                OrderEvent::ShipmentCreated {
                    shipment: Shipment {
                        shipment_id: "shp_9".to_string(),
                        awb: "AWB999".to_string(),
                        tracking_url: "https://track.example/AWB999".to_string(),
                    },
                },
                t0(),
            )
            .unwrap();
        assert_eq!(order.status, OrderStatus::Processing);
        assert_eq!(order.timeline.len(), before + 1);
    }

    #[test]
    fn test_refund_flow_only_completed_records_amount() {
        let mut order = delivered_order();
        order
            .apply(
                OrderEvent::RefundInitiated {
                    amount: Money::from_rupees(1000),
                    reason: "exchange refund".to_string(),
                },
                t0(),
            )
            .unwrap();
        order
            .apply(
                OrderEvent::RefundUpdated {
                    status: RefundStatus::Processing,
                    refund_id: Some("rfnd_1".to_string()),
                    amount: None,
                },
                t0(),
            )
            .unwrap();
        let refund = order.payment.refund.clone().unwrap();
        assert!(refund.completed_at.is_none());
        assert!(refund.refunded_amount.is_none());

        order
            .apply(
                OrderEvent::RefundUpdated {
                    status: RefundStatus::Completed,
                    refund_id: None,
                    amount: Some(Money::from_rupees(1000)),
                },
                t0(),
            )
            .unwrap();
        let refund = order.payment.refund.clone().unwrap();
        assert_eq!(refund.status, RefundStatus::Completed);
        assert_eq!(refund.refund_id.as_deref(), Some("rfnd_1"));
        assert_eq!(refund.refunded_amount, Some(Money::from_rupees(1000)));
        assert!(refund.completed_at.is_some());

        let err = order
            .apply(
                OrderEvent::RefundUpdated {
                    status: RefundStatus::Failed,
                    refund_id: None,
                    amount: None,
                },
                t0(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Lifecycle(LifecycleError::RefundTransition { .. })
        ));
    }

    #[test]
    fn test_timeline_is_append_only() {
        let mut order = pending_order();
        let snapshot = order.timeline.clone();
        let total = order.total();
        order.apply(paid(total), t0()).unwrap();
        assert_eq!(&order.timeline[..snapshot.len()], &snapshot[..]);
        assert_eq!(order.timeline.len(), snapshot.len() + 1);
    }
}
