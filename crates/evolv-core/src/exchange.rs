//! # Exchange / Refund Workflow
//!
//! Post-delivery exchange requests.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  delivered order, within 7 days, no non-rejected request                │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │   pending ──reject(reason)──► rejected  (terminal, no side effects)     │
//! │       │                                                                 │
//! │    approve                                                              │
//! │       ▼                                                                 │
//! │   approved ──► reverse pickup ──► item received ──┬─► replacement ship  │
//! │                                                   └─► refund initiated  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Refund progress lives on the order's payment record, so there is exactly
//! one place that can claim a refund completed.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::error::{CoreResult, LifecycleError, ValidationError};
use crate::money::Money;
use crate::order::{FulfillmentState, NotificationKind, Order, OrderStatus};
use crate::validation::validate_reason;
use crate::EXCHANGE_WINDOW_DAYS;

/// Exchange request status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeStatus {
    Pending,
    Approved,
    Rejected,
}

impl ExchangeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeStatus::Pending => "pending",
            ExchangeStatus::Approved => "approved",
            ExchangeStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ExchangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the customer wants back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, Default)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeResolution {
    #[default]
    Replacement,
    Refund,
}

/// An item being returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ExchangeItem {
    pub product_id: String,
    pub size: String,
    pub color: String,
    pub quantity: u32,
    /// Size wanted instead (replacement only).
    #[serde(default)]
    pub replacement_size: Option<String>,
    #[serde(default)]
    pub replacement_color: Option<String>,
}

/// Customer input for a new request.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ExchangeInput {
    pub items: Vec<ExchangeItem>,
    pub reason: String,
    /// URLs of evidence photos (uploaded elsewhere).
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub resolution: ExchangeResolution,
}

/// Work the engine performs after an exchange change commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeEffect {
    Notify(NotificationKind),
    /// Book the reverse pickup of the returned items.
    ScheduleReversePickup,
    /// Ship the replacement items.
    ScheduleReplacement,
    /// Refund through the payment gateway.
    InitiateRefund { amount: Money },
}

/// An exchange request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ExchangeRequest {
    pub id: String,
    pub order_id: String,
    pub customer_id: String,
    pub items: Vec<ExchangeItem>,
    pub reason: String,
    pub images: Vec<String>,
    pub resolution: ExchangeResolution,
    pub status: ExchangeStatus,
    pub rejection_reason: Option<String>,
    /// Value of the returned items, capped at the order total.
    pub refund_amount: Money,
    pub reverse_shipment: FulfillmentState,
    #[ts(as = "Option<String>")]
    pub received_at: Option<DateTime<Utc>>,
    pub forward_shipment: FulfillmentState,
    pub version: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub decided_at: Option<DateTime<Utc>>,
}

/// Checks that `order` may receive a new exchange request.
///
/// `existing` are the order's previous requests.
pub fn check_eligibility(
    order: &Order,
    existing: &[ExchangeRequest],
    now: DateTime<Utc>,
) -> CoreResult<()> {
    if order.status != OrderStatus::Delivered {
        return Err(LifecycleError::NotDelivered {
            status: order.status,
        }
        .into());
    }

    if let Some(open) = existing
        .iter()
        .find(|r| r.status != ExchangeStatus::Rejected)
    {
        return Err(LifecycleError::ExchangeAlreadyOpen {
            exchange_id: open.id.clone(),
        }
        .into());
    }

    let delivered_at = order.delivered_at.unwrap_or(order.updated_at);
    let closes_at = delivered_at + Duration::days(EXCHANGE_WINDOW_DAYS);
    if now > closes_at {
        return Err(LifecycleError::ExchangeWindowClosed {
            closed_at: closes_at,
        }
        .into());
    }
    Ok(())
}

impl ExchangeRequest {
    /// Opens a request after eligibility and item checks.
    pub fn open(
        id: impl Into<String>,
        order: &Order,
        input: ExchangeInput,
        existing: &[ExchangeRequest],
        now: DateTime<Utc>,
    ) -> CoreResult<ExchangeRequest> {
        check_eligibility(order, existing, now)?;
        validate_reason(&input.reason)?;
        if input.items.is_empty() {
            return Err(ValidationError::Required {
                field: "items".to_string(),
            }
            .into());
        }

        let mut value = Money::zero();
        for item in &input.items {
            let line = order
                .items
                .iter()
                .find(|l| {
                    l.product_id == item.product_id && l.size == item.size && l.color == item.color
                })
                .ok_or_else(|| ValidationError::UnknownItem {
                    product_id: item.product_id.clone(),
                    size: item.size.clone(),
                    color: item.color.clone(),
                })?;
            if item.quantity == 0 || item.quantity > line.quantity {
                return Err(ValidationError::OutOfRange {
                    field: "quantity".to_string(),
                    min: 1,
                    max: line.quantity as i64,
                }
                .into());
            }
            value += line.unit_price * item.quantity;
        }

        Ok(ExchangeRequest {
            id: id.into(),
            order_id: order.id.clone(),
            customer_id: order.customer_id.clone(),
            items: input.items,
            reason: input.reason.trim().to_string(),
            images: input.images,
            resolution: input.resolution,
            status: ExchangeStatus::Pending,
            rejection_reason: None,
            refund_amount: value.min(order.total()),
            reverse_shipment: FulfillmentState::NotRequested,
            received_at: None,
            forward_shipment: FulfillmentState::NotRequested,
            version: 0,
            created_at: now,
            decided_at: None,
        })
    }

    fn ensure_pending(&self) -> CoreResult<()> {
        if self.status != ExchangeStatus::Pending {
            return Err(LifecycleError::ExchangeDecided {
                status: self.status,
            }
            .into());
        }
        Ok(())
    }

    fn ensure_approved(&self, step: &'static str) -> CoreResult<()> {
        if self.status != ExchangeStatus::Approved {
            return Err(LifecycleError::ExchangeStep {
                status: self.status,
                step,
            }
            .into());
        }
        Ok(())
    }

    /// Admin approval. Terminal for the decision; starts the return.
    pub fn approve(&mut self, now: DateTime<Utc>) -> CoreResult<Vec<ExchangeEffect>> {
        self.ensure_pending()?;
        self.status = ExchangeStatus::Approved;
        self.decided_at = Some(now);
        Ok(vec![
            ExchangeEffect::ScheduleReversePickup,
            ExchangeEffect::Notify(NotificationKind::ExchangeApproved),
        ])
    }

    /// Admin rejection. A reason is mandatory.
    pub fn reject(&mut self, reason: &str, now: DateTime<Utc>) -> CoreResult<Vec<ExchangeEffect>> {
        self.ensure_pending()?;
        validate_reason(reason)?;
        let reason = reason.trim().to_string();
        self.status = ExchangeStatus::Rejected;
        self.rejection_reason = Some(reason.clone());
        self.decided_at = Some(now);
        Ok(vec![ExchangeEffect::Notify(
            NotificationKind::ExchangeRejected { reason },
        )])
    }

    /// Records reverse pickup booking progress.
    pub fn record_reverse_shipment(&mut self, state: FulfillmentState) -> CoreResult<bool> {
        self.ensure_approved("book a pickup")?;
        if self.reverse_shipment.is_created() || self.reverse_shipment == state {
            return Ok(false);
        }
        self.reverse_shipment = state;
        Ok(true)
    }

    /// Warehouse received the returned items.
    ///
    /// Returns the follow-up: replacement shipment or refund. A repeated
    /// receipt returns no effects.
    pub fn mark_received(&mut self, now: DateTime<Utc>) -> CoreResult<Vec<ExchangeEffect>> {
        self.ensure_approved("receive items")?;
        if !self.reverse_shipment.is_created() {
            return Err(LifecycleError::ExchangeStep {
                status: self.status,
                step: "receive items before pickup",
            }
            .into());
        }
        if self.received_at.is_some() {
            return Ok(Vec::new());
        }
        self.received_at = Some(now);
        Ok(vec![match self.resolution {
            ExchangeResolution::Replacement => ExchangeEffect::ScheduleReplacement,
            ExchangeResolution::Refund => ExchangeEffect::InitiateRefund {
                amount: self.refund_amount,
            },
        }])
    }

    /// Records replacement shipment booking progress.
    pub fn record_forward_shipment(&mut self, state: FulfillmentState) -> CoreResult<bool> {
        self.ensure_approved("ship a replacement")?;
        if self.received_at.is_none() || self.resolution != ExchangeResolution::Replacement {
            return Err(LifecycleError::ExchangeStep {
                status: self.status,
                step: "ship a replacement",
            }
            .into());
        }
        if self.forward_shipment.is_created() || self.forward_shipment == state {
            return Ok(false);
        }
        self.forward_shipment = state;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::order::tests::{delivered_order, pending_order, t0};
    use crate::types::Shipment;

    fn input() -> ExchangeInput {
        ExchangeInput {
            items: vec![ExchangeItem {
                product_id: "saree-11".to_string(),
                size: "Free".to_string(),
                color: "Maroon".to_string(),
                quantity: 1,
                replacement_size: None,
                replacement_color: Some("Green".to_string()),
            }],
            reason: "Colour differs from photos".to_string(),
            images: vec![],
            resolution: ExchangeResolution::Replacement,
        }
    }

    fn created(id: &str) -> FulfillmentState {
        FulfillmentState::Created {
            shipment: Shipment {
                shipment_id: id.to_string(),
                awb: format!("AWB-{id}"),
                tracking_url: format!("https://track.example/{id}"),
            },
        }
    }

    #[test]
    fn test_only_delivered_orders() {
        let order = pending_order();
        let err = ExchangeRequest::open("ex-1", &order, input(), &[], t0()).unwrap_err();
        assert!(matches!(err, CoreError::Lifecycle(LifecycleError::NotDelivered { .. })));
    }

    #[test]
    fn test_window_closes_after_seven_days() {
        let order = delivered_order();
        let late = t0() + Duration::days(EXCHANGE_WINDOW_DAYS) + Duration::seconds(1);
        let err = ExchangeRequest::open("ex-1", &order, input(), &[], late).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Expired);

        let on_time = t0() + Duration::days(EXCHANGE_WINDOW_DAYS);
        assert!(ExchangeRequest::open("ex-1", &order, input(), &[], on_time).is_ok());
    }

    #[test]
    fn test_second_request_conflicts() {
        let order = delivered_order();
        let first = ExchangeRequest::open("ex-1", &order, input(), &[], t0()).unwrap();
        let err = ExchangeRequest::open("ex-2", &order, input(), &[first.clone()], t0()).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Lifecycle(LifecycleError::ExchangeAlreadyOpen { ref exchange_id }) if exchange_id == "ex-1"
        ));

        let mut rejected = first;
        rejected.reject("Item shows wear", t0()).unwrap();
        assert!(ExchangeRequest::open("ex-2", &order, input(), &[rejected], t0()).is_ok());
    }

    #[test]
    fn test_unknown_item_rejected() {
        let order = delivered_order();
        let mut bad = input();
        bad.items[0].size = "XXL".to_string();
        let err = ExchangeRequest::open("ex-1", &order, bad, &[], t0()).unwrap_err();
        assert!(matches!(err, CoreError::Validation(ValidationError::UnknownItem { .. })));
    }

    #[test]
    fn test_reject_requires_reason_and_is_terminal() {
        let order = delivered_order();
        let mut request = ExchangeRequest::open("ex-1", &order, input(), &[], t0()).unwrap();
        assert!(request.reject("   ", t0()).is_err());
        assert_eq!(request.status, ExchangeStatus::Pending);

        let effects = request.reject("Tags removed", t0()).unwrap();
        assert_eq!(request.status, ExchangeStatus::Rejected);
        assert_eq!(effects.len(), 1);
        assert!(request.approve(t0()).is_err());
    }

    #[test]
    fn test_replacement_flow() {
        let order = delivered_order();
        let mut request = ExchangeRequest::open("ex-1", &order, input(), &[], t0()).unwrap();
        let effects = request.approve(t0()).unwrap();
        assert!(effects.contains(&ExchangeEffect::ScheduleReversePickup));

        assert!(request.mark_received(t0()).is_err());
        assert!(request.record_reverse_shipment(created("rev-1")).unwrap());
        let effects = request.mark_received(t0()).unwrap();
        assert_eq!(effects, vec![ExchangeEffect::ScheduleReplacement]);
        assert!(request.mark_received(t0()).unwrap().is_empty());

        assert!(request.record_forward_shipment(created("fwd-1")).unwrap());
        assert!(!request.record_forward_shipment(created("fwd-2")).unwrap());
    }

    #[test]
    fn test_refund_resolution_initiates_refund() {
        let order = delivered_order();
        let mut wants_refund = input();
        wants_refund.resolution = ExchangeResolution::Refund;
        let mut request = ExchangeRequest::open("ex-1", &order, wants_refund, &[], t0()).unwrap();
        request.approve(t0()).unwrap();
        request.record_reverse_shipment(created("rev-1")).unwrap();
        let effects = request.mark_received(t0()).unwrap();
        assert_eq!(
            effects,
            vec![ExchangeEffect::InitiateRefund {
                amount: Money::from_paise(299_999)
            }]
        );
    }
}
