//! # Webhooks
//!
//! ```text
//! raw body ──► verify HMAC(header) ──► parse ──► engine ──► 200 {status}
//!                    │ bad                          │ conflict (late payment,
//!                    ▼                              │ out-of-order status)
//!                   401                             ▼
//!                                         200 "rejected" + current order
//! ```
//!
//! Conflicts are acknowledged with 200 so the sender stops redelivering. The
//! engine has already logged them and queued any intervention.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use evolv_core::order::OrderView;
use evolv_engine::{parse_gateway_event, CarrierEvent, EngineError};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{ApiError, ApiResult};
use crate::AppState;

pub const GATEWAY_SIGNATURE_HEADER: &str = "x-razorpay-signature";
pub const CARRIER_SIGNATURE_HEADER: &str = "x-carrier-signature";

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    Applied,
    Ignored,
    Rejected,
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub status: AckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<OrderView>,
}

impl WebhookAck {
    fn ignored() -> Json<Self> {
        Json(WebhookAck {
            status: AckStatus::Ignored,
            order: None,
        })
    }
}

fn signature<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

/// Turns an engine outcome into an acknowledgement.
fn acknowledge(result: Result<OrderView, EngineError>) -> ApiResult<Json<WebhookAck>> {
    match result {
        Ok(view) => Ok(Json(WebhookAck {
            status: AckStatus::Applied,
            order: Some(view),
        })),
        Err(EngineError::Conflict { current, .. }) => Ok(Json(WebhookAck {
            status: AckStatus::Rejected,
            order: current.map(|view| *view),
        })),
        Err(e) => Err(e.into()),
    }
}

pub async fn gateway(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookAck>> {
    let sig = signature(&headers, GATEWAY_SIGNATURE_HEADER);
    if !state.engine.gateway().verify_webhook(&body, sig) {
        return Err(ApiError::InvalidSignature("gateway"));
    }

    let Some(event) = parse_gateway_event(&body)? else {
        return Ok(WebhookAck::ignored());
    };
    info!(?event, "Gateway webhook");
    acknowledge(state.engine.orders.handle_gateway_event(event).await)
}

pub async fn carrier(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookAck>> {
    let sig = signature(&headers, CARRIER_SIGNATURE_HEADER);
    if !state.engine.carrier().verify_webhook(&body, sig) {
        return Err(ApiError::InvalidSignature("carrier"));
    }

    let event = CarrierEvent::parse(&body)?;
    let result = state
        .engine
        .orders
        .handle_carrier_event(event.clone())
        .await
        .map(|order| OrderView::from(&order));
    match result {
        // reverse pickups and other shipments we did not book
        Err(EngineError::NotFound { .. }) => {
            debug!(awb = %event.awb, "No order for AWB");
            Ok(WebhookAck::ignored())
        }
        other => acknowledge(other),
    }
}
