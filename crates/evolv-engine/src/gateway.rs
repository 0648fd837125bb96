//! # Payment Gateway
//!
//! The narrow contract the engine needs from the payment provider, plus an
//! HTTP implementation for a Razorpay-style API.
//!
//! ## Checkout Handshake
//! ```text
//! ┌──────────┐   create_order(total)   ┌──────────┐
//! │  Engine  │ ──────────────────────► │ Gateway  │   gateway_order_id, key
//! └────┬─────┘                         └────┬─────┘
//!      │ order placed (pending)             │
//!      ▼                                    ▼
//! ┌──────────┐   pays in widget       ┌──────────┐
//! │ Browser  │ ─────────────────────► │ Gateway  │
//! └────┬─────┘                        └────┬─────┘
//!      │ callback {order_id, payment_id,   │ webhook payment.captured
//!      │           signature}              │ (HMAC over raw body)
//!      ▼                                   ▼
//!   verify_payment: HMAC-SHA256(key_secret, "order_id|payment_id")
//! ```
//!
//! Both paths end in the same idempotent `PaymentVerified` transition, so the
//! order is paid exactly once whichever arrives first.

use async_trait::async_trait;
use evolv_core::order::RefundStatus;
use evolv_core::Money;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{debug, info};

use crate::config::GatewaySettings;
use crate::error::{EngineError, EngineResult};

type HmacSha256 = Hmac<Sha256>;

// =============================================================================
// Signatures
// =============================================================================

/// HMAC-SHA256 signer with hex output.
#[derive(Clone)]
pub struct Signer {
    secret: Vec<u8>,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").finish_non_exhaustive()
    }
}

impl Signer {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Signer {
            secret: secret.as_ref().to_vec(),
        }
    }

    /// Lower-case hex HMAC of `payload`.
    pub fn sign(&self, payload: &[u8]) -> String {
        match HmacSha256::new_from_slice(&self.secret) {
            Ok(mut mac) => {
                mac.update(payload);
                hex::encode(mac.finalize().into_bytes())
            }
            Err(_) => String::new(),
        }
    }

    /// Constant-time comparison against a provided signature.
    ///
    /// Accepts an optional `sha256=` prefix. An empty secret never verifies.
    pub fn verify(&self, payload: &[u8], signature: &str) -> bool {
        if self.secret.is_empty() {
            return false;
        }
        let provided = signature.trim();
        let provided = provided.strip_prefix("sha256=").unwrap_or(provided);
        let expected = self.sign(payload);
        bool::from(expected.as_bytes().ct_eq(provided.to_ascii_lowercase().as_bytes()))
    }
}

/// The string the gateway signs for a browser payment callback.
pub fn payment_signature_payload(gateway_order_id: &str, payment_id: &str) -> String {
    format!("{gateway_order_id}|{payment_id}")
}

// =============================================================================
// Contract
// =============================================================================

/// A payment order created at the gateway. Sent to the browser widget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayOrder {
    pub gateway_order_id: String,
    /// Public key for the checkout widget.
    pub key_id: String,
    pub amount: Money,
    pub currency: String,
}

/// Gateway acknowledgement of a refund request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundReceipt {
    pub refund_id: String,
    pub status: RefundStatus,
}

/// What the engine needs from a payment provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Registers an amount to collect. `receipt` is our order number.
    async fn create_order(&self, receipt: &str, amount: Money, currency: &str)
        -> EngineResult<GatewayOrder>;

    /// Checks a browser callback signature. `true` means paid.
    fn verify_payment(&self, gateway_order_id: &str, payment_id: &str, signature: &str) -> bool;

    /// Checks the signature of a server-to-server webhook body.
    fn verify_webhook(&self, body: &[u8], signature: &str) -> bool;

    /// Refunds part or all of a captured payment. `order_id` is echoed back
    /// in refund webhooks.
    async fn refund(&self, order_id: &str, payment_id: &str, amount: Money)
        -> EngineResult<RefundReceipt>;
}

// =============================================================================
// Webhook Events
// =============================================================================

/// A gateway webhook, reduced to what the lifecycle cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    PaymentCaptured {
        gateway_order_id: String,
        payment_id: String,
        method: Option<String>,
        amount: Money,
    },
    PaymentFailed {
        gateway_order_id: String,
        reason: String,
    },
    Refund {
        order_id: String,
        refund_id: String,
        status: RefundStatus,
        amount: Money,
    },
}

/// Parses a webhook body. Events we do not act on return `None`.
pub fn parse_gateway_event(body: &[u8]) -> EngineResult<Option<GatewayEvent>> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| EngineError::validation("INVALID_WEBHOOK", e.to_string()))?;
    let event = value["event"].as_str().unwrap_or_default();
    let payment = &value["payload"]["payment"]["entity"];
    let refund = &value["payload"]["refund"]["entity"];

    let text = |v: &Value| v.as_str().map(str::to_string);
    let missing = |field: &str| EngineError::validation("INVALID_WEBHOOK", format!("{event}: missing {field}"));

    let parsed = match event {
        "payment.captured" | "order.paid" => Some(GatewayEvent::PaymentCaptured {
            gateway_order_id: text(&payment["order_id"]).ok_or_else(|| missing("order_id"))?,
            payment_id: text(&payment["id"]).ok_or_else(|| missing("payment id"))?,
            method: text(&payment["method"]),
            amount: Money::from_paise(payment["amount"].as_i64().ok_or_else(|| missing("amount"))?),
        }),
        "payment.failed" => Some(GatewayEvent::PaymentFailed {
            gateway_order_id: text(&payment["order_id"]).ok_or_else(|| missing("order_id"))?,
            reason: text(&payment["error_description"])
                .unwrap_or_else(|| "Payment declined".to_string()),
        }),
        "refund.created" | "refund.processed" | "refund.failed" => {
            let status = match event {
                "refund.processed" => RefundStatus::Completed,
                "refund.failed" => RefundStatus::Failed,
                _ => RefundStatus::Processing,
            };
            Some(GatewayEvent::Refund {
                order_id: text(&refund["notes"]["order_id"]).ok_or_else(|| missing("notes.order_id"))?,
                refund_id: text(&refund["id"]).ok_or_else(|| missing("refund id"))?,
                status,
                amount: Money::from_paise(refund["amount"].as_i64().unwrap_or_default()),
            })
        }
        other => {
            debug!(event = other, "Ignoring gateway webhook");
            None
        }
    };
    Ok(parsed)
}

// =============================================================================
// HTTP Implementation
// =============================================================================

#[derive(Deserialize)]
struct CreateOrderResponse {
    id: String,
}

#[derive(Deserialize)]
struct RefundResponse {
    id: String,
    #[serde(default)]
    status: String,
}

/// Razorpay-style REST gateway.
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
    callback_signer: Signer,
    webhook_signer: Signer,
}

impl HttpPaymentGateway {
    pub fn new(settings: &GatewaySettings) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| EngineError::Config(format!("gateway client: {e}")))?;
        Ok(HttpPaymentGateway {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            key_id: settings.key_id.clone(),
            key_secret: settings.key_secret.clone(),
            callback_signer: Signer::new(&settings.key_secret),
            webhook_signer: Signer::new(&settings.webhook_secret),
        })
    }

    async fn post<T: serde::de::DeserializeOwned>(&self, path: &str, body: Value) -> EngineResult<T> {
        let http = |e| EngineError::from_http("gateway", e);
        self.client
            .post(format!("{}{}", self.base_url, path))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&body)
            .send()
            .await
            .map_err(http)?
            .error_for_status()
            .map_err(http)?
            .json::<T>()
            .await
            .map_err(http)
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn create_order(
        &self,
        receipt: &str,
        amount: Money,
        currency: &str,
    ) -> EngineResult<GatewayOrder> {
        let created: CreateOrderResponse = self
            .post(
                "/orders",
                json!({ "amount": amount.paise(), "currency": currency, "receipt": receipt }),
            )
            .await?;
        info!(receipt, gateway_order_id = %created.id, %amount, "Gateway order created");
        Ok(GatewayOrder {
            gateway_order_id: created.id,
            key_id: self.key_id.clone(),
            amount,
            currency: currency.to_string(),
        })
    }

    fn verify_payment(&self, gateway_order_id: &str, payment_id: &str, signature: &str) -> bool {
        self.callback_signer.verify(
            payment_signature_payload(gateway_order_id, payment_id).as_bytes(),
            signature,
        )
    }

    fn verify_webhook(&self, body: &[u8], signature: &str) -> bool {
        self.webhook_signer.verify(body, signature)
    }

    async fn refund(&self, order_id: &str, payment_id: &str, amount: Money) -> EngineResult<RefundReceipt> {
        let refund: RefundResponse = self
            .post(
                &format!("/payments/{payment_id}/refund"),
                json!({ "amount": amount.paise(), "notes": { "order_id": order_id } }),
            )
            .await?;
        info!(order_id, payment_id, refund_id = %refund.id, %amount, "Refund requested");
        Ok(RefundReceipt {
            refund_id: refund.id,
            status: match refund.status.as_str() {
                "processed" => RefundStatus::Completed,
                "failed" => RefundStatus::Failed,
                _ => RefundStatus::Processing,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_signature_round_trip() {
        let signer = Signer::new("rzp_secret");
        let payload = payment_signature_payload("order_9A", "pay_1B");
        let signature = signer.sign(payload.as_bytes());

        assert!(signer.verify(payload.as_bytes(), &signature));
        assert!(signer.verify(payload.as_bytes(), &signature.to_uppercase()));
        assert!(signer.verify(payload.as_bytes(), &format!("sha256={signature}")));
        assert!(!signer.verify(b"order_9A|pay_2C", &signature));
        assert!(!Signer::new("other").verify(payload.as_bytes(), &signature));
    }

    #[test]
    fn test_empty_secret_never_verifies() {
        let signer = Signer::new("");
        let signature = signer.sign(b"x");
        assert!(!signer.verify(b"x", &signature));
    }

    #[test]
    fn test_parse_payment_captured() {
        let body = br#"{
            "event": "payment.captured",
            "payload": {"payment": {"entity": {
                "id": "pay_1B", "order_id": "order_9A", "amount": 309999, "method": "upi"
            }}}
        }"#;
        let event = parse_gateway_event(body).unwrap().unwrap();
        assert_eq!(
            event,
            GatewayEvent::PaymentCaptured {
                gateway_order_id: "order_9A".to_string(),
                payment_id: "pay_1B".to_string(),
                method: Some("upi".to_string()),
                amount: Money::from_paise(309_999),
            }
        );
    }

    #[test]
    fn test_parse_refund_and_unknown_events() {
        let body = br#"{
            "event": "refund.processed",
            "payload": {"refund": {"entity": {
                "id": "rfnd_7", "payment_id": "pay_1B", "amount": 100000,
                "notes": {"order_id": "o-1"}
            }}}
        }"#;
        match parse_gateway_event(body).unwrap() {
            Some(GatewayEvent::Refund { order_id, status, amount, .. }) => {
                assert_eq!(order_id, "o-1");
                assert_eq!(status, RefundStatus::Completed);
                assert_eq!(amount, Money::from_rupees(1000));
            }
            other => panic!("unexpected {other:?}"),
        }

        assert!(parse_gateway_event(br#"{"event":"settlement.processed"}"#)
            .unwrap()
            .is_none());
        assert!(parse_gateway_event(br#"{"event":"payment.captured","payload":{}}"#).is_err());
        assert!(parse_gateway_event(b"not json").is_err());
    }
}
