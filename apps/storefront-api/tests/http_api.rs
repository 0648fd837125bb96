//! Drives the router in-process against an in-memory database and fake
//! collaborators.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use chrono::{DateTime, Utc};
use evolv_core::order::{OrderStatus, RefundStatus};
use evolv_core::{Money, Shipment};
use evolv_db::{Database, DbConfig};
use evolv_engine::carrier::ShipmentRequest;
use evolv_engine::config::RetrySettings;
use evolv_engine::gateway::{payment_signature_payload, GatewayOrder, RefundReceipt, Signer};
use evolv_engine::{
    CatalogProduct, Clock, Collaborators, Engine, EngineResult, LogNotifier, PaymentGateway,
    ShipmentCarrier, StaticCatalog, Variant,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use storefront_api::{router, AppState};
use tower::ServiceExt;

const GATEWAY_SECRET: &str = "gw_http_test";
const CARRIER_SECRET: &str = "carrier_http_test";

// =============================================================================
// Fakes
// =============================================================================

struct FixedClock;

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        "2026-03-01T10:00:00Z".parse().unwrap()
    }
}

struct FakeGateway(Signer);

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_order(&self, receipt: &str, amount: Money, currency: &str) -> EngineResult<GatewayOrder> {
        Ok(GatewayOrder {
            gateway_order_id: format!("order_{receipt}"),
            key_id: "rzp_test_key".to_string(),
            amount,
            currency: currency.to_string(),
        })
    }

    fn verify_payment(&self, gateway_order_id: &str, payment_id: &str, signature: &str) -> bool {
        self.0
            .verify(payment_signature_payload(gateway_order_id, payment_id).as_bytes(), signature)
    }

    fn verify_webhook(&self, body: &[u8], signature: &str) -> bool {
        self.0.verify(body, signature)
    }

    async fn refund(&self, order_id: &str, _payment_id: &str, _amount: Money) -> EngineResult<RefundReceipt> {
        Ok(RefundReceipt {
            refund_id: format!("rfnd_{order_id}"),
            status: RefundStatus::Processing,
        })
    }
}

struct FakeCarrier(Signer);

#[async_trait]
impl ShipmentCarrier for FakeCarrier {
    async fn create_shipment(&self, request: &ShipmentRequest) -> EngineResult<Shipment> {
        Ok(Shipment {
            shipment_id: format!("shp_{}", request.reference),
            awb: "AWB7001".to_string(),
            tracking_url: "https://track.example.in/AWB7001".to_string(),
        })
    }

    async fn track(&self, _awb: &str) -> EngineResult<Option<OrderStatus>> {
        Ok(None)
    }

    fn verify_webhook(&self, body: &[u8], signature: &str) -> bool {
        self.0.verify(body, signature)
    }
}

// =============================================================================
// Helpers
// =============================================================================

async fn app() -> Router {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let kurta = CatalogProduct {
        id: "kurta-7".to_string(),
        name: "Linen Kurta".to_string(),
        price: Money::from_rupees(1_000),
        variants: vec![Variant {
            size: "M".to_string(),
            color: "Indigo".to_string(),
            stock: 5,
        }],
    };
    let collaborators = Collaborators {
        gateway: Arc::new(FakeGateway(Signer::new(GATEWAY_SECRET))),
        carrier: Arc::new(FakeCarrier(Signer::new(CARRIER_SECRET))),
        notifier: Arc::new(LogNotifier),
        catalog: Arc::new(StaticCatalog::new([kurta])),
        clock: Arc::new(FixedClock),
    };
    let retry = RetrySettings {
        max_attempts: 1,
        initial_backoff_ms: 1,
        max_backoff_secs: 0,
        give_up_after: 2,
    };
    router(AppState::new(Engine::new(db, collaborators, &retry)))
}

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    customer: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(customer) = customer {
        builder = builder.header("x-customer-id", customer);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    raw(app, request).await
}

async fn raw(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(request).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn webhook(uri: &str, header: &str, body: &Value, secret: &str) -> Request<Body> {
    let payload = body.to_string();
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .header(header, Signer::new(secret).sign(payload.as_bytes()))
        .body(Body::from(payload))
        .unwrap()
}

/// Adds one kurta and checks out to Karnataka. Returns the receipt JSON.
async fn place_order(app: &Router, customer: &str) -> Value {
    let item = json!({"product_id": "kurta-7", "size": "M", "color": "Indigo", "quantity": 1});
    let (status, _) = send(app, Method::POST, "/cart/items", Some(customer), Some(item)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, receipt) = send(
        app,
        Method::POST,
        "/checkout",
        Some(customer),
        Some(json!({
            "shipping_address": address(),
            "submitted_total": 110_000,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{receipt}");
    receipt
}

fn address() -> Value {
    json!({
        "full_name": "Asha R",
        "phone": "9876543210",
        "line1": "4 MG Road",
        "line2": null,
        "city": "Bengaluru",
        "state": "Karnataka",
        "pincode": "560001",
        "country": "India"
    })
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_health() {
    let app = app().await;
    let resp = app
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_customer_header_required() {
    let app = app().await;
    let (status, body) = send(&app, Method::GET, "/cart", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHENTICATED");
}

#[tokio::test]
async fn test_preview_then_mismatched_total_rejected() {
    let app = app().await;
    let item = json!({"product_id": "kurta-7", "size": "M", "color": "Indigo", "quantity": 1});
    send(&app, Method::POST, "/cart/items", Some("c-1"), Some(item)).await;

    let (status, preview) = send(
        &app,
        Method::POST,
        "/checkout/preview",
        Some("c-1"),
        Some(json!({"shipping_state": "Karnataka"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(preview["pricing"]["total"], 110_000);
    assert_eq!(preview["pricing"]["shipping_cost"], 10_000);

    let (status, body) = send(
        &app,
        Method::POST,
        "/checkout",
        Some("c-1"),
        Some(json!({"shipping_address": address(), "submitted_total": 100_000})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "TOTAL_MISMATCH");

    // cart survives a rejected checkout
    let (_, cart) = send(&app, Method::GET, "/cart", Some("c-1"), None).await;
    assert_eq!(cart["lines"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_paid_order_cannot_be_cancelled() {
    let app = app().await;
    let receipt = place_order(&app, "c-1").await;
    let order_id = receipt["order"]["id"].as_str().unwrap().to_string();
    let gateway_order_id = receipt["payment"]["gateway_order_id"].as_str().unwrap();
    assert_eq!(receipt["order"]["status"], "pending");

    let signature = Signer::new(GATEWAY_SECRET)
        .sign(payment_signature_payload(gateway_order_id, "pay_1").as_bytes());
    let (status, view) = send(
        &app,
        Method::POST,
        "/payments/callback",
        None,
        Some(json!({
            "gateway_order_id": gateway_order_id,
            "payment_id": "pay_1",
            "signature": signature,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["payment_status"], "paid");

    let uri = format!("/orders/{order_id}/cancel");
    let (status, body) = send(&app, Method::POST, &uri, Some("c-1"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");
    assert_eq!(body["current"]["payment_status"], "paid");
}

#[tokio::test]
async fn test_other_customers_order_is_not_found() {
    let app = app().await;
    let receipt = place_order(&app, "c-1").await;
    let uri = format!("/orders/{}", receipt["order"]["id"].as_str().unwrap());

    let (status, _) = send(&app, Method::GET, &uri, Some("c-1"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = send(&app, Method::GET, &uri, Some("c-2"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_gateway_webhook_signature_checked() {
    let app = app().await;
    let receipt = place_order(&app, "c-1").await;
    let event = json!({
        "event": "payment.captured",
        "payload": {"payment": {"entity": {
            "id": "pay_7",
            "order_id": receipt["payment"]["gateway_order_id"],
            "amount": 110_000,
            "method": "upi"
        }}}
    });

    let forged = webhook("/webhooks/gateway", "x-razorpay-signature", &event, "wrong");
    let (status, body) = raw(&app, forged).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "INVALID_SIGNATURE");

    let signed = webhook("/webhooks/gateway", "x-razorpay-signature", &event, GATEWAY_SECRET);
    let (status, ack) = raw(&app, signed).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["status"], "applied");
    assert_eq!(ack["order"]["payment_status"], "paid");

    let ignored = json!({"event": "payment.authorized", "payload": {}});
    let (_, ack) = raw(
        &app,
        webhook("/webhooks/gateway", "x-razorpay-signature", &ignored, GATEWAY_SECRET),
    )
    .await;
    assert_eq!(ack["status"], "ignored");
}

#[tokio::test]
async fn test_carrier_webhook_for_unknown_awb_ignored() {
    let app = app().await;
    let event = json!({"awb": "AWB-NOPE", "current_status": "DELIVERED"});
    let (status, ack) = raw(
        &app,
        webhook("/webhooks/carrier", "x-carrier-signature", &event, CARRIER_SECRET),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["status"], "ignored");
}
