//! Shared fixtures: an engine over an in-memory database with fake
//! gateway, carrier, notifier and a hand-driven clock.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use evolv_core::discount::DiscountRequest;
use evolv_core::order::{NotificationKind, OrderStatus, RefundStatus};
use evolv_core::{Address, Money, Shipment};
use evolv_db::{Database, DbConfig};
use evolv_engine::carrier::{Direction, ShipmentRequest};
use evolv_engine::config::RetrySettings;
use evolv_engine::gateway::{payment_signature_payload, GatewayOrder, RefundReceipt, Signer};
use evolv_engine::{
    AddToCart, CatalogProduct, CheckoutReceipt, CheckoutRequest, Clock, Collaborators, Engine,
    EngineError, EngineResult, Notification, Notifier, PaymentCallback, PaymentGateway,
    ShipmentCarrier, StaticCatalog, Variant,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

pub const GATEWAY_SECRET: &str = "gw_secret_test";
pub const CARRIER_SECRET: &str = "carrier_secret_test";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap()
}

// =============================================================================
// Clock
// =============================================================================

pub struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    pub fn advance(&self, by: Duration) {
        let mut now = self.0.lock().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

// =============================================================================
// Gateway
// =============================================================================

pub struct FakeGateway {
    signer: Signer,
    pub created: AtomicU32,
    pub refunds: Mutex<Vec<(String, Money)>>,
    pub fail_refunds: AtomicBool,
}

impl FakeGateway {
    fn new() -> Self {
        FakeGateway {
            signer: Signer::new(GATEWAY_SECRET),
            created: AtomicU32::new(0),
            refunds: Mutex::new(Vec::new()),
            fail_refunds: AtomicBool::new(false),
        }
    }

    pub fn sign_payment(&self, gateway_order_id: &str, payment_id: &str) -> String {
        self.signer
            .sign(payment_signature_payload(gateway_order_id, payment_id).as_bytes())
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_order(
        &self,
        receipt: &str,
        amount: Money,
        currency: &str,
    ) -> EngineResult<GatewayOrder> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(GatewayOrder {
            gateway_order_id: format!("order_{receipt}"),
            key_id: "rzp_test_key".to_string(),
            amount,
            currency: currency.to_string(),
        })
    }

    fn verify_payment(&self, gateway_order_id: &str, payment_id: &str, signature: &str) -> bool {
        self.signer.verify(
            payment_signature_payload(gateway_order_id, payment_id).as_bytes(),
            signature,
        )
    }

    fn verify_webhook(&self, body: &[u8], signature: &str) -> bool {
        self.signer.verify(body, signature)
    }

    async fn refund(&self, order_id: &str, _payment_id: &str, amount: Money) -> EngineResult<RefundReceipt> {
        if self.fail_refunds.load(Ordering::SeqCst) {
            return Err(EngineError::external("gateway", "refund rejected", false));
        }
        self.refunds.lock().unwrap().push((order_id.to_string(), amount));
        Ok(RefundReceipt {
            refund_id: format!("rfnd_{order_id}"),
            status: RefundStatus::Processing,
        })
    }
}

// =============================================================================
// Carrier
// =============================================================================

pub struct FakeCarrier {
    signer: Signer,
    pub failing: AtomicBool,
    pub calls: AtomicU32,
    pub booked: Mutex<Vec<(Direction, String)>>,
    pub tracking: Mutex<HashMap<String, OrderStatus>>,
}

impl FakeCarrier {
    fn new() -> Self {
        FakeCarrier {
            signer: Signer::new(CARRIER_SECRET),
            failing: AtomicBool::new(false),
            calls: AtomicU32::new(0),
            booked: Mutex::new(Vec::new()),
            tracking: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_tracking(&self, awb: &str, status: OrderStatus) {
        self.tracking.lock().unwrap().insert(awb.to_string(), status);
    }
}

#[async_trait]
impl ShipmentCarrier for FakeCarrier {
    async fn create_shipment(&self, request: &ShipmentRequest) -> EngineResult<Shipment> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing.load(Ordering::SeqCst) {
            return Err(EngineError::external("carrier", "503 Service Unavailable", true));
        }
        self.booked
            .lock()
            .unwrap()
            .push((request.direction, request.reference.clone()));
        let awb = format!("AWB{n:04}");
        Ok(Shipment {
            shipment_id: format!("shp_{n}"),
            tracking_url: format!("https://track.example.in/{awb}"),
            awb,
        })
    }

    async fn track(&self, awb: &str) -> EngineResult<Option<OrderStatus>> {
        Ok(self.tracking.lock().unwrap().get(awb).copied())
    }

    fn verify_webhook(&self, body: &[u8], signature: &str) -> bool {
        self.signer.verify(body, signature)
    }
}

// =============================================================================
// Notifier
// =============================================================================

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<NotificationKind>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> EngineResult<()> {
        self.sent.lock().unwrap().push(notification.kind.clone());
        Ok(())
    }
}

// =============================================================================
// Harness
// =============================================================================

pub struct Harness {
    pub engine: Engine,
    pub db: Database,
    pub gateway: Arc<FakeGateway>,
    pub carrier: Arc<FakeCarrier>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<ManualClock>,
}

pub fn kurta() -> CatalogProduct {
    CatalogProduct {
        id: "kurta-7".to_string(),
        name: "Linen Kurta".to_string(),
        price: Money::from_rupees(1_000),
        variants: vec![Variant {
            size: "M".to_string(),
            color: "Indigo".to_string(),
            stock: 5,
        }],
    }
}

pub fn saree() -> CatalogProduct {
    CatalogProduct {
        id: "saree-2".to_string(),
        name: "Kanjivaram Saree".to_string(),
        price: Money::from_paise(299_999),
        variants: vec![Variant {
            size: "Free".to_string(),
            color: "Maroon".to_string(),
            stock: 2,
        }],
    }
}

pub fn address(state: &str) -> Address {
    Address {
        full_name: "Asha R".to_string(),
        phone: "9876543210".to_string(),
        line1: "12 Anna Salai".to_string(),
        line2: None,
        city: "Chennai".to_string(),
        state: state.to_string(),
        pincode: "600002".to_string(),
        country: "India".to_string(),
    }
}

pub async fn harness() -> Harness {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let gateway = Arc::new(FakeGateway::new());
    let carrier = Arc::new(FakeCarrier::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let clock = Arc::new(ManualClock(Mutex::new(t0())));

    let collaborators = Collaborators {
        gateway: gateway.clone(),
        carrier: carrier.clone(),
        notifier: notifier.clone(),
        catalog: Arc::new(StaticCatalog::new([kurta(), saree()])),
        clock: clock.clone(),
    };
    let retry = RetrySettings {
        max_attempts: 2,
        initial_backoff_ms: 1,
        max_backoff_secs: 0,
        give_up_after: 4,
    };

    Harness {
        engine: Engine::new(db.clone(), collaborators, &retry),
        db,
        gateway,
        carrier,
        notifier,
        clock,
    }
}

impl Harness {
    pub async fn add(&self, customer: &str, product: &CatalogProduct, quantity: u32) {
        let variant = &product.variants[0];
        self.engine
            .carts
            .add(
                customer,
                AddToCart {
                    product_id: product.id.clone(),
                    size: variant.size.clone(),
                    color: variant.color.clone(),
                    quantity,
                },
            )
            .await
            .unwrap();
    }

    /// Checks out the current cart, submitting the previewed total.
    pub async fn checkout(
        &self,
        customer: &str,
        state: &str,
        discount: DiscountRequest,
    ) -> EngineResult<CheckoutReceipt> {
        let preview = self.engine.orders.preview(customer, state, &discount).await?;
        self.engine
            .orders
            .checkout(
                customer,
                CheckoutRequest {
                    shipping_address: address(state),
                    billing_address: None,
                    discount,
                    submitted_total: preview.pricing.total,
                },
            )
            .await
    }

    /// One kurta to Karnataka: ₹1000 + ₹100 shipping.
    pub async fn place(&self, customer: &str) -> CheckoutReceipt {
        self.add(customer, &kurta(), 1).await;
        self.checkout(customer, "Karnataka", DiscountRequest::None)
            .await
            .unwrap()
    }

    pub fn callback(&self, receipt: &CheckoutReceipt, payment_id: &str) -> PaymentCallback {
        let gateway_order_id = receipt.payment.as_ref().unwrap().gateway_order_id.clone();
        PaymentCallback {
            signature: self.gateway.sign_payment(&gateway_order_id, payment_id),
            gateway_order_id,
            payment_id: payment_id.to_string(),
        }
    }

    pub async fn balance(&self, customer: &str) -> i64 {
        self.db.loyalty().get_account(customer).await.unwrap().balance
    }
}

/// Polls until `check` holds; background bookings run on spawned tasks.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}
