//! # Shipment Carrier
//!
//! Creates forward shipments, reverse pickups for exchanges, and maps the
//! carrier's free-text statuses onto the forward-only order statuses.
//!
//! ```text
//! confirmed ──create_shipment──► processing ──webhook "PICKED UP"──► shipped
//!                                               "OUT FOR DELIVERY"──► out_for_delivery
//!                                               "DELIVERED"───────► delivered
//! ```
//!
//! Webhooks drive the status. [`ShipmentCarrier::track`] exists only for the
//! sweeper's reconciliation poll when webhooks go quiet.

use async_trait::async_trait;
use evolv_core::cart::CartLine;
use evolv_core::order::OrderStatus;
use evolv_core::{Address, Money, Shipment};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::config::CarrierSettings;
use crate::error::{EngineError, EngineResult};
use crate::gateway::Signer;

// =============================================================================
// Contract
// =============================================================================

/// Which way the parcel travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Warehouse to customer.
    Forward,
    /// Customer to warehouse (exchange pickup).
    Reverse,
}

/// One parcel line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentItem {
    pub sku: String,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Money,
}

impl From<&CartLine> for ShipmentItem {
    fn from(line: &CartLine) -> Self {
        ShipmentItem {
            sku: format!("{}-{}-{}", line.product_id, line.size, line.color),
            name: line.name.clone(),
            quantity: line.quantity,
            unit_price: line.unit_price,
        }
    }
}

/// Everything the carrier needs to book a parcel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShipmentRequest {
    /// Our reference: order number, or order number + exchange suffix.
    pub reference: String,
    pub direction: Direction,
    /// Delivery address for forward parcels, pickup address for reverse ones.
    pub address: Address,
    pub items: Vec<ShipmentItem>,
    pub declared_value: Money,
}

/// What the engine needs from a carrier.
#[async_trait]
pub trait ShipmentCarrier: Send + Sync {
    async fn create_shipment(&self, request: &ShipmentRequest) -> EngineResult<Shipment>;

    /// Current status for an AWB, `None` when it maps to nothing we track.
    async fn track(&self, awb: &str) -> EngineResult<Option<OrderStatus>>;

    /// Checks the signature of a webhook body.
    fn verify_webhook(&self, body: &[u8], signature: &str) -> bool;
}

// =============================================================================
// Status Mapping
// =============================================================================

/// Maps a carrier status label to an order status.
///
/// Labels are compared upper-case with `_` and `-` read as spaces.
/// Returns `None` for statuses that do not move the order (RTO, NDR, ...).
pub fn map_carrier_status(label: &str) -> Option<OrderStatus> {
    let normalized: String = label
        .trim()
        .chars()
        .map(|c| if c == '_' || c == '-' { ' ' } else { c.to_ascii_uppercase() })
        .collect();
    match normalized.as_str() {
        "AWB ASSIGNED" | "MANIFESTED" | "PICKUP SCHEDULED" | "PICKUP GENERATED" => {
            Some(OrderStatus::Processing)
        }
        "PICKED UP" | "SHIPPED" | "IN TRANSIT" | "REACHED DESTINATION HUB" => {
            Some(OrderStatus::Shipped)
        }
        "OUT FOR DELIVERY" => Some(OrderStatus::OutForDelivery),
        "DELIVERED" => Some(OrderStatus::Delivered),
        _ => None,
    }
}

/// A carrier webhook reduced to AWB + status label.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CarrierEvent {
    pub awb: String,
    pub current_status: String,
    #[serde(default)]
    pub scans: Vec<Value>,
}

impl CarrierEvent {
    pub fn parse(body: &[u8]) -> EngineResult<CarrierEvent> {
        serde_json::from_slice(body).map_err(|e| EngineError::validation("INVALID_WEBHOOK", e.to_string()))
    }

    /// Mapped order status, if the label moves the order.
    pub fn status(&self) -> Option<OrderStatus> {
        map_carrier_status(&self.current_status)
    }

    /// Timeline note for the customer, e.g. "In transit - Chennai Hub".
    pub fn note(&self) -> Option<String> {
        let location = self
            .scans
            .last()
            .and_then(|scan| scan["location"].as_str())
            .filter(|l| !l.is_empty())?;
        Some(format!("{} - {}", title_case(&self.current_status), location))
    }
}

fn title_case(label: &str) -> String {
    let lower = label.replace('_', " ").to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// =============================================================================
// HTTP Implementation
// =============================================================================

#[derive(Deserialize)]
struct CreateShipmentResponse {
    shipment_id: Value,
    awb_code: String,
    #[serde(default)]
    tracking_url: Option<String>,
}

/// Shiprocket-style REST carrier.
pub struct HttpCarrier {
    client: reqwest::Client,
    base_url: String,
    api_token: String,
    pickup_location: String,
    webhook_signer: Signer,
}

impl HttpCarrier {
    pub fn new(settings: &CarrierSettings) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| EngineError::Config(format!("carrier client: {e}")))?;
        Ok(HttpCarrier {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_token: settings.api_token.clone(),
            pickup_location: settings.pickup_location.clone(),
            webhook_signer: Signer::new(&settings.webhook_secret),
        })
    }

    fn tracking_url(awb: &str) -> String {
        format!("https://shiprocket.co/tracking/{awb}")
    }
}

#[async_trait]
impl ShipmentCarrier for HttpCarrier {
    async fn create_shipment(&self, request: &ShipmentRequest) -> EngineResult<Shipment> {
        let http = |e| EngineError::from_http("carrier", e);
        let a = &request.address;
        let body = json!({
            "order_id": request.reference,
            "is_return": request.direction == Direction::Reverse,
            "pickup_location": self.pickup_location,
            "customer_name": a.full_name,
            "address": a.line1,
            "address_2": a.line2,
            "city": a.city,
            "state": a.state,
            "pincode": a.pincode,
            "country": a.country,
            "phone": a.phone,
            "order_items": request.items.iter().map(|i| json!({
                "sku": i.sku,
                "name": i.name,
                "units": i.quantity,
                "selling_price": i.unit_price.paise() as f64 / 100.0,
            })).collect::<Vec<_>>(),
            "sub_total": request.declared_value.paise() as f64 / 100.0,
            "payment_method": "Prepaid",
        });

        let created: CreateShipmentResponse = self
            .client
            .post(format!("{}/shipments", self.base_url))
            .bearer_auth(&self.api_token)
            .json(&body)
            .send()
            .await
            .map_err(http)?
            .error_for_status()
            .map_err(http)?
            .json()
            .await
            .map_err(http)?;

        let shipment_id = match created.shipment_id {
            Value::String(s) => s,
            other => other.to_string(),
        };
        info!(
            reference = %request.reference,
            direction = ?request.direction,
            awb = %created.awb_code,
            "Shipment created"
        );
        Ok(Shipment {
            tracking_url: created
                .tracking_url
                .unwrap_or_else(|| Self::tracking_url(&created.awb_code)),
            shipment_id,
            awb: created.awb_code,
        })
    }

    async fn track(&self, awb: &str) -> EngineResult<Option<OrderStatus>> {
        let http = |e| EngineError::from_http("carrier", e);
        let body: Value = self
            .client
            .get(format!("{}/courier/track/awb/{awb}", self.base_url))
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(http)?
            .error_for_status()
            .map_err(http)?
            .json()
            .await
            .map_err(http)?;

        let label = body["tracking_data"]["shipment_track"][0]["current_status"]
            .as_str()
            .unwrap_or_default();
        debug!(awb, label, "Tracking polled");
        Ok(map_carrier_status(label))
    }

    fn verify_webhook(&self, body: &[u8], signature: &str) -> bool {
        self.webhook_signer.verify(body, signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(map_carrier_status("PICKED UP"), Some(OrderStatus::Shipped));
        assert_eq!(map_carrier_status("in_transit"), Some(OrderStatus::Shipped));
        assert_eq!(
            map_carrier_status("Out-For-Delivery"),
            Some(OrderStatus::OutForDelivery)
        );
        assert_eq!(map_carrier_status(" Delivered "), Some(OrderStatus::Delivered));
        assert_eq!(map_carrier_status("PICKUP SCHEDULED"), Some(OrderStatus::Processing));
        assert_eq!(map_carrier_status("RTO INITIATED"), None);
        assert_eq!(map_carrier_status(""), None);
    }

    #[test]
    fn test_parse_webhook_with_note() {
        let event = CarrierEvent::parse(
            br#"{"awb":"1915001","current_status":"IN_TRANSIT",
                 "scans":[{"location":"Mumbai Hub"},{"location":"Chennai Hub"}]}"#,
        )
        .unwrap();
        assert_eq!(event.status(), Some(OrderStatus::Shipped));
        assert_eq!(event.note().as_deref(), Some("In transit - Chennai Hub"));

        let bare = CarrierEvent::parse(br#"{"awb":"1","current_status":"DELIVERED"}"#).unwrap();
        assert_eq!(bare.note(), None);
        assert!(CarrierEvent::parse(br#"{"current_status":"DELIVERED"}"#).is_err());
    }

    #[test]
    fn test_shipment_item_from_line() {
        let line = CartLine {
            product_id: "kurta-7".to_string(),
            name: "Linen Kurta".to_string(),
            size: "M".to_string(),
            color: "Indigo".to_string(),
            unit_price: Money::from_rupees(1000),
            quantity: 2,
        };
        let item = ShipmentItem::from(&line);
        assert_eq!(item.sku, "kurta-7-M-Indigo");
        assert_eq!(item.quantity, 2);
    }
}
