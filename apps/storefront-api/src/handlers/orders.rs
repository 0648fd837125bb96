//! Checkout, payment callback and customer order endpoints.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use evolv_core::discount::DiscountRequest;
use evolv_core::loyalty::LoyaltyAccount;
use evolv_core::order::OrderView;
use evolv_engine::{CheckoutPreview, CheckoutReceipt, CheckoutRequest, EngineError, PaymentCallback};
use serde::{Deserialize, Serialize};

use super::ListParams;
use crate::error::ApiResult;
use crate::extract::CustomerId;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    /// Decides the CGST/SGST vs IGST split.
    pub shipping_state: String,
    #[serde(default)]
    pub discount: DiscountRequest,
}

/// Points balance plus what can be redeemed right now.
#[derive(Debug, Serialize)]
pub struct LoyaltySummary {
    #[serde(flatten)]
    pub account: LoyaltyAccount,
    pub available: i64,
}

pub async fn preview(
    State(state): State<Arc<AppState>>,
    CustomerId(customer): CustomerId,
    Json(req): Json<PreviewRequest>,
) -> ApiResult<Json<CheckoutPreview>> {
    let preview = state
        .engine
        .orders
        .preview(&customer, &req.shipping_state, &req.discount)
        .await?;
    Ok(Json(preview))
}

pub async fn checkout(
    State(state): State<Arc<AppState>>,
    CustomerId(customer): CustomerId,
    Json(req): Json<CheckoutRequest>,
) -> ApiResult<(StatusCode, Json<CheckoutReceipt>)> {
    let receipt = state.engine.orders.checkout(&customer, req).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// Browser callback after the payment widget. The signature authenticates
/// it, so no customer header is needed.
pub async fn payment_callback(
    State(state): State<Arc<AppState>>,
    Json(callback): Json<PaymentCallback>,
) -> ApiResult<Json<OrderView>> {
    Ok(Json(state.engine.orders.confirm_payment(callback).await?))
}

pub async fn loyalty(
    State(state): State<Arc<AppState>>,
    CustomerId(customer): CustomerId,
) -> ApiResult<Json<LoyaltySummary>> {
    let loyalty = state.engine.db().loyalty();
    let account = loyalty
        .get_account(&customer)
        .await
        .map_err(EngineError::from)?;
    let available = loyalty.available(&customer).await.map_err(EngineError::from)?;
    Ok(Json(LoyaltySummary { account, available }))
}

pub async fn list_orders(
    State(state): State<Arc<AppState>>,
    CustomerId(customer): CustomerId,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<OrderView>>> {
    Ok(Json(state.engine.orders.list(&customer, params.limit()).await?))
}

pub async fn get_order(
    State(state): State<Arc<AppState>>,
    CustomerId(customer): CustomerId,
    Path(id): Path<String>,
) -> ApiResult<Json<OrderView>> {
    Ok(Json(state.engine.orders.view(&customer, &id).await?))
}

pub async fn cancel(
    State(state): State<Arc<AppState>>,
    CustomerId(customer): CustomerId,
    Path(id): Path<String>,
) -> ApiResult<Json<OrderView>> {
    Ok(Json(state.engine.orders.cancel(&customer, &id).await?))
}

pub async fn confirm_delivery(
    State(state): State<Arc<AppState>>,
    CustomerId(customer): CustomerId,
    Path(id): Path<String>,
) -> ApiResult<Json<OrderView>> {
    Ok(Json(state.engine.orders.confirm_delivery(&customer, &id).await?))
}
