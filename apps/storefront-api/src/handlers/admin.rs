//! Operator endpoints. Mounted behind the admin gateway, which does the
//! authentication.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use evolv_core::exchange::ExchangeRequest;
use evolv_core::order::{Order, OrderStatus};
use evolv_core::Money;
use evolv_db::Intervention;
use serde::Deserialize;
use tracing::info;

use super::ListParams;
use crate::error::ApiResult;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: OrderStatus,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RefundBody {
    pub amount: Money,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct RejectBody {
    pub reason: String,
}

// =============================================================================
// Orders
// =============================================================================

/// Forward-only, same rules as carrier webhooks.
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(update): Json<StatusUpdate>,
) -> ApiResult<Json<Order>> {
    info!(order_id = %id, status = ?update.status, "Admin status update");
    let order = state
        .engine
        .orders
        .update_status(&id, update.status, update.note)
        .await?;
    Ok(Json(order))
}

/// Refund for a cancelled-after-payment order or a goodwill gesture.
pub async fn refund(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<RefundBody>,
) -> ApiResult<Json<Order>> {
    let order = state
        .engine
        .orders
        .initiate_refund(&id, body.amount, &body.reason)
        .await?;
    Ok(Json(order))
}

// =============================================================================
// Exchanges
// =============================================================================

pub async fn pending_exchanges(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<ExchangeRequest>>> {
    Ok(Json(state.engine.exchanges.pending(params.limit()).await?))
}

pub async fn get_exchange(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ExchangeRequest>> {
    Ok(Json(state.engine.exchanges.get(&id).await?))
}

pub async fn approve(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ExchangeRequest>> {
    Ok(Json(state.engine.exchanges.approve(&id).await?))
}

pub async fn reject(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<RejectBody>,
) -> ApiResult<Json<ExchangeRequest>> {
    Ok(Json(state.engine.exchanges.reject(&id, &body.reason).await?))
}

/// Warehouse has the returned item.
pub async fn mark_received(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ExchangeRequest>> {
    Ok(Json(state.engine.exchanges.mark_received(&id).await?))
}

// =============================================================================
// Interventions
// =============================================================================

pub async fn interventions(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<Intervention>>> {
    Ok(Json(state.engine.interventions(params.limit()).await?))
}

pub async fn resolve_intervention(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.engine.resolve_intervention(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
