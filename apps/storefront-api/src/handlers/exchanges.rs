//! Customer exchange endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use evolv_core::exchange::{ExchangeInput, ExchangeRequest};

use crate::error::ApiResult;
use crate::extract::CustomerId;
use crate::AppState;

pub async fn request(
    State(state): State<Arc<AppState>>,
    CustomerId(customer): CustomerId,
    Path(order_id): Path<String>,
    Json(input): Json<ExchangeInput>,
) -> ApiResult<(StatusCode, Json<ExchangeRequest>)> {
    let request = state
        .engine
        .exchanges
        .request(&customer, &order_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(request)))
}

pub async fn list_for_order(
    State(state): State<Arc<AppState>>,
    CustomerId(customer): CustomerId,
    Path(order_id): Path<String>,
) -> ApiResult<Json<Vec<ExchangeRequest>>> {
    let requests = state
        .engine
        .exchanges
        .list_for_order(&customer, &order_id)
        .await?;
    Ok(Json(requests))
}
