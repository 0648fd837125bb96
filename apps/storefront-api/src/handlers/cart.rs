//! Cart endpoints. Every call returns the whole cart.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use evolv_core::cart::Cart;
use evolv_engine::AddToCart;
use serde::Deserialize;

use crate::error::ApiResult;
use crate::extract::CustomerId;
use crate::AppState;

/// Identifies a cart line.
#[derive(Debug, Deserialize)]
pub struct LineKey {
    pub product_id: String,
    pub size: String,
    pub color: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateLine {
    #[serde(flatten)]
    pub line: LineKey,
    /// Zero removes the line.
    pub quantity: u32,
}

pub async fn get_cart(
    State(state): State<Arc<AppState>>,
    CustomerId(customer): CustomerId,
) -> ApiResult<Json<Cart>> {
    Ok(Json(state.engine.carts.get(&customer).await?))
}

pub async fn add_item(
    State(state): State<Arc<AppState>>,
    CustomerId(customer): CustomerId,
    Json(item): Json<AddToCart>,
) -> ApiResult<Json<Cart>> {
    Ok(Json(state.engine.carts.add(&customer, item).await?))
}

pub async fn update_item(
    State(state): State<Arc<AppState>>,
    CustomerId(customer): CustomerId,
    Json(update): Json<UpdateLine>,
) -> ApiResult<Json<Cart>> {
    let LineKey {
        product_id,
        size,
        color,
    } = update.line;
    let cart = state
        .engine
        .carts
        .update_quantity(&customer, &product_id, &size, &color, update.quantity)
        .await?;
    Ok(Json(cart))
}

pub async fn remove_item(
    State(state): State<Arc<AppState>>,
    CustomerId(customer): CustomerId,
    Json(line): Json<LineKey>,
) -> ApiResult<Json<Cart>> {
    let cart = state
        .engine
        .carts
        .remove(&customer, &line.product_id, &line.size, &line.color)
        .await?;
    Ok(Json(cart))
}

pub async fn clear_cart(
    State(state): State<Arc<AppState>>,
    CustomerId(customer): CustomerId,
) -> ApiResult<Json<Cart>> {
    state.engine.carts.clear(&customer).await?;
    Ok(Json(Cart::new(customer)))
}
