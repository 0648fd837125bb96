//! # Evolv Storefront API
//!
//! HTTP surface over [`evolv_engine::Engine`].
//!
//! ## Routes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Customer (X-Customer-Id)                                               │
//! │    GET    /cart                     POST   /checkout/preview            │
//! │    POST   /cart/items               POST   /checkout                    │
//! │    PATCH  /cart/items               POST   /payments/callback           │
//! │    DELETE /cart/items               GET    /loyalty                     │
//! │    GET    /orders                   GET    /orders/{id}                 │
//! │    POST   /orders/{id}/cancel       POST   /orders/{id}/confirm-delivery│
//! │    GET    /orders/{id}/exchanges    POST   /orders/{id}/exchanges       │
//! │                                                                         │
//! │  Admin                                                                  │
//! │    POST /admin/orders/{id}/status   GET  /admin/exchanges/pending       │
//! │    POST /admin/exchanges/{id}/approve | reject | received               │
//! │    POST /admin/orders/{id}/refund   GET  /admin/interventions           │
//! │    POST /admin/interventions/{id}/resolve                               │
//! │                                                                         │
//! │  Webhooks (HMAC over raw body)                                          │
//! │    POST /webhooks/gateway           POST /webhooks/carrier              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Commands answer with the state after the transition, never a bare ack.

pub mod error;
pub mod extract;
pub mod handlers;

pub use error::{ApiError, ApiResult};
pub use extract::CustomerId;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use evolv_engine::Engine;
use tower_http::trace::TraceLayer;

/// Shared application state.
pub struct AppState {
    pub engine: Engine,
}

impl AppState {
    pub fn new(engine: Engine) -> Arc<Self> {
        Arc::new(AppState { engine })
    }
}

/// Builds the full router.
pub fn router(state: Arc<AppState>) -> Router {
    use handlers::{admin, cart, exchanges, orders, webhooks};

    Router::new()
        .route("/health", get(handlers::health))
        // Cart
        .route("/cart", get(cart::get_cart).delete(cart::clear_cart))
        .route(
            "/cart/items",
            post(cart::add_item)
                .patch(cart::update_item)
                .delete(cart::remove_item),
        )
        // Checkout and payment
        .route("/checkout/preview", post(orders::preview))
        .route("/checkout", post(orders::checkout))
        .route("/payments/callback", post(orders::payment_callback))
        .route("/loyalty", get(orders::loyalty))
        // Orders
        .route("/orders", get(orders::list_orders))
        .route("/orders/{id}", get(orders::get_order))
        .route("/orders/{id}/cancel", post(orders::cancel))
        .route("/orders/{id}/confirm-delivery", post(orders::confirm_delivery))
        .route(
            "/orders/{id}/exchanges",
            get(exchanges::list_for_order).post(exchanges::request),
        )
        // Admin
        .route("/admin/orders/{id}/status", post(admin::update_status))
        .route("/admin/orders/{id}/refund", post(admin::refund))
        .route("/admin/exchanges/pending", get(admin::pending_exchanges))
        .route("/admin/exchanges/{id}", get(admin::get_exchange))
        .route("/admin/exchanges/{id}/approve", post(admin::approve))
        .route("/admin/exchanges/{id}/reject", post(admin::reject))
        .route("/admin/exchanges/{id}/received", post(admin::mark_received))
        .route("/admin/interventions", get(admin::interventions))
        .route(
            "/admin/interventions/{id}/resolve",
            post(admin::resolve_intervention),
        )
        // Webhooks
        .route("/webhooks/gateway", post(webhooks::gateway))
        .route("/webhooks/carrier", post(webhooks::carrier))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
