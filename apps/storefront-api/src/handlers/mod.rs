//! Route handlers, grouped by audience.

pub mod admin;
pub mod cart;
pub mod exchanges;
pub mod orders;
pub mod webhooks;

use serde::Deserialize;

/// `?limit=` for list endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub limit: Option<i64>,
}

impl ListParams {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(20).clamp(1, 100)
    }
}

pub async fn health() -> &'static str {
    "ok"
}
