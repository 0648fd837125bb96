//! Request extractors.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::ApiError;

/// Header set by the session layer in front of this service.
pub const CUSTOMER_HEADER: &str = "x-customer-id";

/// The signed-in customer. Authentication happens upstream; this service
/// trusts the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerId(pub String);

impl<S> FromRequestParts<S> for CustomerId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(CUSTOMER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| CustomerId(v.to_string()))
            .ok_or(ApiError::MissingCustomer)
    }
}
