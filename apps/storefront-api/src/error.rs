//! # API Errors
//!
//! Maps the engine taxonomy onto HTTP.
//!
//! ```text
//! Validation ──► 400   Conflict ──► 409 (+ current order)   Expired ──► 410
//! NotFound   ──► 404   ExternalService ──► 502             Database/Config ──► 500
//! ```
//!
//! Every error body is `{code, message, current?}` and the code is repeated
//! in an `X-Error-Code` header.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use evolv_core::order::OrderView;
use evolv_engine::EngineError;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<OrderView>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Request arrived without the customer header set by the session layer.
    #[error("Missing X-Customer-Id header")]
    MissingCustomer,

    /// Webhook body did not match its signature header.
    #[error("Invalid {0} webhook signature")]
    InvalidSignature(&'static str),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Engine(e) => match e {
                EngineError::Validation { .. } => StatusCode::BAD_REQUEST,
                EngineError::Conflict { .. } => StatusCode::CONFLICT,
                EngineError::Expired { .. } => StatusCode::GONE,
                EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
                EngineError::ExternalService { .. } => StatusCode::BAD_GATEWAY,
                EngineError::Database(_) | EngineError::Config(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ApiError::MissingCustomer | ApiError::InvalidSignature(_) => StatusCode::UNAUTHORIZED,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Engine(e) => e.code(),
            ApiError::MissingCustomer => "UNAUTHENTICATED",
            ApiError::InvalidSignature(_) => "INVALID_SIGNATURE",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        let (message, current) = match self {
            ApiError::Engine(EngineError::Conflict { message, current }) => {
                (message, current.map(|view| *view))
            }
            ApiError::Engine(e @ (EngineError::Database(_) | EngineError::Config(_))) => {
                error!(error = %e, "Request failed");
                ("Internal server error".to_string(), None)
            }
            other => (other.to_string(), None),
        };

        let body = ErrorBody {
            code: code.to_string(),
            message,
            current,
        };
        let mut resp = (status, Json(body)).into_response();
        if let Ok(val) = HeaderValue::from_str(code) {
            resp.headers_mut().insert("X-Error-Code", val);
        }
        resp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evolv_db::DbError;

    async fn body_of(resp: Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), 8192).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_validation_is_bad_request() {
        let resp = ApiError::from(EngineError::validation("TOTAL_MISMATCH", "Total changed"))
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(resp.headers().get("X-Error-Code").unwrap(), "TOTAL_MISMATCH");
        let body = body_of(resp).await;
        assert!(body.contains("\"code\":\"TOTAL_MISMATCH\""));
        assert!(!body.contains("current"));
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let cases = [
            (EngineError::conflict("already paid", None), StatusCode::CONFLICT),
            (
                EngineError::Expired {
                    message: "window closed".into(),
                },
                StatusCode::GONE,
            ),
            (EngineError::not_found("Order", "o-1"), StatusCode::NOT_FOUND),
            (EngineError::external("carrier", "503", true), StatusCode::BAD_GATEWAY),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
        assert_eq!(
            ApiError::MissingCustomer.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[tokio::test]
    async fn test_internal_details_hidden() {
        let resp = ApiError::from(EngineError::Database(DbError::PoolExhausted)).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_of(resp).await;
        assert!(body.contains("\"code\":\"INTERNAL\""));
        assert!(!body.to_lowercase().contains("pool"));
    }
}
