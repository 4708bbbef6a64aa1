use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::error::EngineError;
use crate::model::Order;

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    Conflict(String),
    /// 409 carrying the blocking order, per the order-creation contract.
    PendingOrder(Box<Order>),
    Unavailable(String),
    RateLimited(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, json!({ "error": msg })),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, json!({ "error": msg })),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, json!({ "error": msg })),
            ApiError::PendingOrder(order) => (
                StatusCode::CONFLICT,
                json!({ "error": "PENDING_ORDER_EXISTS", "pendingOrder": order }),
            ),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, json!({ "error": msg })),
            ApiError::RateLimited(msg) => (StatusCode::TOO_MANY_REQUESTS, json!({ "error": msg })),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": msg })),
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Validation(msg) => ApiError::BadRequest(msg),
            EngineError::OrderNotFound(id) => ApiError::NotFound(format!("order {id} not found")),
            e @ (EngineError::InsufficientInventory { .. }
            | EngineError::VoucherQuotaExceeded
            | EngineError::VoucherRejected(_)
            | EngineError::Slippage { .. }
            | EngineError::NotCancellable { .. }
            | EngineError::LockContention
            | EngineError::PendingOrderExists { .. }) => ApiError::Conflict(e.to_string()),
            e @ (EngineError::PriceUnavailable(_)
            | EngineError::External(_)
            | EngineError::LockAcquisition(_)) => ApiError::Unavailable(e.to_string()),
            e => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(format!("{err:#}"))
    }
}
