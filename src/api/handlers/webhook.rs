use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde_json::{Value, json};
use tracing::{error, warn};

use crate::api::state::AppState;
use crate::gateway::webhook::{self, WebhookPayload};
use crate::order::WebhookDisposition;

/// `POST /payments/webhook` — unauthenticated but signature-verified.
///
/// Returns 200 in every non-fraud case, including internal errors: the
/// gateway must not retry forever against a failing endpoint.
pub async fn receive(
    State(state): State<AppState>,
    Json(raw): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let payload: WebhookPayload = match serde_json::from_value(raw) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "webhook with malformed body");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "malformed notification" })),
            );
        }
    };

    if !webhook::verify_signature(&payload, &state.midtrans_server_key) {
        warn!(order_id = %payload.order_id, "webhook signature mismatch");
        return (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "invalid signature" })),
        );
    }

    match state.engine.apply_webhook(&payload).await {
        Ok(WebhookDisposition::Applied) => {
            (StatusCode::OK, Json(json!({ "status": "ok" })))
        }
        Ok(WebhookDisposition::Ignored(reason)) => {
            (StatusCode::OK, Json(json!({ "status": "ok", "note": reason })))
        }
        Ok(WebhookDisposition::Fraud) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "note": "amount mismatch recorded" })),
        ),
        Err(e) => {
            error!(order_id = %payload.order_id, error = %e, "webhook processing error");
            (
                StatusCode::OK,
                Json(json!({ "status": "error", "error": e.to_string() })),
            )
        }
    }
}
