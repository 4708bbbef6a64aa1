use axum::Json;
use axum::extract::{Path, State};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::api::error::ApiError;
use crate::api::middleware::AdminUser;
use crate::api::state::AppState;
use crate::store::{audit, inventory, now_ts, orders};

/// `POST /admin/orders/:id/retry` — re-enqueue the payout executor. The
/// executor's claim/recovery logic decides what actually happens.
pub async fn retry(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(order_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let order = state.engine.get_order(&order_id).await?;
    info!(order_id = %order.id, admin = %admin.user_id, "admin payout retry");
    state.engine.payouts.enqueue(&order.id);
    Ok(Json(json!({ "success": true, "status": order.status.as_str() })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkSuccessBody {
    pub tx_hash: String,
}

/// `POST /admin/orders/:id/mark-success` — operator reconciliation for an
/// order whose transfer is confirmed on-chain but stuck in the database.
pub async fn mark_success(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(order_id): Path<String>,
    Json(body): Json<MarkSuccessBody>,
) -> Result<Json<Value>, ApiError> {
    let tx_hash = body.tx_hash.trim();
    if tx_hash.is_empty() {
        return Err(ApiError::BadRequest("txHash required".into()));
    }

    let order = state.engine.get_order(&order_id).await?;
    let effected = {
        let mut conn = state.db.lock().await;
        let tx = conn
            .transaction()
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        let effected = orders::finalize_success(&tx, &order_id, tx_hash, now_ts())
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        if effected {
            inventory::deduct(&tx, &order.chain, &order.symbol, order.amount_token)?;
            audit::record(
                &tx,
                "WARN",
                "admin_mark_success",
                Some(&order_id),
                &format!("by {} with tx {tx_hash}", admin.user_id),
            )
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        }
        tx.commit().map_err(|e| ApiError::Internal(e.to_string()))?;
        effected
    };

    if !effected {
        return Err(ApiError::Conflict(format!(
            "order is {} and cannot be marked successful",
            order.status.as_str()
        )));
    }
    Ok(Json(json!({ "success": true })))
}
