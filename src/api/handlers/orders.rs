use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::api::error::ApiError;
use crate::api::middleware::AuthUser;
use crate::api::state::AppState;
use crate::error::EngineError;
use crate::model::{Order, PaymentMethod};
use crate::order::{CreateOrderRequest, PaymentInfo};
use crate::store::orders;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderBody {
    pub chain: String,
    /// Accepts `100000`, `"100.000"`, `"Rp 100,000"` — anything the IDR
    /// parser takes.
    pub amount_idr: Value,
    pub wallet_address: String,
    #[serde(default)]
    pub voucher_code: Option<String>,
}

/// `POST /orders`
pub async fn create(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<CreateOrderBody>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    if let Err(retry_after) = state.limits.order_create.check(&user.user_id).await {
        return Err(ApiError::RateLimited(format!(
            "order creation limit reached, retry in {retry_after}s"
        )));
    }

    let amount_idr = parse_amount(&body.amount_idr)?;
    let result = state
        .engine
        .create_order(CreateOrderRequest {
            user_id: user.user_id,
            chain: body.chain,
            amount_idr,
            wallet_address: body.wallet_address,
            voucher_code: body.voucher_code.filter(|c| !c.trim().is_empty()),
        })
        .await;

    match result {
        Ok(order) => {
            crate::jobs::spawn_single_expiry(state.engine.clone(), order.id.clone());
            Ok((StatusCode::CREATED, Json(order)))
        }
        Err(EngineError::PendingOrderExists { order_id }) => {
            let pending = state.engine.get_order(&order_id).await?;
            Err(ApiError::PendingOrder(Box::new(pending)))
        }
        Err(e) => Err(e.into()),
    }
}

#[derive(Deserialize)]
pub struct PayBody {
    pub method: String,
}

/// `POST /orders/:id/pay`
pub async fn pay(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<String>,
    Json(body): Json<PayBody>,
) -> Result<Json<PaymentInfo>, ApiError> {
    let method = PaymentMethod::parse(&body.method)
        .ok_or_else(|| ApiError::BadRequest("method must be QRIS or VA".into()))?;
    require_owner(&state, &user, &order_id).await?;
    let info = state.engine.create_payment(&order_id, method).await?;
    Ok(Json(info))
}

#[derive(Serialize)]
pub struct SyncResponse {
    pub status: String,
}

/// `POST /orders/:id/sync` — re-reads the gateway and may promote the
/// order.
pub async fn sync(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<String>,
) -> Result<Json<SyncResponse>, ApiError> {
    require_owner(&state, &user, &order_id).await?;
    let status = state.engine.sync_order(&order_id).await?;
    Ok(Json(SyncResponse {
        status: status.as_str().to_string(),
    }))
}

/// `POST /orders/:id/cancel`
pub async fn cancel(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    require_owner(&state, &user, &order_id).await?;
    match state.engine.cancel_order(&order_id).await {
        Ok(()) => Ok(Json(json!({ "success": true, "message": "order cancelled" }))),
        Err(EngineError::NotCancellable { status, .. }) => Err(ApiError::BadRequest(format!(
            "order is {status} and can no longer be cancelled"
        ))),
        Err(e) => Err(e.into()),
    }
}

/// `GET /orders/:id`
pub async fn get_one(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let order = require_owner(&state, &user, &order_id).await?;
    Ok(Json(order))
}

async fn require_owner(
    state: &AppState,
    user: &AuthUser,
    order_id: &str,
) -> Result<Order, ApiError> {
    if let Err(retry_after) = state.limits.general.check(&user.user_id).await {
        return Err(ApiError::RateLimited(format!(
            "too many requests, retry in {retry_after}s"
        )));
    }
    let order = state.engine.get_order(order_id).await?;
    if order.user_id != user.user_id && user.role != crate::model::Role::Admin {
        // Hide other users' orders entirely.
        return Err(ApiError::NotFound(format!("order {order_id} not found")));
    }
    Ok(order)
}

fn parse_amount(raw: &Value) -> Result<i64, ApiError> {
    match raw {
        Value::Number(n) => n
            .as_i64()
            .filter(|v| *v > 0)
            .ok_or_else(|| ApiError::BadRequest("amountIdr must be a positive integer".into())),
        Value::String(s) => crate::util::amount::parse_idr(s).map_err(Into::into),
        _ => Err(ApiError::BadRequest("amountIdr must be a number or string".into())),
    }
}

/// `GET /orders` — the caller's orders, newest first.
pub async fn list(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<Order>>, ApiError> {
    let conn = state.db.lock().await;
    let list = orders::list_by_user(&conn, &user.user_id)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(list))
}
