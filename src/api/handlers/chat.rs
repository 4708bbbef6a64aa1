use axum::Json;
use axum::extract::State;
use serde::Deserialize;

use crate::api::error::ApiError;
use crate::api::middleware::AuthUser;
use crate::api::state::AppState;
use crate::convo::Reply;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvanceBody {
    pub chat_id: String,
    pub text: String,
}

/// `POST /chat/advance` — the narrow interface the external chat surface
/// drives the checkout state machine through. One user input in, one
/// renderable reply out.
pub async fn advance(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<AdvanceBody>,
) -> Result<Json<Reply>, ApiError> {
    if let Err(retry_after) = state.limits.general.check(&user.user_id).await {
        return Err(ApiError::RateLimited(format!(
            "too many requests, retry in {retry_after}s"
        )));
    }
    let reply = state
        .convo
        .advance(&body.chat_id, &user.user_id, &body.text)
        .await?;
    Ok(Json(reply))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartBody {
    pub chat_id: String,
}

/// `POST /chat/start` — reset the conversation and enter the buy flow.
pub async fn start(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<StartBody>,
) -> Result<Json<Reply>, ApiError> {
    if let Err(retry_after) = state.limits.general.check(&user.user_id).await {
        return Err(ApiError::RateLimited(format!(
            "too many requests, retry in {retry_after}s"
        )));
    }
    state.convo.reset(&body.chat_id).await;
    let reply = state.convo.begin_buy(&body.chat_id).await?;
    Ok(Json(reply))
}
