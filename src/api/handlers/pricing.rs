use axum::Json;
use axum::extract::{Query, State};
use serde::Deserialize;

use crate::api::error::ApiError;
use crate::api::state::AppState;
use crate::quote::QuoteResult;

#[derive(Deserialize)]
pub struct QuoteQuery {
    pub chain: String,
    #[serde(rename = "amountIdr")]
    pub amount_idr: i64,
}

/// `GET /pricing/quote?chain=<slug>&amountIdr=<int>` — unauthenticated.
pub async fn quote(
    State(state): State<AppState>,
    Query(q): Query<QuoteQuery>,
) -> Result<Json<QuoteResult>, ApiError> {
    let result = state.quotes.quote(&q.chain, q.amount_idr).await?;
    Ok(Json(result))
}
