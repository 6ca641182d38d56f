//! Ledger statistics handler.

use crate::api::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};

/// GET /stats - Count and bytes per status, plus first and last import time
#[utoipa::path(
    get,
    path = "/api/v1/stats",
    tag = "stats",
    responses(
        (status = 200, description = "Ledger statistics", body = crate::types::DealStats),
        (status = 500, description = "Internal server error", body = crate::error::ApiError)
    )
)]
pub async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    match state.db.get_deal_stats().await {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(e) => e.into_response(),
    }
}
