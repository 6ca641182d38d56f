//! Import attempt handlers.

use super::DealsQuery;
use crate::api::AppState;
use crate::error::{Error, Result};
use crate::types::{DealStatus, ImportedDeal};
use axum::{
    Json,
    extract::{Path, Query, State},
};

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 1000;

fn parse_status(value: &str) -> Result<DealStatus> {
    match value.to_ascii_uppercase().as_str() {
        "PENDING" => Ok(DealStatus::Pending),
        "SUCCESS" => Ok(DealStatus::Success),
        "FAILED" => Ok(DealStatus::Failed),
        _ => Err(Error::config(
            format!("invalid status filter {value:?}: must be PENDING, SUCCESS or FAILED"),
            "status",
        )),
    }
}

/// GET /deals - Most recent import attempts
#[utoipa::path(
    get,
    path = "/api/v1/deals",
    tag = "deals",
    params(DealsQuery),
    responses(
        (status = 200, description = "Import attempts, newest first", body = Vec<ImportedDeal>),
        (status = 400, description = "Invalid status filter", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError)
    )
)]
pub async fn list_deals(
    State(state): State<AppState>,
    Query(query): Query<DealsQuery>,
) -> Result<Json<Vec<ImportedDeal>>> {
    let status = query.status.as_deref().map(parse_status).transpose()?;
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT) as usize;

    Ok(Json(state.db.list_deals(status, limit).await?))
}

/// GET /deals/:id - One import attempt by ledger row ID
#[utoipa::path(
    get,
    path = "/api/v1/deals/{id}",
    tag = "deals",
    params(
        ("id" = i64, Path, description = "Ledger row ID")
    ),
    responses(
        (status = 200, description = "Import attempt", body = ImportedDeal),
        (status = 404, description = "No such row", body = crate::error::ApiError)
    )
)]
pub async fn get_deal(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ImportedDeal>> {
    state
        .db
        .get_deal(id)
        .await?
        .map(Json)
        .ok_or_else(|| Error::NotFound(format!("deal {id}")))
}
