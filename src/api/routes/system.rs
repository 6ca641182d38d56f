//! System handlers: health and OpenAPI.

use axum::{Json, response::IntoResponse};

/// GET /health - Liveness check
///
/// Answers with the JSON string `"alive"` while the daemon is running.
#[utoipa::path(
    get,
    path = "/api/v1/health",
    tag = "system",
    responses(
        (status = 200, description = "Daemon is running", body = String)
    )
)]
pub async fn health_check() -> impl IntoResponse {
    Json("alive")
}

/// GET /openapi.json - OpenAPI specification
#[utoipa::path(
    get,
    path = "/api/v1/openapi.json",
    tag = "system",
    responses(
        (status = 200, description = "OpenAPI specification in JSON format")
    )
)]
pub async fn openapi_spec() -> impl IntoResponse {
    use crate::api::openapi::ApiDoc;
    use utoipa::OpenApi;

    Json(ApiDoc::openapi())
}
