//! OpenAPI documentation and schema generation

use utoipa::OpenApi;

/// OpenAPI documentation for the status API
///
/// Served at `/api/v1/openapi.json` and rendered at `/swagger-ui`.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "deal-importer status API",
        description = "Read-only view of the offline deal import ledger"
    ),
    servers(
        (url = "http://localhost:1313", description = "Local daemon")
    ),
    paths(
        crate::api::routes::health_check,
        crate::api::routes::openapi_spec,
        crate::api::routes::get_stats,
        crate::api::routes::list_deals,
        crate::api::routes::get_deal,
    ),
    components(schemas(
        crate::types::DealStats,
        crate::types::StatusTotals,
        crate::types::DealStatus,
        crate::types::ImportedDeal,
        crate::error::ApiError,
        crate::error::ErrorDetail,
    )),
    tags(
        (name = "system", description = "Health check and OpenAPI spec"),
        (name = "stats", description = "Aggregate ledger statistics"),
        (name = "deals", description = "Recorded import attempts"),
    )
)]
pub struct ApiDoc;
