pub mod branches;
pub mod error;
pub mod wait_times;

pub use error::{bad_request, internal_error, not_found, ApiError, ErrorResponse};

use axum::{routing::get, Json, Router};
use sqlx::SqlitePool;
use utoipa::OpenApi;
use utoipa_axum::{router::OpenApiRouter, routes};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "CA DMV wait times",
        description = "Branch metadata and wait time snapshots of California DMV offices"
    ),
    tags(
        (name = "branches", description = "DMV office metadata"),
        (name = "wait_times", description = "Recorded wait time observations")
    )
)]
pub struct ApiDoc;

/// Read-only API; the OpenAPI document is served at `/api/openapi.json`
pub fn router(pool: SqlitePool) -> Router {
    let (router, openapi) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .routes(routes!(branches::list_branches))
        .routes(routes!(branches::get_branch))
        .routes(routes!(wait_times::list_wait_times))
        .with_state(pool)
        .split_for_parts();

    router.route(
        "/api/openapi.json",
        get(move || {
            let openapi = openapi.clone();
            async move { Json(openapi) }
        }),
    )
}
