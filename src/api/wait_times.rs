use axum::{
    extract::{Query, State},
    Json,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use utoipa::{IntoParams, ToSchema};

use crate::api::{bad_request, internal_error, ApiError, ErrorResponse};
use crate::db::wait_times;
use crate::models::WaitTime;

#[derive(Debug, Serialize, ToSchema)]
pub struct WaitTimeListResponse {
    pub wait_times: Vec<WaitTime>,
}

/// Exactly one filter is required
#[derive(Debug, Deserialize, IntoParams)]
pub struct WaitTimeQuery {
    /// Wait times of one branch
    pub branch: Option<i64>,
    /// Wait times of every branch in a region
    pub region: Option<i64>,
    /// One snapshot, by its exact capture time (e.g. `2018-12-06T23:22:13`)
    pub timestamp: Option<NaiveDateTime>,
}

/// List wait times by branch, region, or capture timestamp
#[utoipa::path(
    get,
    path = "/api/wait-times",
    params(WaitTimeQuery),
    responses(
        (status = 200, description = "Matching wait times, possibly empty", body = WaitTimeListResponse),
        (status = 400, description = "Missing or conflicting filters", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "wait_times"
)]
pub async fn list_wait_times(
    State(pool): State<SqlitePool>,
    Query(query): Query<WaitTimeQuery>,
) -> Result<Json<WaitTimeListResponse>, ApiError> {
    let wait_times = match (query.branch, query.region, query.timestamp) {
        (Some(branch), None, None) => wait_times::wait_times_by_branch(&pool, branch).await,
        (None, Some(region), None) => wait_times::wait_times_by_region(&pool, region).await,
        (None, None, Some(timestamp)) => wait_times::wait_times_by_date(&pool, timestamp).await,
        _ => {
            return Err(bad_request(
                "Exactly one of branch, region or timestamp is required",
            ))
        }
    }
    .map_err(internal_error)?;

    Ok(Json(WaitTimeListResponse { wait_times }))
}
