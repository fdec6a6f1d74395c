use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use utoipa::{IntoParams, ToSchema};

use crate::api::{internal_error, not_found, ApiError, ErrorResponse};
use crate::db::branches;
use crate::models::Branch;

#[derive(Debug, Serialize, ToSchema)]
pub struct BranchListResponse {
    pub branches: Vec<Branch>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct BranchQuery {
    /// Filter by DMV region
    pub region: Option<i64>,
}

/// List branches ordered by number, optionally filtered by region
#[utoipa::path(
    get,
    path = "/api/branches",
    params(BranchQuery),
    responses(
        (status = 200, description = "List of branches", body = BranchListResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "branches"
)]
pub async fn list_branches(
    State(pool): State<SqlitePool>,
    Query(query): Query<BranchQuery>,
) -> Result<Json<BranchListResponse>, ApiError> {
    let branches = match query.region {
        Some(region) => branches::branches_by_region(&pool, region).await,
        None => branches::all_branches(&pool).await,
    }
    .map_err(internal_error)?;

    Ok(Json(BranchListResponse { branches }))
}

/// Get a branch by its DMV number
#[utoipa::path(
    get,
    path = "/api/branches/{number}",
    params(
        ("number" = i64, Path, description = "DMV branch number")
    ),
    responses(
        (status = 200, description = "Branch details", body = Branch),
        (status = 404, description = "Branch not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "branches"
)]
pub async fn get_branch(
    State(pool): State<SqlitePool>,
    Path(number): Path<i64>,
) -> Result<Json<Branch>, ApiError> {
    branches::branch_by_number(&pool, number)
        .await
        .map_err(internal_error)?
        .map(Json)
        .ok_or_else(|| not_found(format!("Branch {} not found", number)))
}
