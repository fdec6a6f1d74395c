use sqlx::{SqliteConnection, SqliteExecutor};

use super::RepositoryError;
use crate::models::{Branch, BranchInfo, UpsertOutcome};

const BRANCH_COLUMNS: &str = "number, region, name, address, hours, latitude, longitude, \
     nearby1, nearby2, nearby3, nearby4, nearby5, updated_at";

/// Insert a branch, or update the existing row with the same `number`
///
/// Identical input leaves the row (and its `updated_at`) untouched.
pub async fn upsert_branch(
    conn: &mut SqliteConnection,
    info: &BranchInfo,
) -> Result<UpsertOutcome, RepositoryError> {
    let existing: Option<BranchInfo> = sqlx::query_as(
        r#"
        SELECT number, region, name, address, hours, latitude, longitude,
               nearby1, nearby2, nearby3, nearby4, nearby5
        FROM branches
        WHERE number = ?
        "#,
    )
    .bind(info.number)
    .fetch_optional(&mut *conn)
    .await?;

    let outcome = match existing {
        Some(current) if current == *info => return Ok(UpsertOutcome::Unchanged),
        Some(_) => UpsertOutcome::Updated,
        None => UpsertOutcome::Inserted,
    };

    // ON CONFLICT keeps this correct if another writer inserted the branch
    // between the lookup and here.
    sqlx::query(
        r#"
        INSERT INTO branches (number, region, name, address, hours, latitude, longitude,
                              nearby1, nearby2, nearby3, nearby4, nearby5, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))
        ON CONFLICT(number) DO UPDATE SET
            region = excluded.region,
            name = excluded.name,
            address = excluded.address,
            hours = excluded.hours,
            latitude = excluded.latitude,
            longitude = excluded.longitude,
            nearby1 = excluded.nearby1,
            nearby2 = excluded.nearby2,
            nearby3 = excluded.nearby3,
            nearby4 = excluded.nearby4,
            nearby5 = excluded.nearby5,
            updated_at = datetime('now')
        "#,
    )
    .bind(info.number)
    .bind(info.region)
    .bind(&info.name)
    .bind(&info.address)
    .bind(&info.hours)
    .bind(info.latitude)
    .bind(info.longitude)
    .bind(info.nearby1)
    .bind(info.nearby2)
    .bind(info.nearby3)
    .bind(info.nearby4)
    .bind(info.nearby5)
    .execute(&mut *conn)
    .await?;

    Ok(outcome)
}

pub async fn branch_by_number<'e, E>(
    executor: E,
    number: i64,
) -> Result<Option<Branch>, RepositoryError>
where
    E: SqliteExecutor<'e>,
{
    let branch = sqlx::query_as(&format!(
        "SELECT {BRANCH_COLUMNS} FROM branches WHERE number = ?"
    ))
    .bind(number)
    .fetch_optional(executor)
    .await?;

    Ok(branch)
}

pub async fn branches_by_region<'e, E>(
    executor: E,
    region: i64,
) -> Result<Vec<Branch>, RepositoryError>
where
    E: SqliteExecutor<'e>,
{
    let branches = sqlx::query_as(&format!(
        "SELECT {BRANCH_COLUMNS} FROM branches WHERE region = ? ORDER BY number"
    ))
    .bind(region)
    .fetch_all(executor)
    .await?;

    Ok(branches)
}

pub async fn all_branches<'e, E>(executor: E) -> Result<Vec<Branch>, RepositoryError>
where
    E: SqliteExecutor<'e>,
{
    let branches = sqlx::query_as(&format!(
        "SELECT {BRANCH_COLUMNS} FROM branches ORDER BY number"
    ))
    .fetch_all(executor)
    .await?;

    Ok(branches)
}

pub async fn branch_exists<'e, E>(executor: E, number: i64) -> Result<bool, RepositoryError>
where
    E: SqliteExecutor<'e>,
{
    let found: i64 =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM branches WHERE number = ?)")
            .bind(number)
            .fetch_one(executor)
            .await?;

    Ok(found != 0)
}
