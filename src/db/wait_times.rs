use chrono::{NaiveDateTime, TimeDelta};
use sqlx::{Connection, SqliteConnection, SqliteExecutor};
use tracing::{info, warn};

use super::RepositoryError;
use crate::models::WaitTime;

/// Append a snapshot of wait times
///
/// The batch runs in its own transaction (a savepoint when `conn` is already
/// inside one), so readers see either every row or none of them.
pub async fn insert_wait_times(
    conn: &mut SqliteConnection,
    batch: &[WaitTime],
) -> Result<u64, RepositoryError> {
    let mut tx = conn.begin().await?;
    let mut inserted = 0;

    for wait_time in batch {
        inserted += sqlx::query(
            "INSERT INTO wait_times (branch_id, appt, non_appt, timestamp) VALUES (?, ?, ?, ?)",
        )
        .bind(wait_time.branch_id)
        .bind(wait_time.appt)
        .bind(wait_time.non_appt)
        .bind(wait_time.timestamp)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    }

    tx.commit().await?;
    Ok(inserted)
}

pub async fn wait_times_by_branch<'e, E>(
    executor: E,
    number: i64,
) -> Result<Vec<WaitTime>, RepositoryError>
where
    E: SqliteExecutor<'e>,
{
    let wait_times = sqlx::query_as(
        r#"
        SELECT branch_id, appt, non_appt, timestamp
        FROM wait_times
        WHERE branch_id = ?
        ORDER BY timestamp, id
        "#,
    )
    .bind(number)
    .fetch_all(executor)
    .await?;

    Ok(wait_times)
}

/// All rows captured at exactly `timestamp`, i.e. one snapshot of every office
pub async fn wait_times_by_date<'e, E>(
    executor: E,
    timestamp: NaiveDateTime,
) -> Result<Vec<WaitTime>, RepositoryError>
where
    E: SqliteExecutor<'e>,
{
    let wait_times = sqlx::query_as(
        r#"
        SELECT branch_id, appt, non_appt, timestamp
        FROM wait_times
        WHERE timestamp = ?
        ORDER BY id
        "#,
    )
    .bind(timestamp)
    .fetch_all(executor)
    .await?;

    Ok(wait_times)
}

/// Wait times of every branch in `region`; rows for unknown branches never match
pub async fn wait_times_by_region<'e, E>(
    executor: E,
    region: i64,
) -> Result<Vec<WaitTime>, RepositoryError>
where
    E: SqliteExecutor<'e>,
{
    let wait_times = sqlx::query_as(
        r#"
        SELECT w.branch_id, w.appt, w.non_appt, w.timestamp
        FROM wait_times w
        INNER JOIN branches b ON b.number = w.branch_id
        WHERE b.region = ?
        ORDER BY w.timestamp, w.id
        "#,
    )
    .bind(region)
    .fetch_all(executor)
    .await?;

    Ok(wait_times)
}

/// Add `hours` to the timestamp of every stored wait time
///
/// Maintenance only, for correcting a systematic clock or timezone error.
/// The whole table is rewritten in one transaction.
pub async fn shift_timestamps(
    conn: &mut SqliteConnection,
    hours: i64,
) -> Result<u64, RepositoryError> {
    let mut tx = conn.begin().await?;

    let rows: Vec<(i64, NaiveDateTime)> =
        sqlx::query_as("SELECT id, timestamp FROM wait_times ORDER BY id")
            .fetch_all(&mut *tx)
            .await?;

    warn!(rows = rows.len(), hours, "Shifting every wait time timestamp");

    let delta = TimeDelta::try_hours(hours);
    for (id, timestamp) in &rows {
        let shifted = delta
            .and_then(|delta| timestamp.checked_add_signed(delta))
            .ok_or(RepositoryError::TimestampOutOfRange {
                timestamp: *timestamp,
                hours,
            })?;

        sqlx::query("UPDATE wait_times SET timestamp = ? WHERE id = ?")
            .bind(shifted)
            .bind(*id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    info!(rows = rows.len(), hours, "Shifted wait time timestamps");

    Ok(rows.len() as u64)
}
