use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// A DMV office as stored in the `branches` table
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema, FromRow)]
pub struct Branch {
    /// DMV designated branch number
    pub number: i64,
    pub region: i64,
    pub name: String,
    pub address: String,
    /// Weekly schedule, one `HHMM-HHMM` (or `n` when closed) entry per day starting Monday
    pub hours: String,
    pub latitude: f64,
    pub longitude: f64,
    pub nearby1: Option<i64>,
    pub nearby2: Option<i64>,
    pub nearby3: Option<i64>,
    pub nearby4: Option<i64>,
    pub nearby5: Option<i64>,
    pub updated_at: NaiveDateTime,
}

/// Mutable branch metadata, keyed by `number` when upserting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct BranchInfo {
    pub number: i64,
    pub region: i64,
    pub name: String,
    pub address: String,
    pub hours: String,
    pub latitude: f64,
    pub longitude: f64,
    pub nearby1: Option<i64>,
    pub nearby2: Option<i64>,
    pub nearby3: Option<i64>,
    pub nearby4: Option<i64>,
    pub nearby5: Option<i64>,
}

impl Branch {
    pub fn info(&self) -> BranchInfo {
        BranchInfo {
            number: self.number,
            region: self.region,
            name: self.name.clone(),
            address: self.address.clone(),
            hours: self.hours.clone(),
            latitude: self.latitude,
            longitude: self.longitude,
            nearby1: self.nearby1,
            nearby2: self.nearby2,
            nearby3: self.nearby3,
            nearby4: self.nearby4,
            nearby5: self.nearby5,
        }
    }
}

/// One observation of a branch's queue
///
/// Every row written by a single ingestion run carries the same `timestamp`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema, FromRow)]
pub struct WaitTime {
    /// Branch number; not required to exist in `branches`
    pub branch_id: i64,
    /// Appointment wait in minutes
    pub appt: i64,
    /// Walk-in wait in minutes
    pub non_appt: i64,
    pub timestamp: NaiveDateTime,
}

impl WaitTime {
    pub fn has_negative_wait(&self) -> bool {
        self.appt < 0 || self.non_appt < 0
    }
}

/// What `upsert_branch` did with its input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::BranchInfo;

    pub fn santa_ana() -> BranchInfo {
        BranchInfo {
            number: 542,
            region: 7,
            name: "Santa Ana".to_string(),
            address: "1330 E. First Street, Santa Ana, CA 92701".to_string(),
            hours: "0700-1700,0700-1700,0900-1700,0700-1700,0700-1700,n,n".to_string(),
            latitude: 33.7454,
            longitude: -117.8506,
            nearby1: Some(698),
            nearby2: Some(611),
            nearby3: Some(628),
            nearby4: Some(607),
            nearby5: None,
        }
    }

    pub fn south_lake_tahoe() -> BranchInfo {
        BranchInfo {
            number: 537,
            region: 1,
            name: "South Lake Tahoe".to_string(),
            address: "3344 B Lake Tahoe Boulevard, South Lake Tahoe, CA 96150".to_string(),
            hours: "0800-1700,0800-1700,0900-1700,0800-1700,0800-1700,n,n".to_string(),
            latitude: 38.945748,
            longitude: -119.96989,
            nearby1: None,
            nearby2: None,
            nearby3: None,
            nearby4: None,
            nearby5: None,
        }
    }
}
