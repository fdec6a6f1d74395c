use chrono::{NaiveDateTime, Utc};
use sqlx::SqlitePool;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::db::{branches, wait_times, RepositoryError};
use crate::feed::{self, FeedFormatError};
use crate::models::{BranchInfo, UpsertOutcome};
use crate::normalize::normalize;
use crate::providers::dmv::{DmvClient, FeedError};

/// Stage of an ingestion run; a run that stops early is `Failed` at that stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Fetching,
    Parsing,
    Normalizing,
    Persisting,
    Done,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStage::Fetching => "fetching",
            RunStage::Parsing => "parsing",
            RunStage::Normalizing => "normalizing",
            RunStage::Persisting => "persisting",
            RunStage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Outcome of a successful ingestion run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub captured_at: NaiveDateTime,
    pub rows_parsed: usize,
    pub rows_skipped: usize,
    pub rows_persisted: u64,
    pub negative_values: usize,
    /// Distinct branch numbers with no matching row in `branches`
    pub unknown_branches: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchSyncReport {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
}

/// Runs the fetch → parse → normalize → persist pipeline
///
/// Runs never overlap: `run_once` and `sync_branches` share one lock, so a
/// slow run delays the next one instead of racing it.
pub struct Ingestor {
    pool: SqlitePool,
    client: DmvClient,
    run_lock: Mutex<()>,
}

impl Ingestor {
    pub fn new(pool: SqlitePool, client: DmvClient) -> Self {
        Self {
            pool,
            client,
            run_lock: Mutex::new(()),
        }
    }

    /// One ingestion run. Nothing is persisted unless every stage succeeds.
    pub async fn run_once(&self) -> Result<RunReport, SyncError> {
        let _guard = self.run_lock.lock().await;

        // One timestamp for the whole snapshot
        let captured_at = Utc::now().naive_utc();
        info!(%captured_at, "Starting wait time ingestion");

        match self.ingest(captured_at).await {
            Ok(report) => {
                info!(
                    stage = %RunStage::Done,
                    rows = report.rows_persisted,
                    skipped = report.rows_skipped,
                    negative_values = report.negative_values,
                    unknown_branches = report.unknown_branches,
                    "Completed wait time ingestion"
                );
                Ok(report)
            }
            Err(e) => {
                if e.is_transient() {
                    warn!(stage = %e.stage(), error = %e, "Ingestion failed, next run will retry");
                } else {
                    error!(stage = %e.stage(), error = %e, alert = true, "Ingestion failed");
                }
                Err(e)
            }
        }
    }

    async fn ingest(&self, captured_at: NaiveDateTime) -> Result<RunReport, SyncError> {
        debug!(stage = %RunStage::Fetching, "Fetching wait times");
        let raw = self.client.fetch_wait_times().await?;

        debug!(stage = %RunStage::Parsing, bytes = raw.len(), "Parsing wait time feed");
        let feed = feed::parse_feed(&raw)?;

        debug!(stage = %RunStage::Normalizing, rows = feed.rows.len(), "Normalizing wait times");
        let records = normalize(&feed.rows, captured_at);
        let negative_values = records.iter().filter(|w| w.has_negative_wait()).count();

        debug!(stage = %RunStage::Persisting, rows = records.len(), "Persisting wait times");
        // Dropping the transaction on any error below rolls the run back
        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;

        let numbers: BTreeSet<i64> = records.iter().map(|w| w.branch_id).collect();
        let mut unknown_branches = 0;
        for number in numbers {
            if !branches::branch_exists(&mut *tx, number).await? {
                debug!(branch = number, "Wait time for branch without metadata");
                unknown_branches += 1;
            }
        }

        let rows_persisted = wait_times::insert_wait_times(&mut tx, &records).await?;
        tx.commit().await.map_err(RepositoryError::from)?;

        Ok(RunReport {
            captured_at,
            rows_parsed: feed.rows.len(),
            rows_skipped: feed.skipped.len(),
            rows_persisted,
            negative_values,
            unknown_branches,
        })
    }

    /// Fetch office metadata and upsert every branch in one transaction
    pub async fn sync_branches(&self) -> Result<BranchSyncReport, SyncError> {
        let _guard = self.run_lock.lock().await;
        info!("Starting branch metadata sync");

        let offices = self.client.fetch_offices().await.inspect_err(|e| {
            warn!(error = %e, "Failed to fetch office metadata");
        })?;

        let mut report = BranchSyncReport::default();
        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;

        for office in &offices {
            let info = match BranchInfo::try_from(office) {
                Ok(info) => info,
                Err(e) => {
                    warn!(office = %office.name, error = %e, "Skipping office with invalid metadata");
                    report.skipped += 1;
                    continue;
                }
            };

            match branches::upsert_branch(&mut tx, &info).await? {
                UpsertOutcome::Inserted => report.inserted += 1,
                UpsertOutcome::Updated => report.updated += 1,
                UpsertOutcome::Unchanged => report.unchanged += 1,
            }
        }

        tx.commit().await.map_err(RepositoryError::from)?;

        info!(
            offices = offices.len(),
            inserted = report.inserted,
            updated = report.updated,
            unchanged = report.unchanged,
            skipped = report.skipped,
            "Completed branch metadata sync"
        );
        Ok(report)
    }

    /// Run ingestion every `period`, forever
    pub async fn start(self: Arc<Self>, period: Duration) {
        info!(period_secs = period.as_secs(), "Starting wait time scheduler");

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut consecutive_failures = 0u32;
        loop {
            interval.tick().await;
            match self.run_once().await {
                Ok(_) => consecutive_failures = 0,
                Err(_) => {
                    consecutive_failures += 1;
                    if consecutive_failures > 1 {
                        warn!(consecutive_failures, "Wait time ingestion keeps failing");
                    }
                }
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FeedError),
    #[error("Feed format error: {0}")]
    Format(#[from] FeedFormatError),
    #[error("Persistence failed: {0}")]
    Persist(#[from] RepositoryError),
}

impl SyncError {
    pub fn stage(&self) -> RunStage {
        match self {
            SyncError::Fetch(_) => RunStage::Fetching,
            SyncError::Format(_) => RunStage::Parsing,
            SyncError::Persist(_) => RunStage::Persisting,
        }
    }

    /// Upstream hiccups; anything else needs attention
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Fetch(e) => e.is_transient(),
            SyncError::Format(_) | SyncError::Persist(_) => false,
        }
    }
}
