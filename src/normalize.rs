use chrono::NaiveDateTime;
use tracing::warn;

use crate::feed::FeedRow;
use crate::models::WaitTime;

/// Turn parsed rows into wait times that all share `captured_at`
///
/// Negative waits are an upstream anomaly: they are kept as-is and logged.
pub fn normalize(rows: &[FeedRow], captured_at: NaiveDateTime) -> Vec<WaitTime> {
    rows.iter()
        .map(|row| {
            let wait_time = WaitTime {
                branch_id: row.branch_number,
                appt: row.appt,
                non_appt: row.non_appt,
                timestamp: captured_at,
            };
            if wait_time.has_negative_wait() {
                warn!(
                    branch = row.branch_number,
                    appt = row.appt,
                    non_appt = row.non_appt,
                    "Negative wait time reported upstream"
                );
            }
            wait_time
        })
        .collect()
}
