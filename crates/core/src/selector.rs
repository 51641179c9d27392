//! Due-job selection.
//!
//! Pure functions over a job set and a reference instant. Nothing here reads a
//! clock: callers capture `now` once per tick and pass it in, so selection and
//! the timestamps written afterwards agree on the same instant.

use chrono::{DateTime, Utc};

use crate::job::{JobStatus, TrackedJob};

/// Whether `job` must be checked at `now`.
///
/// Due iff the job is active, `now` lies in `[tracking_start_date,
/// departure_date)`, and either it was never checked or `now` has reached
/// `last_checked_timestamp + interval` (inclusive).
pub fn is_due(job: &TrackedJob, now: DateTime<Utc>) -> bool {
    if job.status != JobStatus::Active || !job.window_contains(now) {
        return false;
    }

    match job.next_check_at() {
        None => true,
        Some(next) => now >= next,
    }
}

/// Select the jobs due at `now`, preserving input order.
pub fn select_due(jobs: &[TrackedJob], now: DateTime<Utc>) -> Vec<&TrackedJob> {
    jobs.iter().filter(|job| is_due(job, now)).collect()
}
