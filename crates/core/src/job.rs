//! Tracked job model: one watched route with its time window and polling interval.

use core::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::id::TrackedJobId;

/// Polling interval used when a job does not specify one (one day).
pub const DEFAULT_INTERVAL_MINUTES: u32 = 1440;

/// Lifecycle status of a tracked job.
///
/// Only `Active` jobs are ever checked. Other states are terminal as far as
/// the scheduler is concerned; it never moves a job between them.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Active,
    Inactive,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Active => "ACTIVE",
            JobStatus::Inactive => "INACTIVE",
        }
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(JobStatus::Active),
            "INACTIVE" => Ok(JobStatus::Inactive),
            other => Err(DomainError::validation(format!("unknown job status `{other}`"))),
        }
    }
}

/// A job record as persisted by the job store.
///
/// Records are written by collaborators outside the scheduler (the API, the
/// seeding tool), so every field except the id may be missing or hold an
/// unexpected value. Convert with `TrackedJob::try_from` before scheduling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: TrackedJobId,
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub tracking_start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub departure_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tracking_interval_minutes: Option<i64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub last_checked_timestamp: Option<DateTime<Utc>>,
}

/// A validated job, ready for due-ness evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedJob {
    pub id: TrackedJobId,
    pub origin: String,
    pub destination: String,
    /// Never checked before this instant.
    pub tracking_start_date: DateTime<Utc>,
    /// Never checked at or after this instant.
    pub departure_date: DateTime<Utc>,
    pub interval_minutes: u32,
    pub status: JobStatus,
    /// Checkpoint: instant of the most recent successful check.
    pub last_checked_timestamp: Option<DateTime<Utc>>,
}

impl TrackedJob {
    /// Create a new active job with the default interval and no checkpoint.
    pub fn new(
        origin: impl Into<String>,
        destination: impl Into<String>,
        tracking_start_date: DateTime<Utc>,
        departure_date: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TrackedJobId::new(),
            origin: origin.into(),
            destination: destination.into(),
            tracking_start_date,
            departure_date,
            interval_minutes: DEFAULT_INTERVAL_MINUTES,
            status: JobStatus::Active,
            last_checked_timestamp: None,
        }
    }

    pub fn with_interval_minutes(mut self, minutes: u32) -> Self {
        self.interval_minutes = minutes;
        self
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_last_checked(mut self, at: DateTime<Utc>) -> Self {
        self.last_checked_timestamp = Some(at);
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::minutes(i64::from(self.interval_minutes))
    }

    /// Whether `now` falls inside `[tracking_start_date, departure_date)`.
    pub fn window_contains(&self, now: DateTime<Utc>) -> bool {
        self.tracking_start_date <= now && now < self.departure_date
    }

    /// Earliest instant the next check may happen.
    ///
    /// `None` when the job was never checked. Saturates to the maximum
    /// representable instant instead of overflowing.
    pub fn next_check_at(&self) -> Option<DateTime<Utc>> {
        self.last_checked_timestamp.map(|last| {
            last.checked_add_signed(self.interval())
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
        })
    }

    /// `origin->destination`, used in log lines.
    pub fn route(&self) -> String {
        format!("{}->{}", self.origin, self.destination)
    }
}

impl TryFrom<JobRecord> for TrackedJob {
    type Error = DomainError;

    fn try_from(record: JobRecord) -> Result<Self, Self::Error> {
        let origin = record.origin.ok_or(DomainError::missing("origin"))?;
        let destination = record.destination.ok_or(DomainError::missing("destination"))?;
        let tracking_start_date = record
            .tracking_start_date
            .ok_or(DomainError::missing("trackingStartDate"))?;
        let departure_date = record
            .departure_date
            .ok_or(DomainError::missing("departureDate"))?;
        let status: JobStatus = record.status.ok_or(DomainError::missing("status"))?.parse()?;

        let interval_minutes = match record.tracking_interval_minutes {
            None => DEFAULT_INTERVAL_MINUTES,
            Some(m) if m > 0 => u32::try_from(m).map_err(|_| {
                DomainError::validation(format!("trackingIntervalMinutes {m} is out of range"))
            })?,
            Some(m) => {
                return Err(DomainError::validation(format!(
                    "trackingIntervalMinutes must be positive, got {m}"
                )));
            }
        };

        Ok(Self {
            id: record.id,
            origin,
            destination,
            tracking_start_date,
            departure_date,
            interval_minutes,
            status,
            last_checked_timestamp: record.last_checked_timestamp,
        })
    }
}

impl From<TrackedJob> for JobRecord {
    fn from(job: TrackedJob) -> Self {
        Self {
            id: job.id,
            origin: Some(job.origin),
            destination: Some(job.destination),
            tracking_start_date: Some(job.tracking_start_date),
            departure_date: Some(job.departure_date),
            tracking_interval_minutes: Some(i64::from(job.interval_minutes)),
            status: Some(job.status.as_str().to_string()),
            last_checked_timestamp: job.last_checked_timestamp,
        }
    }
}
