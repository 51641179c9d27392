//! Job storage: the authoritative set of tracked jobs.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use farewatch_core::{JobRecord, JobStatus, TrackedJobId};

use super::StoreError;

/// Query filter for `JobStore::find`.
///
/// A record is excluded only when the relevant field is present and fails
/// the test. Records missing a field are still returned, so the caller can
/// report them as malformed instead of silently losing them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    /// Keep records whose `[trackingStartDate, departureDate)` contains this instant.
    pub window_open_at: Option<DateTime<Utc>>,
}

impl JobFilter {
    /// All records.
    pub fn all() -> Self {
        Self::default()
    }

    /// Active records whose tracking window is open at `now`.
    pub fn eligible_at(now: DateTime<Utc>) -> Self {
        Self {
            status: Some(JobStatus::Active),
            window_open_at: Some(now),
        }
    }

    pub fn matches(&self, record: &JobRecord) -> bool {
        if let (Some(wanted), Some(actual)) = (self.status, record.status.as_deref()) {
            if actual != wanted.as_str() {
                return false;
            }
        }

        if let Some(at) = self.window_open_at {
            if record.tracking_start_date.is_some_and(|start| start > at) {
                return false;
            }
            if record.departure_date.is_some_and(|departure| departure <= at) {
                return false;
            }
        }

        true
    }
}

/// Update applied by `JobStore::update`.
///
/// The scheduler only ever advances a job's checkpoint; every other field is
/// owned by whoever created the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobPatch {
    pub last_checked_timestamp: DateTime<Utc>,
}

impl JobPatch {
    /// Advance the job checkpoint.
    pub fn checkpoint(at: DateTime<Utc>) -> Self {
        Self {
            last_checked_timestamp: at,
        }
    }

    fn apply(&self, record: &mut JobRecord) {
        record.last_checked_timestamp = Some(self.last_checked_timestamp);
    }
}

/// Job store abstraction.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job record.
    async fn insert(&self, record: JobRecord) -> Result<TrackedJobId, StoreError>;

    /// List records matching `filter`.
    async fn find(&self, filter: &JobFilter) -> Result<Vec<JobRecord>, StoreError>;

    /// Advance one job's checkpoint.
    async fn update(&self, id: TrackedJobId, patch: JobPatch) -> Result<(), StoreError>;
}

#[async_trait]
impl<S> JobStore for Arc<S>
where
    S: JobStore + ?Sized,
{
    async fn insert(&self, record: JobRecord) -> Result<TrackedJobId, StoreError> {
        (**self).insert(record).await
    }

    async fn find(&self, filter: &JobFilter) -> Result<Vec<JobRecord>, StoreError> {
        (**self).find(filter).await
    }

    async fn update(&self, id: TrackedJobId, patch: JobPatch) -> Result<(), StoreError> {
        (**self).update(id, patch).await
    }
}

/// In-memory job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<TrackedJobId, JobRecord>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Snapshot of one record.
    pub fn get(&self, id: TrackedJobId) -> Option<JobRecord> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, record: JobRecord) -> Result<TrackedJobId, StoreError> {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        if jobs.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists(record.id.to_string()));
        }
        let id = record.id;
        jobs.insert(id, record);
        Ok(id)
    }

    async fn find(&self, filter: &JobFilter) -> Result<Vec<JobRecord>, StoreError> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        let mut result: Vec<_> = jobs
            .values()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect();

        // UUIDv7 ids sort by creation time.
        result.sort_by_key(|record| record.id);
        Ok(result)
    }

    async fn update(&self, id: TrackedJobId, patch: JobPatch) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let record = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        patch.apply(record);
        Ok(())
    }
}
