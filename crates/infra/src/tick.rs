//! One scheduling cycle: select due jobs, fetch, record, checkpoint.
//!
//! Per job the sequence is: fetch a price, append the observation to history,
//! then advance the job's `lastCheckedTimestamp`. The two writes are separate
//! store calls. If the checkpoint write fails after the append succeeded the
//! job stays due and is checked again on the next tick: jobs may be
//! over-checked, never silently skipped.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use farewatch_core::{DomainError, JobRecord, Observation, TrackedJob, TrackedJobId, select_due};

use crate::fetcher::{FetchError, PriceFetcher};
use crate::retry::{RetryPolicy, retry_transient};
use crate::store::{HistoryStore, JobFilter, JobPatch, JobStore, StoreError};

/// Tick runner configuration.
#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Upper bound on a single fetch.
    pub fetch_timeout: Duration,
    /// Retry policy for store calls.
    pub store_retry: RetryPolicy,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(10),
            store_retry: RetryPolicy::default(),
        }
    }
}

/// Outcome of checking one job.
#[derive(Debug, Clone)]
pub enum CheckOutcome {
    /// Observation appended and checkpoint advanced.
    Recorded(Observation),
    /// Fetch failed or timed out; nothing written.
    FetchFailed(FetchError),
    /// History append failed; checkpoint untouched.
    RecordFailed(StoreError),
    /// Observation appended but the checkpoint write failed.
    CheckpointFailed {
        observation: Observation,
        error: StoreError,
    },
    /// Record could not be turned into a job; skipped.
    Malformed(DomainError),
}

impl CheckOutcome {
    /// The observation written to history, if any.
    pub fn observation(&self) -> Option<&Observation> {
        match self {
            CheckOutcome::Recorded(o) | CheckOutcome::CheckpointFailed { observation: o, .. } => {
                Some(o)
            }
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CheckOutcome::Recorded(_))
    }
}

/// Per-job entry in a tick report.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub job_id: TrackedJobId,
    pub outcome: CheckOutcome,
}

/// Everything that happened during one tick.
#[derive(Debug, Clone)]
pub struct TickReport {
    /// The single instant used for selection and every timestamp written.
    pub now: DateTime<Utc>,
    /// Records returned by the job store.
    pub considered: usize,
    /// Jobs selected as due.
    pub due: usize,
    pub jobs: Vec<JobReport>,
}

/// Counters derived from a `TickReport`, suitable for logs and stats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickSummary {
    pub considered: usize,
    pub due: usize,
    pub recorded: usize,
    pub fetch_failures: usize,
    pub store_failures: usize,
    pub malformed: usize,
}

impl TickReport {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            now,
            considered: 0,
            due: 0,
            jobs: Vec::new(),
        }
    }

    fn push(&mut self, job_id: TrackedJobId, outcome: CheckOutcome) {
        self.jobs.push(JobReport { job_id, outcome });
    }

    pub fn outcome_for(&self, job_id: TrackedJobId) -> Option<&CheckOutcome> {
        self.jobs
            .iter()
            .find(|r| r.job_id == job_id)
            .map(|r| &r.outcome)
    }

    /// Observations written to history during this tick.
    pub fn observations(&self) -> impl Iterator<Item = &Observation> {
        self.jobs.iter().filter_map(|r| r.outcome.observation())
    }

    pub fn summary(&self) -> TickSummary {
        let mut summary = TickSummary {
            considered: self.considered,
            due: self.due,
            ..TickSummary::default()
        };
        for report in &self.jobs {
            match &report.outcome {
                CheckOutcome::Recorded(_) => summary.recorded += 1,
                CheckOutcome::FetchFailed(_) => summary.fetch_failures += 1,
                CheckOutcome::RecordFailed(_) | CheckOutcome::CheckpointFailed { .. } => {
                    summary.store_failures += 1
                }
                CheckOutcome::Malformed(_) => summary.malformed += 1,
            }
        }
        summary
    }
}

/// A tick that could not run at all.
#[derive(Debug, thiserror::Error)]
pub enum TickError {
    #[error("failed to list jobs: {0}")]
    ListJobs(#[source] StoreError),
}

/// Runs ticks against injected stores and fetcher.
///
/// Ticks on one runner are serialized: a tick requested while another is in
/// progress waits for it to finish.
pub struct TickRunner<J, H, F> {
    jobs: J,
    history: H,
    fetcher: F,
    config: TickConfig,
    in_flight: Mutex<()>,
}

impl<J, H, F> TickRunner<J, H, F>
where
    J: JobStore,
    H: HistoryStore,
    F: PriceFetcher,
{
    pub fn new(jobs: J, history: H, fetcher: F, config: TickConfig) -> Self {
        Self {
            jobs,
            history,
            fetcher,
            config,
            in_flight: Mutex::new(()),
        }
    }

    /// Run one tick now.
    pub async fn run_tick(&self) -> Result<TickReport, TickError> {
        self.run_tick_at(Utc::now()).await
    }

    /// Run one tick using `now` for selection and for every timestamp written.
    #[instrument(skip_all, fields(now = %now))]
    pub async fn run_tick_at(&self, now: DateTime<Utc>) -> Result<TickReport, TickError> {
        let _guard = self.in_flight.lock().await;

        let filter = JobFilter::eligible_at(now);
        let records = retry_transient(&self.config.store_retry, "find_jobs", || {
            self.jobs.find(&filter)
        })
        .await
        .map_err(TickError::ListJobs)?;

        let mut report = TickReport::new(now);
        report.considered = records.len();

        let jobs = self.validate(records, &mut report);
        let due = select_due(&jobs, now);
        report.due = due.len();

        if due.is_empty() {
            debug!("no jobs are due for a price check");
            return Ok(report);
        }

        info!(due = due.len(), "found jobs to check");

        for job in due {
            let outcome = self.check_job(job, now).await;
            report.push(job.id, outcome);
        }

        let summary = report.summary();
        info!(
            recorded = summary.recorded,
            fetch_failures = summary.fetch_failures,
            store_failures = summary.store_failures,
            malformed = summary.malformed,
            "tick finished"
        );

        Ok(report)
    }

    fn validate(&self, records: Vec<JobRecord>, report: &mut TickReport) -> Vec<TrackedJob> {
        let mut jobs = Vec::with_capacity(records.len());
        for record in records {
            let id = record.id;
            match TrackedJob::try_from(record) {
                Ok(job) => jobs.push(job),
                Err(e) => {
                    warn!(job_id = %id, error = %e, "skipping malformed job record");
                    report.push(id, CheckOutcome::Malformed(e));
                }
            }
        }
        jobs
    }

    async fn check_job(&self, job: &TrackedJob, now: DateTime<Utc>) -> CheckOutcome {
        info!(job_id = %job.id, route = %job.route(), "checking price");

        let price = match tokio::time::timeout(self.config.fetch_timeout, self.fetcher.fetch(job)).await
        {
            Ok(Ok(price)) => price,
            Ok(Err(e)) => {
                warn!(job_id = %job.id, error = %e, "price fetch failed");
                return CheckOutcome::FetchFailed(e);
            }
            Err(_) => {
                let e = FetchError::TimedOut(self.config.fetch_timeout);
                warn!(job_id = %job.id, error = %e, "price fetch failed");
                return CheckOutcome::FetchFailed(e);
            }
        };

        let observation = Observation::new(job.id, now, price, self.fetcher.source());

        let mut attempts = 0u32;
        let appended = retry_transient(&self.config.store_retry, "insert_observation", || {
            attempts += 1;
            self.history.insert(&observation)
        })
        .await;
        match appended {
            Ok(()) => {}
            // An earlier attempt committed but its acknowledgement was lost.
            Err(StoreError::AlreadyExists(_)) if attempts > 1 => {
                warn!(
                    job_id = %job.id,
                    observation_id = %observation.id,
                    "observation already stored by an earlier attempt"
                );
            }
            Err(e) => {
                error!(job_id = %job.id, error = %e, "failed to record observation");
                return CheckOutcome::RecordFailed(e);
            }
        }

        if let Err(e) = retry_transient(&self.config.store_retry, "update_checkpoint", || {
            self.jobs.update(job.id, JobPatch::checkpoint(now))
        })
        .await
        {
            error!(
                job_id = %job.id,
                error = %e,
                "observation recorded but checkpoint not advanced; job will be re-checked"
            );
            return CheckOutcome::CheckpointFailed { observation, error: e };
        }

        info!(job_id = %job.id, price = %observation.price, "logged new price");
        CheckOutcome::Recorded(observation)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;

    use farewatch_core::{JobStatus, TrackedJob};

    use super::*;
    use crate::fetcher::testing::ScriptedFetcher;
    use crate::store::{InMemoryHistoryStore, InMemoryJobStore};

    type Runner = TickRunner<Arc<InMemoryJobStore>, Arc<InMemoryHistoryStore>, Arc<ScriptedFetcher>>;

    fn setup() -> (Runner, Arc<InMemoryJobStore>, Arc<InMemoryHistoryStore>, Arc<ScriptedFetcher>) {
        let jobs = InMemoryJobStore::arc();
        let history = InMemoryHistoryStore::arc();
        let fetcher = Arc::new(ScriptedFetcher::new());
        let config = TickConfig {
            fetch_timeout: Duration::from_secs(5),
            store_retry: RetryPolicy::fixed(2, Duration::from_millis(1)),
        };
        let runner = TickRunner::new(jobs.clone(), history.clone(), fetcher.clone(), config);
        (runner, jobs, history, fetcher)
    }

    fn hourly_job(now: DateTime<Utc>) -> TrackedJob {
        TrackedJob::new(
            "LHE",
            "JED",
            now - ChronoDuration::hours(1),
            now + ChronoDuration::hours(1),
        )
        .with_interval_minutes(60)
    }

    #[tokio::test]
    async fn empty_due_set_writes_nothing() {
        let (runner, jobs, history, fetcher) = setup();
        let now = Utc::now();
        let recent = hourly_job(now).with_last_checked(now - ChronoDuration::minutes(10));
        let id = jobs.insert(recent.clone().into()).await.unwrap();
        let before = jobs.get(id);

        let report = runner.run_tick_at(now).await.unwrap();

        assert_eq!(report.due, 0);
        assert!(report.jobs.is_empty());
        assert!(history.is_empty());
        assert!(fetcher.calls().is_empty());
        assert_eq!(jobs.get(id), before);
    }

    #[tokio::test]
    async fn records_and_checkpoints_with_the_tick_instant() {
        let (runner, jobs, history, _) = setup();
        let now = Utc::now();
        let id = jobs.insert(hourly_job(now).into()).await.unwrap();

        let report = runner.run_tick_at(now).await.unwrap();

        let observed = history.list_for_job(id).await.unwrap();
        assert_eq!(observed.len(), 1);
        assert_eq!(observed[0].timestamp, now);
        assert_eq!(observed[0].source, "ScriptedFetcher");
        assert_eq!(jobs.get(id).unwrap().last_checked_timestamp, Some(now));
        assert!(report.outcome_for(id).unwrap().is_success());
    }

    #[tokio::test]
    async fn malformed_records_are_skipped_and_reported() {
        let (runner, jobs, history, _) = setup();
        let now = Utc::now();

        let mut broken: JobRecord = hourly_job(now).into();
        broken.destination = None;
        let broken_id = jobs.insert(broken).await.unwrap();
        let good_id = jobs.insert(hourly_job(now).into()).await.unwrap();

        let report = runner.run_tick_at(now).await.unwrap();

        assert!(matches!(
            report.outcome_for(broken_id),
            Some(CheckOutcome::Malformed(DomainError::MissingField("destination")))
        ));
        assert!(report.outcome_for(good_id).unwrap().is_success());
        assert_eq!(history.len(), 1);
        assert_eq!(jobs.get(broken_id).unwrap().last_checked_timestamp, None);
        assert_eq!(report.summary().malformed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_fetch_times_out_without_blocking_other_jobs() {
        let (runner, jobs, history, fetcher) = setup();
        let now = Utc::now();
        let slow = jobs.insert(hourly_job(now).into()).await.unwrap();
        let fast = jobs.insert(hourly_job(now).into()).await.unwrap();
        fetcher.stall_for(slow);

        let report = runner.run_tick_at(now).await.unwrap();

        assert!(matches!(
            report.outcome_for(slow),
            Some(CheckOutcome::FetchFailed(FetchError::TimedOut(_)))
        ));
        assert!(report.outcome_for(fast).unwrap().is_success());
        assert!(history.list_for_job(slow).await.unwrap().is_empty());
        assert_eq!(jobs.get(slow).unwrap().last_checked_timestamp, None);
    }

    #[tokio::test]
    async fn concurrent_ticks_do_not_double_check_a_job() {
        let (runner, jobs, history, fetcher) = setup();
        let now = Utc::now();
        let id = jobs.insert(hourly_job(now).into()).await.unwrap();

        let (first, second) = tokio::join!(runner.run_tick_at(now), runner.run_tick_at(now));
        let recorded = first.unwrap().summary().recorded + second.unwrap().summary().recorded;

        assert_eq!(recorded, 1);
        assert_eq!(history.list_for_job(id).await.unwrap().len(), 1);
        assert_eq!(fetcher.calls(), vec![id]);
    }

    #[tokio::test]
    async fn inactive_jobs_are_left_alone() {
        let (runner, jobs, history, fetcher) = setup();
        let now = Utc::now();
        jobs.insert(hourly_job(now).with_status(JobStatus::Inactive).into())
            .await
            .unwrap();

        let report = runner.run_tick_at(now).await.unwrap();

        assert_eq!(report.considered, 0);
        assert!(history.is_empty());
        assert!(fetcher.calls().is_empty());
    }

    /// Job store whose listing fails a configurable number of times.
    struct FlakyListing {
        inner: InMemoryJobStore,
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl JobStore for FlakyListing {
        async fn insert(&self, record: JobRecord) -> Result<TrackedJobId, StoreError> {
            self.inner.insert(record).await
        }

        async fn find(&self, filter: &JobFilter) -> Result<Vec<JobRecord>, StoreError> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(StoreError::Unavailable("connection reset".to_string()));
            }
            self.inner.find(filter).await
        }

        async fn update(&self, id: TrackedJobId, patch: JobPatch) -> Result<(), StoreError> {
            self.inner.update(id, patch).await
        }
    }

    fn flaky_runner(failures: u32) -> TickRunner<FlakyListing, InMemoryHistoryStore, ScriptedFetcher> {
        let jobs = FlakyListing {
            inner: InMemoryJobStore::new(),
            failures_left: AtomicU32::new(failures),
        };
        let config = TickConfig {
            fetch_timeout: Duration::from_secs(5),
            store_retry: RetryPolicy::fixed(2, Duration::from_millis(1)),
        };
        TickRunner::new(jobs, InMemoryHistoryStore::new(), ScriptedFetcher::new(), config)
    }

    #[tokio::test]
    async fn transient_listing_failure_is_retried() {
        let runner = flaky_runner(2);
        let now = Utc::now();
        runner.jobs.insert(hourly_job(now).into()).await.unwrap();

        let report = runner.run_tick_at(now).await.unwrap();
        assert_eq!(report.summary().recorded, 1);
    }

    /// History store that commits the first append but reports it as failed.
    struct LostAck {
        inner: InMemoryHistoryStore,
        dropped: AtomicU32,
    }

    #[async_trait]
    impl HistoryStore for LostAck {
        async fn insert(&self, observation: &Observation) -> Result<(), StoreError> {
            self.inner.insert(observation).await?;
            if self.dropped.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(StoreError::Unavailable("connection reset after commit".to_string()));
            }
            Ok(())
        }

        async fn list_for_job(&self, job_id: TrackedJobId) -> Result<Vec<Observation>, StoreError> {
            self.inner.list_for_job(job_id).await
        }
    }

    #[tokio::test]
    async fn lost_append_acknowledgement_still_counts_as_recorded() {
        let jobs = InMemoryJobStore::arc();
        let history = Arc::new(LostAck {
            inner: InMemoryHistoryStore::new(),
            dropped: AtomicU32::new(0),
        });
        let config = TickConfig {
            fetch_timeout: Duration::from_secs(5),
            store_retry: RetryPolicy::fixed(2, Duration::from_millis(1)),
        };
        let runner = TickRunner::new(jobs.clone(), history.clone(), ScriptedFetcher::new(), config);
        let now = Utc::now();
        let id = jobs.insert(hourly_job(now).into()).await.unwrap();

        let report = runner.run_tick_at(now).await.unwrap();

        assert!(report.outcome_for(id).unwrap().is_success());
        assert_eq!(report.observations().count(), 1);
        assert_eq!(history.inner.len(), 1);
        assert_eq!(jobs.get(id).unwrap().last_checked_timestamp, Some(now));

        let next = runner.run_tick_at(now + ChronoDuration::minutes(1)).await.unwrap();
        assert_eq!(next.summary().recorded, 0);
        assert_eq!(history.inner.len(), 1);
    }

    /// History store that refuses every append as a duplicate.
    struct DuplicateHistory;

    #[async_trait]
    impl HistoryStore for DuplicateHistory {
        async fn insert(&self, observation: &Observation) -> Result<(), StoreError> {
            Err(StoreError::AlreadyExists(observation.id.to_string()))
        }

        async fn list_for_job(&self, _job_id: TrackedJobId) -> Result<Vec<Observation>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn duplicate_on_first_attempt_is_a_record_failure() {
        let jobs = InMemoryJobStore::arc();
        let config = TickConfig {
            fetch_timeout: Duration::from_secs(5),
            store_retry: RetryPolicy::fixed(2, Duration::from_millis(1)),
        };
        let runner = TickRunner::new(jobs.clone(), DuplicateHistory, ScriptedFetcher::new(), config);
        let now = Utc::now();
        let id = jobs.insert(hourly_job(now).into()).await.unwrap();

        let report = runner.run_tick_at(now).await.unwrap();

        assert!(matches!(
            report.outcome_for(id),
            Some(CheckOutcome::RecordFailed(StoreError::AlreadyExists(_)))
        ));
        assert_eq!(jobs.get(id).unwrap().last_checked_timestamp, None);
    }

    #[tokio::test]
    async fn exhausted_listing_retries_fail_the_tick() {
        let runner = flaky_runner(10);
        let err = runner.run_tick_at(Utc::now()).await.unwrap_err();
        assert!(matches!(err, TickError::ListJobs(StoreError::Unavailable(_))));
    }
}
