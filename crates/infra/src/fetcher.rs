//! Price fetching capability.
//!
//! The tick runner only sees the `PriceFetcher` trait. `MockPriceFetcher`
//! stands in for the real fare source; a network-backed fetcher is a drop-in
//! replacement.

use std::ops::RangeInclusive;
use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;

use farewatch_core::{DomainError, DomainResult, Price, TrackedJob};

/// Failure to obtain a price for one job.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("price source unavailable: {0}")]
    Unavailable(String),
    #[error("no price for route {0}")]
    NoQuote(String),
    #[error("fetch timed out after {0:?}")]
    TimedOut(std::time::Duration),
}

/// Source of current prices for tracked jobs.
///
/// Implementations may be slow and may fail; the caller bounds each call with
/// a timeout.
#[async_trait]
pub trait PriceFetcher: Send + Sync {
    /// Name recorded as the observation `source`.
    fn source(&self) -> &str;

    async fn fetch(&self, job: &TrackedJob) -> Result<Price, FetchError>;
}

#[async_trait]
impl<F> PriceFetcher for Arc<F>
where
    F: PriceFetcher + ?Sized,
{
    fn source(&self) -> &str {
        (**self).source()
    }

    async fn fetch(&self, job: &TrackedJob) -> Result<Price, FetchError> {
        (**self).fetch(job).await
    }
}

/// Returns a uniformly random whole-cent price in a fixed range.
#[derive(Debug, Clone)]
pub struct MockPriceFetcher {
    cents: RangeInclusive<i64>,
    currency: String,
}

impl MockPriceFetcher {
    pub const SOURCE: &'static str = "MockFetcher";

    /// `range` is in major units (e.g. `500.0..=800.0` dollars), rounded to cents.
    pub fn new(range: RangeInclusive<f64>, currency: impl Into<String>) -> DomainResult<Self> {
        let (min, max) = range.into_inner();
        if !min.is_finite() || !max.is_finite() || min < 0.0 {
            return Err(DomainError::validation(format!(
                "mock price range {min}..={max} must be finite and non-negative"
            )));
        }
        let cents = (min * 100.0).round() as i64..=(max * 100.0).round() as i64;
        if cents.is_empty() {
            return Err(DomainError::validation(format!(
                "mock price range {min}..={max} is inverted"
            )));
        }
        Ok(Self {
            cents,
            currency: currency.into(),
        })
    }

    fn sample(&self) -> i64 {
        rand::thread_rng().gen_range(self.cents.clone())
    }
}

impl Default for MockPriceFetcher {
    fn default() -> Self {
        Self {
            cents: 50_000..=80_000,
            currency: "USD".to_string(),
        }
    }
}

#[async_trait]
impl PriceFetcher for MockPriceFetcher {
    fn source(&self) -> &str {
        Self::SOURCE
    }

    async fn fetch(&self, _job: &TrackedJob) -> Result<Price, FetchError> {
        Ok(Price::new(self.sample(), self.currency.clone()))
    }
}

/// Deterministic fetchers for tests.
#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use farewatch_core::TrackedJobId;

    use super::*;

    /// Fixed price for every job, except the ones told to fail or stall.
    #[derive(Debug, Default)]
    pub struct ScriptedFetcher {
        failing: Mutex<HashSet<TrackedJobId>>,
        stalling: Mutex<HashSet<TrackedJobId>>,
        calls: Mutex<Vec<TrackedJobId>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    /// Decrements the in-flight counter even when the fetch future is dropped.
    struct InFlight<'a>(&'a AtomicUsize);

    impl Drop for InFlight<'_> {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl ScriptedFetcher {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn fail_for(&self, id: TrackedJobId) {
            self.failing.lock().unwrap().insert(id);
        }

        pub fn stall_for(&self, id: TrackedJobId) {
            self.stalling.lock().unwrap().insert(id);
        }

        pub fn calls(&self) -> Vec<TrackedJobId> {
            self.calls.lock().unwrap().clone()
        }

        /// Highest number of fetches observed running at the same time.
        pub fn max_in_flight(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PriceFetcher for ScriptedFetcher {
        fn source(&self) -> &str {
            "ScriptedFetcher"
        }

        async fn fetch(&self, job: &TrackedJob) -> Result<Price, FetchError> {
            self.calls.lock().unwrap().push(job.id);
            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(running, Ordering::SeqCst);
            let _in_flight = InFlight(&self.in_flight);

            if self.failing.lock().unwrap().contains(&job.id) {
                return Err(FetchError::Unavailable("scripted failure".to_string()));
            }
            let stall = self.stalling.lock().unwrap().contains(&job.id);
            if stall {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(Price::new(64_000, "USD"))
        }
    }
}
