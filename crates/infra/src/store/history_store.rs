//! Append-only price history.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use farewatch_core::{Observation, TrackedJobId};

use super::StoreError;

/// Append-only log of observations, partitioned by job.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append one observation. Observations are never modified afterwards.
    async fn insert(&self, observation: &Observation) -> Result<(), StoreError>;

    /// All observations for a job, ascending by timestamp.
    async fn list_for_job(&self, job_id: TrackedJobId) -> Result<Vec<Observation>, StoreError>;
}

#[async_trait]
impl<S> HistoryStore for Arc<S>
where
    S: HistoryStore + ?Sized,
{
    async fn insert(&self, observation: &Observation) -> Result<(), StoreError> {
        (**self).insert(observation).await
    }

    async fn list_for_job(&self, job_id: TrackedJobId) -> Result<Vec<Observation>, StoreError> {
        (**self).list_for_job(job_id).await
    }
}

/// In-memory history store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryHistoryStore {
    partitions: RwLock<HashMap<TrackedJobId, Vec<Observation>>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Total number of observations across all jobs.
    pub fn len(&self) -> usize {
        self.partitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn insert(&self, observation: &Observation) -> Result<(), StoreError> {
        let mut partitions = self.partitions.write().unwrap_or_else(PoisonError::into_inner);
        let partition = partitions.entry(observation.job_id).or_default();

        if partition.iter().any(|o| o.id == observation.id) {
            return Err(StoreError::AlreadyExists(observation.id.to_string()));
        }

        // Keep the partition sorted; ties keep insertion order.
        let pos = partition.partition_point(|o| o.timestamp <= observation.timestamp);
        partition.insert(pos, observation.clone());
        Ok(())
    }

    async fn list_for_job(&self, job_id: TrackedJobId) -> Result<Vec<Observation>, StoreError> {
        let partitions = self.partitions.read().unwrap_or_else(PoisonError::into_inner);
        Ok(partitions.get(&job_id).cloned().unwrap_or_default())
    }
}
