//! Job and history storage boundaries.
//!
//! Both stores are injected into the tick runner; neither is ambient state.
//! In-memory implementations back tests and local runs, Postgres backs
//! production.

pub mod history_store;
pub mod job_store;
pub mod postgres;

pub use history_store::{HistoryStore, InMemoryHistoryStore};
pub use job_store::{InMemoryJobStore, JobFilter, JobPatch, JobStore};
pub use postgres::{PostgresHistoryStore, PostgresJobStore};

use farewatch_core::TrackedJobId;

/// Store operation error.
///
/// `Unavailable` covers connectivity problems (pool exhausted, I/O, closed
/// connections) and is the only variant worth retrying.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("job not found: {0}")]
    NotFound(TrackedJobId),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}
