//! `farewatch-core`: domain types for price-watch jobs.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! job and observation models, identifiers, and the due-job selector.

pub mod error;
pub mod id;
pub mod job;
pub mod observation;
pub mod selector;

pub use error::{DomainError, DomainResult};
pub use id::{ObservationId, TrackedJobId};
pub use job::{DEFAULT_INTERVAL_MINUTES, JobRecord, JobStatus, TrackedJob};
pub use observation::{Observation, Price};
pub use selector::{is_due, select_due};
