//! Infrastructure layer: stores, price fetching, tick execution, scheduling.

pub mod config;
pub mod fetcher;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod tick;

pub use config::{ConfigError, SchedulerConfig, StoreBackend};
pub use fetcher::{FetchError, MockPriceFetcher, PriceFetcher};
pub use retry::{RetryPolicy, retry_transient};
pub use scheduler::{LoopStats, SchedulerHandle, SchedulingLoop};
pub use store::{
    HistoryStore, InMemoryHistoryStore, InMemoryJobStore, JobFilter, JobPatch, JobStore,
    PostgresHistoryStore, PostgresJobStore, StoreError,
};
pub use tick::{CheckOutcome, JobReport, TickConfig, TickError, TickReport, TickRunner, TickSummary};
