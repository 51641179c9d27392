//! Periodic driver for the tick runner.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::fetcher::PriceFetcher;
use crate::store::{HistoryStore, JobStore};
use crate::tick::{TickRunner, TickSummary};

/// Scheduling loop configuration.
#[derive(Debug, Clone)]
pub struct SchedulingLoop {
    /// Time between tick starts.
    pub period: Duration,
    /// Name for logging.
    pub name: String,
}

impl Default for SchedulingLoop {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(30),
            name: "price-scheduler".to_string(),
        }
    }
}

/// Loop runtime statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoopStats {
    pub ticks_completed: u64,
    pub ticks_failed: u64,
    pub observations_recorded: u64,
    pub fetch_failures: u64,
    pub store_failures: u64,
    pub malformed_records: u64,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub last_summary: Option<TickSummary>,
}

impl LoopStats {
    fn record(&mut self, at: DateTime<Utc>, summary: TickSummary) {
        self.ticks_completed += 1;
        self.observations_recorded += summary.recorded as u64;
        self.fetch_failures += summary.fetch_failures as u64;
        self.store_failures += summary.store_failures as u64;
        self.malformed_records += summary.malformed as u64;
        self.last_tick_at = Some(at);
        self.last_summary = Some(summary);
    }
}

/// Handle to control a running scheduling loop.
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    trigger: mpsc::Sender<()>,
    join: Option<JoinHandle<()>>,
    stats: Arc<Mutex<LoopStats>>,
}

impl SchedulerHandle {
    /// Request a tick now.
    ///
    /// Triggers are coalesced: if a tick is already queued this is a no-op.
    /// A trigger that arrives while a tick runs is served right after it.
    pub fn trigger(&self) {
        let _ = self.trigger.try_send(());
    }

    /// Current loop statistics.
    pub fn stats(&self) -> LoopStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stop scheduling new ticks and wait for the loop to exit.
    ///
    /// An in-flight tick is allowed to finish. Returns the final statistics.
    pub async fn shutdown(mut self) -> LoopStats {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                error!(error = %e, "scheduler task ended abnormally");
            }
        }
        self.stats()
    }
}

impl SchedulingLoop {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            ..Self::default()
        }
    }

    /// Spawn the loop on the current tokio runtime.
    ///
    /// - Runs a tick immediately, then every `period`
    /// - Ticks never overlap; periods missed by a slow tick are skipped
    /// - Failed ticks are logged and counted; the loop keeps going
    pub fn spawn<J, H, F>(&self, runner: Arc<TickRunner<J, H, F>>) -> SchedulerHandle
    where
        J: JobStore + 'static,
        H: HistoryStore + 'static,
        F: PriceFetcher + 'static,
    {
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (trigger_tx, trigger_rx) = mpsc::channel::<()>(1);
        let stats = Arc::new(Mutex::new(LoopStats::default()));

        let join = tokio::spawn(scheduler_loop(
            self.clone(),
            runner,
            shutdown_rx,
            trigger_rx,
            stats.clone(),
        ));

        SchedulerHandle {
            shutdown: Some(shutdown_tx),
            trigger: trigger_tx,
            join: Some(join),
            stats,
        }
    }
}

async fn scheduler_loop<J, H, F>(
    cfg: SchedulingLoop,
    runner: Arc<TickRunner<J, H, F>>,
    mut shutdown_rx: oneshot::Receiver<()>,
    mut trigger_rx: mpsc::Receiver<()>,
    stats: Arc<Mutex<LoopStats>>,
) where
    J: JobStore,
    H: HistoryStore,
    F: PriceFetcher,
{
    let period = cfg.period.max(Duration::from_millis(1));
    info!(scheduler = %cfg.name, period_secs = period.as_secs_f64(), "scheduler started");

    // The first tick completes immediately.
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown_rx => break,
            _ = interval.tick() => {}
            Some(()) = trigger_rx.recv() => {
                debug!(scheduler = %cfg.name, "tick triggered");
            }
        }

        match runner.run_tick().await {
            Ok(report) => {
                let summary = report.summary();
                stats
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .record(report.now, summary);
            }
            Err(e) => {
                warn!(scheduler = %cfg.name, error = %e, "tick failed");
                stats
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .ticks_failed += 1;
            }
        }
    }

    info!(scheduler = %cfg.name, "scheduler stopped");
}
