use std::sync::Arc;

use anyhow::Context;

use farewatch_core::DEFAULT_INTERVAL_MINUTES;
use farewatch_infra::store::postgres;
use farewatch_infra::{
    HistoryStore, InMemoryHistoryStore, InMemoryJobStore, JobStore, MockPriceFetcher,
    PostgresHistoryStore, PostgresJobStore, SchedulerConfig, SchedulingLoop, StoreBackend,
    TickRunner,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    farewatch_observability::init();

    let config = SchedulerConfig::from_env().context("invalid scheduler configuration")?;
    let fetcher = config.mock_fetcher().context("invalid mock price range")?;
    tracing::info!(
        backend = ?config.backend,
        tick_secs = config.tick_period.as_secs(),
        fetch_timeout_secs = config.fetch_timeout.as_secs(),
        default_interval_minutes = DEFAULT_INTERVAL_MINUTES,
        "starting price scheduler"
    );

    match config.backend {
        StoreBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL must be set for the postgres backend")?;
            let pool = postgres::connect(url, config.max_connections)
                .await
                .context("failed to connect to Postgres")?;
            postgres::ensure_schema(&pool)
                .await
                .context("failed to prepare schema")?;
            tracing::info!("connected to Postgres");

            let jobs = PostgresJobStore::new(pool.clone());
            let history = PostgresHistoryStore::new(pool.clone());
            run(&config, jobs, history, fetcher).await;

            pool.close().await;
        }
        StoreBackend::Memory => {
            tracing::warn!("using in-memory stores; nothing survives a restart");
            run(&config, InMemoryJobStore::new(), InMemoryHistoryStore::new(), fetcher).await;
        }
    }

    tracing::info!("price scheduler stopped");
    Ok(())
}

async fn run<J, H>(config: &SchedulerConfig, jobs: J, history: H, fetcher: MockPriceFetcher)
where
    J: JobStore + 'static,
    H: HistoryStore + 'static,
{
    let runner = Arc::new(TickRunner::new(jobs, history, fetcher, config.tick_config()));
    let handle = SchedulingLoop::new(config.tick_period).spawn(runner);

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("shutdown requested");

    let stats = handle.shutdown().await;
    tracing::info!(
        ticks = stats.ticks_completed,
        failed_ticks = stats.ticks_failed,
        observations = stats.observations_recorded,
        "scheduler drained"
    );
}
