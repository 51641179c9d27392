//! Postgres-backed job and history stores.
//!
//! Both stores share one `PgPool`, opened at process start by [`connect`] and
//! closed by the host at shutdown.
//!
//! ## Error Mapping
//!
//! | SQLx Error | StoreError |
//! |------------|------------|
//! | `Io`, `Tls`, `PoolTimedOut`, `PoolClosed`, `WorkerCrashed` | `Unavailable` (retried) |
//! | Database, unique violation (`23505`) | `AlreadyExists` |
//! | anything else | `Storage` |
//!
//! Job columns other than `id` are nullable: records are written by other
//! collaborators and a missing field must surface as a malformed record, not
//! as a failed query.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{info, instrument};
use uuid::Uuid;

use farewatch_core::{JobRecord, Observation, ObservationId, Price, TrackedJobId};

use super::history_store::HistoryStore;
use super::job_store::{JobFilter, JobPatch, JobStore};
use super::StoreError;

const SCHEMA: [&str; 3] = [
    r#"
    CREATE TABLE IF NOT EXISTS tracked_flights (
        id UUID PRIMARY KEY,
        origin TEXT,
        destination TEXT,
        tracking_start_date TIMESTAMPTZ,
        departure_date TIMESTAMPTZ,
        tracking_interval_minutes BIGINT,
        status TEXT,
        last_checked_timestamp TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS price_history (
        id UUID PRIMARY KEY,
        tracked_flight_id UUID NOT NULL,
        observed_at TIMESTAMPTZ NOT NULL,
        price_cents BIGINT NOT NULL,
        currency TEXT NOT NULL,
        source TEXT NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS price_history_job_observed_at
        ON price_history (tracked_flight_id, observed_at)
    "#,
];

/// Open a pool and verify the database answers.
///
/// Failure here means the stores are unreachable; callers treat it as fatal.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
        .map_err(|e| map_sqlx_error("connect", e))?;

    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .map_err(|e| map_sqlx_error("ping", e))?;

    info!(max_connections, "connected to postgres");
    Ok(pool)
}

/// Create tables and indexes if they do not exist yet.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), StoreError> {
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
    }
    Ok(())
}

/// Postgres-backed job store (`tracked_flights` table).
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: Arc<PgPool>,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, record), fields(job_id = %record.id), err)]
    async fn insert(&self, record: JobRecord) -> Result<TrackedJobId, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO tracked_flights (
                id,
                origin,
                destination,
                tracking_start_date,
                departure_date,
                tracking_interval_minutes,
                status,
                last_checked_timestamp
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(&record.origin)
        .bind(&record.destination)
        .bind(record.tracking_start_date)
        .bind(record.departure_date)
        .bind(record.tracking_interval_minutes)
        .bind(&record.status)
        .bind(record.last_checked_timestamp)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_job", e))?;

        Ok(record.id)
    }

    #[instrument(skip(self), err)]
    async fn find(&self, filter: &JobFilter) -> Result<Vec<JobRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                id,
                origin,
                destination,
                tracking_start_date,
                departure_date,
                tracking_interval_minutes,
                status,
                last_checked_timestamp
            FROM tracked_flights
            WHERE ($1::text IS NULL OR status IS NULL OR status = $1)
              AND ($2::timestamptz IS NULL OR (
                    (tracking_start_date IS NULL OR tracking_start_date <= $2)
                AND (departure_date IS NULL OR departure_date > $2)
              ))
            ORDER BY id ASC
            "#,
        )
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.window_open_at)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_jobs", e))?;

        rows.iter().map(job_record_from_row).collect()
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn update(&self, id: TrackedJobId, patch: JobPatch) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE tracked_flights
            SET last_checked_timestamp = $2
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(patch.last_checked_timestamp)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_job", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }
}

/// Postgres-backed history store (`price_history` table).
#[derive(Debug, Clone)]
pub struct PostgresHistoryStore {
    pool: Arc<PgPool>,
}

impl PostgresHistoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl HistoryStore for PostgresHistoryStore {
    #[instrument(
        skip(self, observation),
        fields(job_id = %observation.job_id, observation_id = %observation.id),
        err
    )]
    async fn insert(&self, observation: &Observation) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO price_history (
                id,
                tracked_flight_id,
                observed_at,
                price_cents,
                currency,
                source
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(observation.id.as_uuid())
        .bind(observation.job_id.as_uuid())
        .bind(observation.timestamp)
        .bind(observation.price.amount_cents)
        .bind(&observation.price.currency)
        .bind(&observation.source)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_observation", e))?;

        Ok(())
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn list_for_job(&self, job_id: TrackedJobId) -> Result<Vec<Observation>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                id,
                tracked_flight_id,
                observed_at,
                price_cents,
                currency,
                source
            FROM price_history
            WHERE tracked_flight_id = $1
            ORDER BY observed_at ASC, id ASC
            "#,
        )
        .bind(job_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_observations", e))?;

        rows.iter().map(observation_from_row).collect()
    }
}

fn job_record_from_row(row: &PgRow) -> Result<JobRecord, StoreError> {
    let decode = |e: sqlx::Error| StoreError::Storage(format!("failed to decode job row: {e}"));

    Ok(JobRecord {
        id: TrackedJobId::from_uuid(row.try_get::<Uuid, _>("id").map_err(decode)?),
        origin: row.try_get("origin").map_err(decode)?,
        destination: row.try_get("destination").map_err(decode)?,
        tracking_start_date: row
            .try_get::<Option<DateTime<Utc>>, _>("tracking_start_date")
            .map_err(decode)?,
        departure_date: row
            .try_get::<Option<DateTime<Utc>>, _>("departure_date")
            .map_err(decode)?,
        tracking_interval_minutes: row.try_get("tracking_interval_minutes").map_err(decode)?,
        status: row.try_get("status").map_err(decode)?,
        last_checked_timestamp: row
            .try_get::<Option<DateTime<Utc>>, _>("last_checked_timestamp")
            .map_err(decode)?,
    })
}

fn observation_from_row(row: &PgRow) -> Result<Observation, StoreError> {
    let decode =
        |e: sqlx::Error| StoreError::Storage(format!("failed to decode observation row: {e}"));

    Ok(Observation {
        id: ObservationId::from_uuid(row.try_get::<Uuid, _>("id").map_err(decode)?),
        job_id: TrackedJobId::from_uuid(row.try_get::<Uuid, _>("tracked_flight_id").map_err(decode)?),
        timestamp: row.try_get("observed_at").map_err(decode)?,
        price: Price::new(
            row.try_get::<i64, _>("price_cents").map_err(decode)?,
            row.try_get::<String, _>("currency").map_err(decode)?,
        ),
        source: row.try_get("source").map_err(decode)?,
    })
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("23505"),
        _ => false,
    }
}

fn map_sqlx_error(operation: &str, e: sqlx::Error) -> StoreError {
    if is_unique_violation(&e) {
        return StoreError::AlreadyExists(format!("{operation}: {e}"));
    }

    match e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::Unavailable(format!("{operation}: {e}")),
        other => StoreError::Storage(format!("{operation}: {other}")),
    }
}
