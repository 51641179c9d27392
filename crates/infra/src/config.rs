//! Environment-driven configuration for the scheduler process.

use std::str::FromStr;
use std::time::Duration;

use crate::fetcher::MockPriceFetcher;
use crate::retry::RetryPolicy;
use crate::tick::TickConfig;

/// Configuration loading errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Where jobs and history live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreBackend {
    #[default]
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "memory" | "in-memory" => Ok(Self::Memory),
            other => Err(ConfigError::invalid(
                "FAREWATCH_STORE",
                format!("unknown backend `{other}` (expected `postgres` or `memory`)"),
            )),
        }
    }
}

/// Scheduler process configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    pub backend: StoreBackend,
    /// Required when `backend` is Postgres.
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub tick_period: Duration,
    pub fetch_timeout: Duration,
    pub store_retries: u32,
    pub mock_min_price: f64,
    pub mock_max_price: f64,
    pub currency: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Postgres,
            database_url: None,
            max_connections: 5,
            tick_period: Duration::from_secs(30),
            fetch_timeout: Duration::from_secs(10),
            store_retries: 3,
            mock_min_price: 500.0,
            mock_max_price: 800.0,
            currency: "USD".to_string(),
        }
    }
}

impl SchedulerConfig {
    /// Load from process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Unset and blank keys take defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let backend = match get("FAREWATCH_STORE") {
            Some(v) => v.parse()?,
            None => defaults.backend,
        };
        let database_url = get("DATABASE_URL");
        if backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        let config = Self {
            backend,
            database_url,
            max_connections: parse_or(
                "FAREWATCH_DB_MAX_CONNECTIONS",
                get("FAREWATCH_DB_MAX_CONNECTIONS"),
                defaults.max_connections,
            )?,
            tick_period: Duration::from_secs(parse_or(
                "FAREWATCH_TICK_SECS",
                get("FAREWATCH_TICK_SECS"),
                defaults.tick_period.as_secs(),
            )?),
            fetch_timeout: Duration::from_secs(parse_or(
                "FAREWATCH_FETCH_TIMEOUT_SECS",
                get("FAREWATCH_FETCH_TIMEOUT_SECS"),
                defaults.fetch_timeout.as_secs(),
            )?),
            store_retries: parse_or(
                "FAREWATCH_STORE_RETRIES",
                get("FAREWATCH_STORE_RETRIES"),
                defaults.store_retries,
            )?,
            mock_min_price: parse_or(
                "FAREWATCH_MOCK_MIN_PRICE",
                get("FAREWATCH_MOCK_MIN_PRICE"),
                defaults.mock_min_price,
            )?,
            mock_max_price: parse_or(
                "FAREWATCH_MOCK_MAX_PRICE",
                get("FAREWATCH_MOCK_MAX_PRICE"),
                defaults.mock_max_price,
            )?,
            currency: get("FAREWATCH_CURRENCY")
                .map(|c| c.trim().to_ascii_uppercase())
                .unwrap_or(defaults.currency),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_period.is_zero() {
            return Err(ConfigError::invalid("FAREWATCH_TICK_SECS", "must be greater than zero"));
        }
        if self.fetch_timeout.is_zero() {
            return Err(ConfigError::invalid(
                "FAREWATCH_FETCH_TIMEOUT_SECS",
                "must be greater than zero",
            ));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::invalid(
                "FAREWATCH_DB_MAX_CONNECTIONS",
                "must be greater than zero",
            ));
        }
        if !self.mock_min_price.is_finite()
            || !self.mock_max_price.is_finite()
            || self.mock_min_price < 0.0
        {
            return Err(ConfigError::invalid(
                "FAREWATCH_MOCK_MIN_PRICE",
                "prices must be finite and non-negative",
            ));
        }
        if self.mock_min_price > self.mock_max_price {
            return Err(ConfigError::invalid(
                "FAREWATCH_MOCK_MAX_PRICE",
                format!(
                    "{} is below the minimum price {}",
                    self.mock_max_price, self.mock_min_price
                ),
            ));
        }
        Ok(())
    }

    pub fn tick_config(&self) -> TickConfig {
        TickConfig {
            fetch_timeout: self.fetch_timeout,
            store_retry: RetryPolicy::default().with_max_retries(self.store_retries),
        }
    }

    pub fn mock_fetcher(&self) -> Result<MockPriceFetcher, ConfigError> {
        MockPriceFetcher::new(self.mock_min_price..=self.mock_max_price, self.currency.clone())
            .map_err(|e| ConfigError::invalid("FAREWATCH_MOCK_MIN_PRICE", e.to_string()))
    }
}

fn parse_or<T: FromStr>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match raw {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::invalid(key, format!("`{}`: {e}", v.trim()))),
        None => Ok(default),
    }
}
