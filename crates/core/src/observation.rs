//! Price observations recorded for tracked jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{ObservationId, TrackedJobId};

/// A price in the currency's smallest unit (cents), tagged with its currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Price {
    pub amount_cents: i64,
    pub currency: String,
}

impl Price {
    pub fn new(amount_cents: i64, currency: impl Into<String>) -> Self {
        Self {
            amount_cents,
            currency: currency.into(),
        }
    }
}

impl core::fmt::Display for Price {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let sign = if self.amount_cents < 0 { "-" } else { "" };
        let cents = self.amount_cents.unsigned_abs();
        write!(f, "{sign}{}.{:02} {}", cents / 100, cents % 100, self.currency)
    }
}

/// One immutable price reading for a job.
///
/// `job_id` is a reference only: the observation does not own the job and may
/// outlive it. `timestamp` is the tick instant assigned by the scheduler, not
/// a time reported by the price source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub id: ObservationId,
    #[serde(rename = "trackedFlightId")]
    pub job_id: TrackedJobId,
    pub timestamp: DateTime<Utc>,
    pub price: Price,
    pub source: String,
}

impl Observation {
    pub fn new(
        job_id: TrackedJobId,
        timestamp: DateTime<Utc>,
        price: Price,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: ObservationId::new(),
            job_id,
            timestamp,
            price,
            source: source.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats_major_and_minor_units() {
        assert_eq!(Price::new(70050, "USD").to_string(), "700.50 USD");
        assert_eq!(Price::new(61205, "EUR").to_string(), "612.05 EUR");
        assert_eq!(Price::new(7, "USD").to_string(), "0.07 USD");
        assert_eq!(Price::new(-150, "USD").to_string(), "-1.50 USD");
    }

    #[test]
    fn serializes_job_reference_under_history_field_name() {
        let obs = Observation::new(
            TrackedJobId::new(),
            Utc::now(),
            Price::new(65000, "USD"),
            "MockFetcher",
        );
        let value = serde_json::to_value(&obs).unwrap();
        assert_eq!(value["trackedFlightId"], serde_json::json!(obs.job_id.to_string()));
        assert_eq!(value["source"], "MockFetcher");
        assert_eq!(value["price"]["amountCents"], 65000);
    }
}
