use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{AccessScope, BraceletId, NewReading, PatientRecord, StoredReading, VitalsSample};

pub const DEFAULT_READINGS_LIMIT: usize = 10;
pub const MAX_READINGS_LIMIT: usize = 100;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("reading store unavailable: {0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid reading: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),
}

/// Read and write operations the semaphore needs from a reading store.
///
/// Samples are append-only. Reads see whatever is committed at query time.
#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Patients visible in `scope` with their current bracelet, ordered by id.
    async fn fetch_roster(&self, scope: &AccessScope) -> Result<Vec<PatientRecord>, StoreError>;

    /// Latest sample for each requested bracelet. Every requested id is a key.
    async fn fetch_latest_per_bracelet(
        &self,
        bracelet_ids: &[BraceletId],
    ) -> Result<HashMap<BraceletId, Option<VitalsSample>>, StoreError>;

    /// Samples with `start <= observed_at < end`, oldest first.
    async fn fetch_samples_in_window(
        &self,
        bracelet_ids: &[BraceletId],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<VitalsSample>, StoreError>;

    /// Newest-first history for one bracelet.
    async fn fetch_recent_readings(
        &self,
        bracelet_id: BraceletId,
        limit: usize,
    ) -> Result<Vec<StoredReading>, StoreError>;

    async fn record_reading(
        &self,
        bracelet_id: BraceletId,
        reading: NewReading,
    ) -> Result<StoredReading, StoreError>;
}

/// Heart rate and temperature are mandatory on the write path.
pub fn validate_new_reading(reading: &NewReading) -> Result<(), StoreError> {
    let mut missing = Vec::new();
    if reading.heart_rate_bpm.is_none() {
        missing.push("heart_rate_bpm");
    }
    match reading.temperature_c {
        None => missing.push("temperature_c"),
        Some(value) if !value.is_finite() => {
            return Err(StoreError::Validation(
                "temperature_c must be a finite number".to_string(),
            ))
        }
        Some(_) => {}
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(StoreError::Validation(format!(
            "missing fields: {}",
            missing.join(", ")
        )))
    }
}

pub fn clamp_readings_limit(limit: Option<usize>) -> usize {
    limit
        .unwrap_or(DEFAULT_READINGS_LIMIT)
        .clamp(1, MAX_READINGS_LIMIT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_requires_heart_rate_and_temperature() {
        let reading = NewReading {
            worn: Some(true),
            ..NewReading::default()
        };
        let err = validate_new_reading(&reading).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid reading: missing fields: heart_rate_bpm, temperature_c"
        );

        let complete = NewReading {
            heart_rate_bpm: Some(72),
            temperature_c: Some(36.6),
            ..NewReading::default()
        };
        assert!(validate_new_reading(&complete).is_ok());
    }

    #[test]
    fn rejects_non_finite_temperature() {
        let reading = NewReading {
            heart_rate_bpm: Some(72),
            temperature_c: Some(f64::INFINITY),
            ..NewReading::default()
        };
        assert!(matches!(
            validate_new_reading(&reading),
            Err(StoreError::Validation(_))
        ));
    }

    #[test]
    fn readings_limit_defaults_and_clamps() {
        assert_eq!(clamp_readings_limit(None), 10);
        assert_eq!(clamp_readings_limit(Some(0)), 1);
        assert_eq!(clamp_readings_limit(Some(25)), 25);
        assert_eq!(clamp_readings_limit(Some(5000)), 100);
    }
}
