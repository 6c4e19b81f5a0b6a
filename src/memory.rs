use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    AccessScope, BraceletId, NewReading, PatientId, PatientRecord, StoredReading, VitalsSample,
};
use crate::store::{validate_new_reading, ReadingStore, StoreError};

/// Readings of one bracelet keyed by time, ties broken by insertion id.
type BraceletIndex = BTreeMap<(DateTime<Utc>, i64), StoredReading>;

#[derive(Debug, Default)]
struct Inner {
    patients: BTreeMap<PatientId, PatientRecord>,
    /// Bracelet to assigned patient, `None` when unassigned.
    bracelets: BTreeMap<BraceletId, Option<PatientId>>,
    readings: HashMap<BraceletId, BraceletIndex>,
    next_reading_id: i64,
    offline: bool,
}

/// Process-local reading store. Cloning shares the underlying data.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a patient and, if the record names one, assigns its bracelet.
    /// A bracelet already worn by someone else moves to this patient.
    pub fn add_patient(&self, record: PatientRecord) -> Result<(), StoreError> {
        let mut inner = self.write()?;
        if let Some(bracelet_id) = record.bracelet_id {
            for assigned in inner.bracelets.values_mut() {
                if *assigned == Some(record.patient_id) {
                    *assigned = None;
                }
            }
            inner.bracelets.insert(bracelet_id, Some(record.patient_id));
        }
        inner.patients.insert(
            record.patient_id,
            PatientRecord {
                bracelet_id: None,
                ..record
            },
        );
        Ok(())
    }

    pub fn add_bracelet(&self, bracelet_id: BraceletId) -> Result<(), StoreError> {
        self.write()?.bracelets.entry(bracelet_id).or_insert(None);
        Ok(())
    }

    /// Simulates an outage: every read and write fails until toggled back.
    pub fn set_offline(&self, offline: bool) -> Result<(), StoreError> {
        self.inner
            .write()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
            .offline = offline;
        Ok(())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>, StoreError> {
        let guard = self
            .inner
            .read()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        if guard.offline {
            return Err(StoreError::Unavailable("store is offline".to_string()));
        }
        Ok(guard)
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Inner>, StoreError> {
        let guard = self
            .inner
            .write()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        if guard.offline {
            return Err(StoreError::Unavailable("store is offline".to_string()));
        }
        Ok(guard)
    }
}

#[async_trait]
impl ReadingStore for InMemoryStore {
    async fn fetch_roster(&self, scope: &AccessScope) -> Result<Vec<PatientRecord>, StoreError> {
        let inner = self.read()?;
        let by_patient: HashMap<PatientId, BraceletId> = inner
            .bracelets
            .iter()
            .filter_map(|(bracelet_id, patient_id)| patient_id.map(|p| (p, *bracelet_id)))
            .collect();

        Ok(inner
            .patients
            .values()
            .filter(|patient| scope.includes(patient.patient_id))
            .map(|patient| PatientRecord {
                bracelet_id: by_patient.get(&patient.patient_id).copied(),
                ..patient.clone()
            })
            .collect())
    }

    async fn fetch_latest_per_bracelet(
        &self,
        bracelet_ids: &[BraceletId],
    ) -> Result<HashMap<BraceletId, Option<VitalsSample>>, StoreError> {
        let inner = self.read()?;
        Ok(bracelet_ids
            .iter()
            .map(|id| {
                let latest = inner
                    .readings
                    .get(id)
                    .and_then(|index| index.values().next_back())
                    .map(|reading| reading.sample.clone());
                (*id, latest)
            })
            .collect())
    }

    async fn fetch_samples_in_window(
        &self,
        bracelet_ids: &[BraceletId],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<VitalsSample>, StoreError> {
        if start >= end {
            return Ok(Vec::new());
        }
        let inner = self.read()?;
        let mut samples: Vec<VitalsSample> = bracelet_ids
            .iter()
            .filter_map(|id| inner.readings.get(id))
            .flat_map(|index| index.range((start, i64::MIN)..(end, i64::MIN)))
            .map(|(_, reading)| reading.sample.clone())
            .collect();
        samples.sort_by_key(|sample| sample.observed_at);
        Ok(samples)
    }

    async fn fetch_recent_readings(
        &self,
        bracelet_id: BraceletId,
        limit: usize,
    ) -> Result<Vec<StoredReading>, StoreError> {
        let inner = self.read()?;
        Ok(inner
            .readings
            .get(&bracelet_id)
            .map(|index| index.values().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn record_reading(
        &self,
        bracelet_id: BraceletId,
        reading: NewReading,
    ) -> Result<StoredReading, StoreError> {
        validate_new_reading(&reading)?;
        let mut inner = self.write()?;
        if !inner.bracelets.contains_key(&bracelet_id) {
            return Err(StoreError::NotFound(format!("bracelet {bracelet_id}")));
        }

        inner.next_reading_id += 1;
        let stored = StoredReading {
            reading_id: inner.next_reading_id,
            sample: VitalsSample {
                bracelet_id,
                heart_rate_bpm: reading.heart_rate_bpm,
                temperature_c: reading.temperature_c,
                worn: reading.worn,
                observed_at: reading.observed_at.unwrap_or_else(Utc::now),
            },
            note: reading.note,
        };
        inner
            .readings
            .entry(bracelet_id)
            .or_default()
            .insert((stored.sample.observed_at, stored.reading_id), stored.clone());
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn patient(patient_id: PatientId, bracelet_id: Option<BraceletId>) -> PatientRecord {
        PatientRecord {
            patient_id,
            first_name: format!("Paciente{patient_id}"),
            last_name: "Pérez".to_string(),
            second_last_name: "Ortiz".to_string(),
            birth_date: None,
            bracelet_id,
        }
    }

    fn reading(temperature_c: f64, heart_rate_bpm: i32, observed_at: DateTime<Utc>) -> NewReading {
        NewReading {
            heart_rate_bpm: Some(heart_rate_bpm),
            temperature_c: Some(temperature_c),
            worn: Some(true),
            note: None,
            observed_at: Some(observed_at),
        }
    }

    #[tokio::test]
    async fn latest_per_bracelet_picks_newest_sample() {
        let store = InMemoryStore::new();
        store.add_patient(patient(1, Some(10))).unwrap();
        store.add_bracelet(20).unwrap();
        let now = Utc::now();

        store.record_reading(10, reading(36.5, 70, now)).await.unwrap();
        store
            .record_reading(10, reading(38.0, 90, now - Duration::hours(2)))
            .await
            .unwrap();

        let latest = store.fetch_latest_per_bracelet(&[10, 20]).await.unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[&10].as_ref().unwrap().temperature_c, Some(36.5));
        assert!(latest[&20].is_none());
    }

    #[tokio::test]
    async fn roster_respects_scope_and_assignment() {
        let store = InMemoryStore::new();
        store.add_patient(patient(1, Some(10))).unwrap();
        store.add_patient(patient(2, None)).unwrap();

        let all = store.fetch_roster(&AccessScope::All).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].bracelet_id, Some(10));
        assert_eq!(all[1].bracelet_id, None);

        let single = store
            .fetch_roster(&AccessScope::SinglePatient(2))
            .await
            .unwrap();
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].patient_id, 2);
    }

    #[tokio::test]
    async fn reassigning_a_bracelet_moves_it() {
        let store = InMemoryStore::new();
        store.add_patient(patient(1, Some(10))).unwrap();
        store.add_patient(patient(2, Some(10))).unwrap();

        let roster = store.fetch_roster(&AccessScope::All).await.unwrap();
        assert_eq!(roster[0].bracelet_id, None);
        assert_eq!(roster[1].bracelet_id, Some(10));
    }

    #[tokio::test]
    async fn window_is_half_open_and_ordered() {
        let store = InMemoryStore::new();
        store.add_patient(patient(1, Some(10))).unwrap();
        let end = Utc::now();
        let start = end - Duration::days(1);

        store.record_reading(10, reading(36.6, 70, end)).await.unwrap();
        store.record_reading(10, reading(36.7, 71, start)).await.unwrap();
        store
            .record_reading(10, reading(36.8, 72, start + Duration::hours(1)))
            .await
            .unwrap();
        store
            .record_reading(10, reading(36.9, 73, start - Duration::seconds(1)))
            .await
            .unwrap();

        let samples = store.fetch_samples_in_window(&[10], start, end).await.unwrap();
        let rates: Vec<_> = samples.iter().map(|s| s.heart_rate_bpm).collect();
        assert_eq!(rates, vec![Some(71), Some(72)]);
    }

    #[tokio::test]
    async fn recent_readings_are_newest_first() {
        let store = InMemoryStore::new();
        store.add_bracelet(10).unwrap();
        let now = Utc::now();
        for minutes in 0..5 {
            store
                .record_reading(10, reading(36.5, 60 + minutes, now + Duration::minutes(minutes as i64)))
                .await
                .unwrap();
        }

        let recent = store.fetch_recent_readings(10, 3).await.unwrap();
        let rates: Vec<_> = recent.iter().map(|r| r.sample.heart_rate_bpm).collect();
        assert_eq!(rates, vec![Some(64), Some(63), Some(62)]);
    }

    #[tokio::test]
    async fn writes_to_unknown_bracelets_are_rejected() {
        let store = InMemoryStore::new();
        let err = store
            .record_reading(99, reading(36.5, 70, Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn offline_store_reports_unavailable() {
        let store = InMemoryStore::new();
        store.set_offline(true).unwrap();
        let err = store.fetch_roster(&AccessScope::All).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));

        store.set_offline(false).unwrap();
        assert!(store.fetch_roster(&AccessScope::All).await.is_ok());
    }
}
