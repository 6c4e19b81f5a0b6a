use chrono::NaiveDate;
use serde::Serialize;

use crate::classify::classify_latest;
use crate::models::{AccessScope, PatientLatestState, StatusTag};
use crate::store::{ReadingStore, StoreError};

/// One row of the semaphore board.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoardEntry {
    #[serde(flatten)]
    pub state: PatientLatestState,
    pub name: String,
    pub age: Option<i32>,
    pub status: StatusTag,
    pub label: &'static str,
}

impl BoardEntry {
    pub fn new(state: PatientLatestState, today: NaiveDate) -> Self {
        let status = classify_latest(state.latest.as_ref());
        Self {
            name: state.patient.full_name(),
            age: state.patient.age_on(today),
            status,
            label: status.label(),
            state,
        }
    }

    pub fn bracelet_label(&self) -> String {
        self.state
            .patient
            .bracelet_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "unassigned".to_string())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BraceletFilter {
    #[default]
    Any,
    With,
    Without,
}

#[derive(Debug, Clone, Default)]
pub struct BoardFilter {
    pub status: Option<StatusTag>,
    pub bracelet: BraceletFilter,
    /// Numeric input matches the patient id exactly; anything else is a
    /// case-insensitive substring of the full name.
    pub search: Option<String>,
}

impl BoardFilter {
    pub fn matches(&self, entry: &BoardEntry) -> bool {
        if let Some(status) = self.status {
            // The board colours a missing reading as warning, but search only
            // matches patients that actually have one.
            if entry.state.latest.is_none() || entry.status != status {
                return false;
            }
        }

        let has_bracelet = entry.state.patient.bracelet_id.is_some();
        match self.bracelet {
            BraceletFilter::Any => {}
            BraceletFilter::With if !has_bracelet => return false,
            BraceletFilter::Without if has_bracelet => return false,
            _ => {}
        }

        match self.search.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(term) => match term.parse::<i32>() {
                Ok(id) if term.chars().all(|c| c.is_ascii_digit()) => {
                    entry.state.patient.patient_id == id
                }
                _ => entry.name.to_lowercase().contains(&term.to_lowercase()),
            },
        }
    }
}

pub fn build_board(
    states: impl IntoIterator<Item = PatientLatestState>,
    today: NaiveDate,
    filter: &BoardFilter,
) -> Vec<BoardEntry> {
    states
        .into_iter()
        .map(|state| BoardEntry::new(state, today))
        .filter(|entry| filter.matches(entry))
        .collect()
}

/// Loads the board for `scope`. Unlike the dashboard, a store failure is
/// reported to the caller.
pub async fn load_board<S: ReadingStore + ?Sized>(
    store: &S,
    scope: &AccessScope,
    now: chrono::DateTime<chrono::Utc>,
    filter: &BoardFilter,
) -> Result<Vec<BoardEntry>, StoreError> {
    let roster = store.fetch_roster(scope).await?;
    let bracelet_ids: Vec<_> = roster.iter().filter_map(|p| p.bracelet_id).collect();
    let mut latest = store.fetch_latest_per_bracelet(&bracelet_ids).await?;

    let states = roster.into_iter().map(|patient| {
        let latest = patient
            .bracelet_id
            .and_then(|id| latest.remove(&id).flatten());
        PatientLatestState { patient, latest }
    });
    Ok(build_board(states, now.date_naive(), filter))
}

/// Count of board rows per status, most severe first.
pub fn summarize_by_status(board: &[BoardEntry]) -> Vec<(StatusTag, usize)> {
    StatusTag::ALL
        .iter()
        .map(|status| {
            (
                *status,
                board.iter().filter(|entry| entry.status == *status).count(),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use crate::models::{NewReading, PatientRecord, VitalsSample};
    use chrono::{TimeZone, Utc};

    fn state(
        patient_id: i32,
        name: &str,
        bracelet_id: Option<i32>,
        vitals: Option<(f64, i32, bool)>,
    ) -> PatientLatestState {
        let observed_at = Utc.with_ymd_and_hms(2026, 3, 10, 8, 0, 0).unwrap();
        PatientLatestState {
            patient: PatientRecord {
                patient_id,
                first_name: name.to_string(),
                last_name: "Ramírez".to_string(),
                second_last_name: "Silva".to_string(),
                birth_date: NaiveDate::from_ymd_opt(1945, 1, 20),
                bracelet_id,
            },
            latest: vitals.map(|(temperature_c, heart_rate_bpm, worn)| VitalsSample {
                bracelet_id: bracelet_id.unwrap_or_default(),
                heart_rate_bpm: Some(heart_rate_bpm),
                temperature_c: Some(temperature_c),
                worn: Some(worn),
                observed_at,
            }),
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 10).unwrap()
    }

    fn sample_states() -> Vec<PatientLatestState> {
        vec![
            state(1, "Ana", Some(1), Some((40.2, 88, true))),
            state(2, "Carlos", Some(2), Some((36.7, 72, true))),
            state(3, "Pilar", Some(3), Some((36.7, 72, false))),
            state(4, "Jorge", None, None),
            state(12, "Andrés", Some(12), None),
        ]
    }

    #[test]
    fn board_classifies_and_labels_every_patient() {
        let board = build_board(sample_states(), today(), &BoardFilter::default());
        let labels: Vec<_> = board.iter().map(|e| e.label).collect();
        assert_eq!(
            labels,
            vec!["Crítico", "Estable", "Advertencia", "Advertencia", "Advertencia"]
        );
        assert_eq!(board[0].name, "Ana Ramírez Silva");
        assert_eq!(board[0].age, Some(81));
        assert_eq!(board[3].bracelet_label(), "unassigned");
    }

    #[test]
    fn status_filter_skips_patients_without_readings() {
        let filter = BoardFilter {
            status: Some(StatusTag::Warning),
            ..BoardFilter::default()
        };
        let board = build_board(sample_states(), today(), &filter);
        let ids: Vec<_> = board.iter().map(|e| e.state.patient.patient_id).collect();
        assert_eq!(ids, vec![3]);
    }

    #[test]
    fn bracelet_filter_splits_roster() {
        let with = BoardFilter {
            bracelet: BraceletFilter::With,
            ..BoardFilter::default()
        };
        let without = BoardFilter {
            bracelet: BraceletFilter::Without,
            ..BoardFilter::default()
        };
        assert_eq!(build_board(sample_states(), today(), &with).len(), 4);
        let orphans = build_board(sample_states(), today(), &without);
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].state.patient.patient_id, 4);
    }

    #[test]
    fn search_matches_id_exactly_or_name_loosely() {
        let by_id = BoardFilter {
            search: Some(" 12 ".to_string()),
            ..BoardFilter::default()
        };
        let board = build_board(sample_states(), today(), &by_id);
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].state.patient.patient_id, 12);

        let by_name = BoardFilter {
            search: Some("ramírez".to_string()),
            ..BoardFilter::default()
        };
        assert_eq!(build_board(sample_states(), today(), &by_name).len(), 5);

        let by_first = BoardFilter {
            search: Some("CAR".to_string()),
            ..BoardFilter::default()
        };
        let board = build_board(sample_states(), today(), &by_first);
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].name, "Carlos Ramírez Silva");
    }

    #[test]
    fn summary_counts_each_status() {
        let board = build_board(sample_states(), today(), &BoardFilter::default());
        assert_eq!(
            summarize_by_status(&board),
            vec![
                (StatusTag::Critical, 1),
                (StatusTag::Warning, 3),
                (StatusTag::Stable, 1),
            ]
        );
    }

    #[tokio::test]
    async fn load_board_uses_latest_reading() {
        let store = InMemoryStore::new();
        for patient in sample_states().into_iter().map(|s| s.patient) {
            store.add_patient(patient).unwrap();
        }
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let write = |temperature_c, observed_at| NewReading {
            heart_rate_bpm: Some(80),
            temperature_c: Some(temperature_c),
            worn: Some(true),
            note: None,
            observed_at: Some(observed_at),
        };
        store
            .record_reading(1, write(40.5, now - chrono::Duration::hours(3)))
            .await
            .unwrap();
        store
            .record_reading(1, write(36.9, now - chrono::Duration::hours(1)))
            .await
            .unwrap();

        let board = load_board(&store, &AccessScope::SinglePatient(1), now, &BoardFilter::default())
            .await
            .unwrap();
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].status, StatusTag::Stable);

        store.set_offline(true).unwrap();
        assert!(load_board(&store, &AccessScope::All, now, &BoardFilter::default())
            .await
            .is_err());
    }
}
