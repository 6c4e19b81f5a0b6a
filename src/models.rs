use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type PatientId = i32;
pub type BraceletId = i32;

/// One sensor observation from a bracelet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VitalsSample {
    pub bracelet_id: BraceletId,
    pub heart_rate_bpm: Option<i32>,
    pub temperature_c: Option<f64>,
    pub worn: Option<bool>,
    pub observed_at: DateTime<Utc>,
}

/// A reading as persisted by the store, with its row id and free-text note.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredReading {
    pub reading_id: i64,
    #[serde(flatten)]
    pub sample: VitalsSample,
    pub note: Option<String>,
}

/// Payload of the synchronous bracelet write.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewReading {
    pub heart_rate_bpm: Option<i32>,
    pub temperature_c: Option<f64>,
    pub worn: Option<bool>,
    pub note: Option<String>,
    /// Defaults to the store's clock when absent.
    pub observed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusTag {
    Critical,
    Stable,
    Warning,
}

impl StatusTag {
    pub const ALL: [StatusTag; 3] = [StatusTag::Critical, StatusTag::Warning, StatusTag::Stable];

    /// Display label shown on the semaphore board.
    pub fn label(self) -> &'static str {
        match self {
            StatusTag::Critical => "Crítico",
            StatusTag::Stable => "Estable",
            StatusTag::Warning => "Advertencia",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StatusTag::Critical => "critical",
            StatusTag::Stable => "stable",
            StatusTag::Warning => "warning",
        }
    }

    /// Lower is more severe.
    pub fn severity_rank(self) -> u8 {
        match self {
            StatusTag::Critical => 0,
            StatusTag::Warning => 1,
            StatusTag::Stable => 2,
        }
    }
}

impl std::fmt::Display for StatusTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientRecord {
    pub patient_id: PatientId,
    pub first_name: String,
    pub last_name: String,
    pub second_last_name: String,
    pub birth_date: Option<NaiveDate>,
    /// At most one bracelet per patient at a time.
    pub bracelet_id: Option<BraceletId>,
}

impl PatientRecord {
    pub fn full_name(&self) -> String {
        [&self.first_name, &self.last_name, &self.second_last_name]
            .iter()
            .filter(|part| !part.is_empty())
            .map(|part| part.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Age in whole years on `today`, if the birth date is known.
    pub fn age_on(&self, today: NaiveDate) -> Option<i32> {
        let birth = self.birth_date?;
        let mut age = today.year() - birth.year();
        if (today.month(), today.day()) < (birth.month(), birth.day()) {
            age -= 1;
        }
        Some(age)
    }
}

/// Most recent sample for a patient's bracelet; recomputed on every read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatientLatestState {
    pub patient: PatientRecord,
    pub latest: Option<VitalsSample>,
}

impl PatientLatestState {
    pub fn observed_at(&self) -> Option<DateTime<Utc>> {
        self.latest.as_ref().map(|sample| sample.observed_at)
    }
}

/// Latest state plus the sample history used for the trend series.
#[derive(Debug, Clone)]
pub struct PatientHistory {
    pub state: PatientLatestState,
    pub samples: Vec<VitalsSample>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    pub date: NaiveDate,
    pub avg_temperature_c: f64,
    pub avg_heart_rate_bpm: f64,
    pub sample_count: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub critical: usize,
    pub stable: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AtRiskPatient {
    pub state: PatientLatestState,
    /// `None` when the patient has no reading at all.
    pub status: Option<StatusTag>,
}

/// Dashboard numbers for one access scope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Aggregate {
    pub counts: StatusCounts,
    pub trend: Vec<TrendPoint>,
    pub top_at_risk: Vec<AtRiskPatient>,
    /// Set when the reading store could not be reached and defaults were used.
    pub degraded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Doctor,
    Nurse,
    Family,
}

impl Role {
    pub fn is_staff(self) -> bool {
        !matches!(self, Role::Family)
    }
}

/// The subset of patients a caller may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "patient_id", rename_all = "snake_case")]
pub enum AccessScope {
    All,
    SinglePatient(PatientId),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScopeError {
    #[error("family accounts must be linked to a patient")]
    MissingAssignedPatient,
    #[error("staff role {0:?} cannot be restricted to a single patient")]
    StaffWithAssignedPatient(Role),
}

impl AccessScope {
    /// Resolves the scope for a role. Staff see every patient; family members
    /// see only the patient they are linked to.
    pub fn for_role(role: Role, assigned_patient: Option<PatientId>) -> Result<Self, ScopeError> {
        match (role.is_staff(), assigned_patient) {
            (true, None) => Ok(AccessScope::All),
            (true, Some(_)) => Err(ScopeError::StaffWithAssignedPatient(role)),
            (false, Some(patient_id)) => Ok(AccessScope::SinglePatient(patient_id)),
            (false, None) => Err(ScopeError::MissingAssignedPatient),
        }
    }

    pub fn includes(&self, patient_id: PatientId) -> bool {
        match self {
            AccessScope::All => true,
            AccessScope::SinglePatient(id) => *id == patient_id,
        }
    }

    pub fn is_staff(&self) -> bool {
        matches!(self, AccessScope::All)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patient(birth_date: Option<NaiveDate>) -> PatientRecord {
        PatientRecord {
            patient_id: 1,
            first_name: "María".to_string(),
            last_name: "Gómez".to_string(),
            second_last_name: "López".to_string(),
            birth_date,
            bracelet_id: Some(1),
        }
    }

    #[test]
    fn age_subtracts_one_before_birthday() {
        let record = patient(NaiveDate::from_ymd_opt(1940, 6, 15));
        let before = NaiveDate::from_ymd_opt(2026, 6, 14).unwrap();
        let on = NaiveDate::from_ymd_opt(2026, 6, 15).unwrap();
        assert_eq!(record.age_on(before), Some(85));
        assert_eq!(record.age_on(on), Some(86));
        assert_eq!(patient(None).age_on(on), None);
    }

    #[test]
    fn full_name_joins_non_empty_parts() {
        let mut record = patient(None);
        assert_eq!(record.full_name(), "María Gómez López");
        record.second_last_name.clear();
        assert_eq!(record.full_name(), "María Gómez");
    }

    #[test]
    fn staff_roles_see_everything() {
        for role in [Role::Admin, Role::Doctor, Role::Nurse] {
            assert_eq!(AccessScope::for_role(role, None), Ok(AccessScope::All));
        }
    }

    #[test]
    fn family_role_is_bound_to_one_patient() {
        assert_eq!(
            AccessScope::for_role(Role::Family, Some(7)),
            Ok(AccessScope::SinglePatient(7))
        );
        assert_eq!(
            AccessScope::for_role(Role::Family, None),
            Err(ScopeError::MissingAssignedPatient)
        );
        assert!(AccessScope::SinglePatient(7).includes(7));
        assert!(!AccessScope::SinglePatient(7).includes(8));
    }

    #[test]
    fn status_labels_match_board_text() {
        assert_eq!(StatusTag::Critical.label(), "Crítico");
        assert_eq!(StatusTag::Stable.label(), "Estable");
        assert_eq!(StatusTag::Warning.label(), "Advertencia");
        assert_eq!(
            serde_json::to_string(&StatusTag::Warning).unwrap(),
            "\"warning\""
        );
    }
}
