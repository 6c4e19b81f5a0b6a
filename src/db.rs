use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{
    AccessScope, BraceletId, NewReading, PatientRecord, StoredReading, VitalsSample,
};
use crate::store::{validate_new_reading, ReadingStore, StoreError};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Postgres-backed reading store.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn sample_from_row(row: &PgRow) -> VitalsSample {
    VitalsSample {
        bracelet_id: row.get("bracelet_id"),
        heart_rate_bpm: row.get("heart_rate_bpm"),
        temperature_c: row.get("temperature_c"),
        worn: row.get("worn"),
        observed_at: row.get("observed_at"),
    }
}

#[async_trait]
impl ReadingStore for PgStore {
    async fn fetch_roster(&self, scope: &AccessScope) -> Result<Vec<PatientRecord>, StoreError> {
        let mut query = String::from(
            "SELECT p.patient_id, p.first_name, p.last_name, p.second_last_name, \
             p.birth_date, b.bracelet_id \
             FROM vitals_semaphore.patients p \
             LEFT JOIN vitals_semaphore.bracelets b ON b.patient_id = p.patient_id",
        );
        if let AccessScope::SinglePatient(_) = scope {
            query.push_str(" WHERE p.patient_id = $1");
        }
        query.push_str(" ORDER BY p.patient_id");

        let mut rows = sqlx::query(&query);
        if let AccessScope::SinglePatient(patient_id) = scope {
            rows = rows.bind(*patient_id);
        }

        let records = rows.fetch_all(&self.pool).await?;
        Ok(records
            .iter()
            .map(|row| PatientRecord {
                patient_id: row.get("patient_id"),
                first_name: row.get("first_name"),
                last_name: row.get("last_name"),
                second_last_name: row.get("second_last_name"),
                birth_date: row.get("birth_date"),
                bracelet_id: row.get("bracelet_id"),
            })
            .collect())
    }

    async fn fetch_latest_per_bracelet(
        &self,
        bracelet_ids: &[BraceletId],
    ) -> Result<HashMap<BraceletId, Option<VitalsSample>>, StoreError> {
        let mut latest: HashMap<BraceletId, Option<VitalsSample>> =
            bracelet_ids.iter().map(|id| (*id, None)).collect();
        if bracelet_ids.is_empty() {
            return Ok(latest);
        }

        // Served by the (bracelet_id, observed_at DESC) index.
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT ON (bracelet_id)
                   bracelet_id, heart_rate_bpm, temperature_c, worn, observed_at
            FROM vitals_semaphore.readings
            WHERE bracelet_id = ANY($1)
            ORDER BY bracelet_id, observed_at DESC, reading_id DESC
            "#,
        )
        .bind(bracelet_ids.to_vec())
        .fetch_all(&self.pool)
        .await?;

        for row in rows {
            let sample = sample_from_row(&row);
            latest.insert(sample.bracelet_id, Some(sample));
        }
        Ok(latest)
    }

    async fn fetch_samples_in_window(
        &self,
        bracelet_ids: &[BraceletId],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<VitalsSample>, StoreError> {
        if bracelet_ids.is_empty() || start >= end {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT bracelet_id, heart_rate_bpm, temperature_c, worn, observed_at
            FROM vitals_semaphore.readings
            WHERE bracelet_id = ANY($1)
              AND observed_at >= $2
              AND observed_at < $3
            ORDER BY observed_at, reading_id
            "#,
        )
        .bind(bracelet_ids.to_vec())
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(sample_from_row).collect())
    }

    async fn fetch_recent_readings(
        &self,
        bracelet_id: BraceletId,
        limit: usize,
    ) -> Result<Vec<StoredReading>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT reading_id, bracelet_id, heart_rate_bpm, temperature_c, worn, note, observed_at
            FROM vitals_semaphore.readings
            WHERE bracelet_id = $1
            ORDER BY observed_at DESC, reading_id DESC
            LIMIT $2
            "#,
        )
        .bind(bracelet_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| StoredReading {
                reading_id: row.get("reading_id"),
                sample: sample_from_row(row),
                note: row.get("note"),
            })
            .collect())
    }

    async fn record_reading(
        &self,
        bracelet_id: BraceletId,
        reading: NewReading,
    ) -> Result<StoredReading, StoreError> {
        validate_new_reading(&reading)?;

        let known = sqlx::query("SELECT 1 FROM vitals_semaphore.bracelets WHERE bracelet_id = $1")
            .bind(bracelet_id)
            .fetch_optional(&self.pool)
            .await?;
        if known.is_none() {
            return Err(StoreError::NotFound(format!("bracelet {bracelet_id}")));
        }

        let row = sqlx::query(
            r#"
            INSERT INTO vitals_semaphore.readings
            (bracelet_id, heart_rate_bpm, temperature_c, worn, note, observed_at)
            VALUES ($1, $2, $3, $4, $5, COALESCE($6, NOW()))
            RETURNING reading_id, observed_at
            "#,
        )
        .bind(bracelet_id)
        .bind(reading.heart_rate_bpm)
        .bind(reading.temperature_c)
        .bind(reading.worn)
        .bind(&reading.note)
        .bind(reading.observed_at)
        .fetch_one(&self.pool)
        .await?;

        let stored = StoredReading {
            reading_id: row.get("reading_id"),
            sample: VitalsSample {
                bracelet_id,
                heart_rate_bpm: reading.heart_rate_bpm,
                temperature_c: reading.temperature_c,
                worn: reading.worn,
                observed_at: row.get("observed_at"),
            },
            note: reading.note,
        };
        tracing::info!(
            bracelet_id,
            reading_id = stored.reading_id,
            "reading recorded"
        );
        Ok(stored)
    }
}

const FIRST_NAMES: &[&str] = &[
    "María", "Ana", "Carmen", "Josefa", "Isabel", "Dolores", "Rosa", "Pilar", "Luisa", "Antonia",
    "Francisco", "José", "Manuel", "Antonio", "Juan", "Miguel", "Pedro", "Luis", "Jorge", "Carlos",
];
const LAST_NAMES: &[&str] = &[
    "Gómez", "Pérez", "López", "Sánchez", "Martínez", "García", "Rodríguez", "Fernández", "Ruiz",
    "Torres", "Ramírez", "Flores", "Rivera", "Vargas", "Ramos",
];
const SECOND_LAST_NAMES: &[&str] = &[
    "López", "Hernández", "González", "Jiménez", "Morales", "Castro", "Delgado", "Medina", "Ortiz",
    "Silva",
];

pub const SEED_PATIENTS: i32 = 24;
pub const SEED_UNASSIGNED_BRACELETS: i32 = 2;
pub const SEED_DAYS: i64 = 7;
pub const SEED_READS_PER_DAY: i64 = 4;
const SEED_PROB_CRITICAL: f64 = 0.08;
const SEED_PROB_NOT_WORN: f64 = 0.05;

/// Deterministic demo roster; patient `n` wears bracelet `n`.
pub fn demo_patients(count: i32, rng: &mut StdRng) -> Vec<PatientRecord> {
    (1..=count)
        .map(|patient_id| {
            let year = rng.gen_range(1930..=1959);
            let month = rng.gen_range(1..=12);
            let day = rng.gen_range(1..=28);
            PatientRecord {
                patient_id,
                first_name: FIRST_NAMES[rng.gen_range(0..FIRST_NAMES.len())].to_string(),
                last_name: LAST_NAMES[rng.gen_range(0..LAST_NAMES.len())].to_string(),
                second_last_name: SECOND_LAST_NAMES[rng.gen_range(0..SECOND_LAST_NAMES.len())]
                    .to_string(),
                birth_date: NaiveDate::from_ymd_opt(year, month, day),
                bracelet_id: Some(patient_id),
            }
        })
        .collect()
}

/// Evenly spaced readings across `[start, now]`. A few come from a bracelet
/// off the wrist (no vitals) and a few are critical.
pub fn demo_readings(
    bracelet_id: BraceletId,
    start: DateTime<Utc>,
    now: DateTime<Utc>,
    rng: &mut StdRng,
) -> Vec<VitalsSample> {
    let total = SEED_DAYS * SEED_READS_PER_DAY;
    let span_ms = (now - start).num_milliseconds();

    (0..total)
        .map(|i| {
            let frac = i as f64 / (total - 1).max(1) as f64;
            let observed_at = start + Duration::milliseconds((span_ms as f64 * frac) as i64);

            if rng.gen_bool(SEED_PROB_NOT_WORN) {
                return VitalsSample {
                    bracelet_id,
                    heart_rate_bpm: None,
                    temperature_c: None,
                    worn: Some(false),
                    observed_at,
                };
            }

            let (temperature_c, heart_rate_bpm) = if rng.gen_bool(SEED_PROB_CRITICAL) {
                let temperature = if rng.gen_bool(0.5) {
                    rng.gen_range(39.6..=41.0)
                } else {
                    rng.gen_range(33.5..=34.9)
                };
                let heart_rate = if rng.gen_bool(0.5) {
                    rng.gen_range(131..=180)
                } else {
                    rng.gen_range(20..=39)
                };
                (temperature, heart_rate)
            } else {
                (rng.gen_range(36.0..=37.8), rng.gen_range(55..=100))
            };

            VitalsSample {
                bracelet_id,
                heart_rate_bpm: Some(heart_rate_bpm),
                temperature_c: Some(round_tenth(temperature_c)),
                worn: Some(true),
                observed_at,
            }
        })
        .collect()
}

fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedSummary {
    pub patients: usize,
    pub bracelets: usize,
    pub readings_inserted: usize,
    pub bracelets_skipped: usize,
}

impl SeedSummary {
    /// Adds `rows_affected` counts, so rows skipped by `ON CONFLICT` are not counted.
    fn record_inserted(&mut self, patients: u64, bracelets: u64, readings: u64) {
        self.patients += patients as usize;
        self.bracelets += bracelets as usize;
        self.readings_inserted += readings as usize;
    }
}

/// Idempotent demo data: bracelets that already have readings in the last
/// week are left alone.
pub async fn seed(pool: &PgPool, now: DateTime<Utc>) -> anyhow::Result<SeedSummary> {
    let mut rng = StdRng::seed_from_u64(42);
    let mut summary = SeedSummary::default();

    for patient in demo_patients(SEED_PATIENTS, &mut rng) {
        let patients = sqlx::query(
            r#"
            INSERT INTO vitals_semaphore.patients
            (patient_id, first_name, last_name, second_last_name, birth_date)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (patient_id) DO NOTHING
            "#,
        )
        .bind(patient.patient_id)
        .bind(&patient.first_name)
        .bind(&patient.last_name)
        .bind(&patient.second_last_name)
        .bind(patient.birth_date)
        .execute(pool)
        .await?
        .rows_affected();

        let bracelets = sqlx::query(
            r#"
            INSERT INTO vitals_semaphore.bracelets (bracelet_id, patient_id)
            VALUES ($1, $2)
            ON CONFLICT (bracelet_id) DO NOTHING
            "#,
        )
        .bind(patient.bracelet_id)
        .bind(patient.patient_id)
        .execute(pool)
        .await?
        .rows_affected();

        summary.record_inserted(patients, bracelets, 0);
    }

    sqlx::query(
        "SELECT setval(pg_get_serial_sequence('vitals_semaphore.patients', 'patient_id'), \
         (SELECT COALESCE(MAX(patient_id), 1) FROM vitals_semaphore.patients))",
    )
    .execute(pool)
    .await?;

    for offset in 1..=SEED_UNASSIGNED_BRACELETS {
        let bracelets = sqlx::query(
            "INSERT INTO vitals_semaphore.bracelets (bracelet_id) VALUES ($1) \
             ON CONFLICT (bracelet_id) DO NOTHING",
        )
        .bind(SEED_PATIENTS + offset)
        .execute(pool)
        .await?
        .rows_affected();
        summary.record_inserted(0, bracelets, 0);
    }

    let start = now - Duration::days(SEED_DAYS);
    let bracelet_ids: Vec<BraceletId> =
        sqlx::query("SELECT bracelet_id FROM vitals_semaphore.bracelets ORDER BY bracelet_id")
            .fetch_all(pool)
            .await?
            .iter()
            .map(|row| row.get("bracelet_id"))
            .collect();

    for bracelet_id in bracelet_ids {
        let recent = sqlx::query(
            "SELECT 1 FROM vitals_semaphore.readings \
             WHERE bracelet_id = $1 AND observed_at >= $2 LIMIT 1",
        )
        .bind(bracelet_id)
        .bind(start)
        .fetch_optional(pool)
        .await?;
        if recent.is_some() {
            summary.bracelets_skipped += 1;
            continue;
        }

        let mut tx = pool.begin().await?;
        for sample in demo_readings(bracelet_id, start, now, &mut rng) {
            let readings = insert_sample(&mut *tx, &sample, None, None).await?;
            summary.record_inserted(0, 0, readings);
        }
        tx.commit().await?;
    }

    tracing::info!(?summary, "seed complete");
    Ok(summary)
}

async fn insert_sample<'e, E>(
    executor: E,
    sample: &VitalsSample,
    note: Option<&str>,
    source_key: Option<&str>,
) -> anyhow::Result<u64>
where
    E: sqlx::PgExecutor<'e>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO vitals_semaphore.readings
        (bracelet_id, heart_rate_bpm, temperature_c, worn, note, observed_at, source_key)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (source_key) DO NOTHING
        "#,
    )
    .bind(sample.bracelet_id)
    .bind(sample.heart_rate_bpm)
    .bind(sample.temperature_c)
    .bind(sample.worn)
    .bind(note)
    .bind(sample.observed_at)
    .bind(source_key)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

/// Bulk-loads readings from CSV. Unknown bracelets are registered unassigned;
/// rows whose `source_key` was already imported are skipped.
pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        bracelet_id: BraceletId,
        heart_rate_bpm: Option<i32>,
        temperature_c: Option<f64>,
        worn: Option<bool>,
        observed_at: DateTime<Utc>,
        note: Option<String>,
        source_key: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result.with_context(|| format!("invalid CSV record {}", line + 1))?;

        sqlx::query(
            "INSERT INTO vitals_semaphore.bracelets (bracelet_id) VALUES ($1) \
             ON CONFLICT (bracelet_id) DO NOTHING",
        )
        .bind(row.bracelet_id)
        .execute(pool)
        .await?;

        let source_key = row
            .source_key
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));
        let sample = VitalsSample {
            bracelet_id: row.bracelet_id,
            heart_rate_bpm: row.heart_rate_bpm,
            temperature_c: row.temperature_c,
            worn: row.worn,
            observed_at: row.observed_at,
        };

        if insert_sample(pool, &sample, row.note.as_deref(), Some(&source_key)).await? > 0 {
            inserted += 1;
        }
    }

    tracing::info!(inserted, path = %csv_path.display(), "CSV import finished");
    Ok(inserted)
}
