use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::classify::classify;
use crate::models::{
    AccessScope, Aggregate, AtRiskPatient, BraceletId, PatientHistory, PatientLatestState,
    StatusCounts, StatusTag, TrendPoint, VitalsSample,
};
use crate::store::ReadingStore;

/// Values charted for days without any sample.
pub const DEFAULT_TEMPERATURE_C: f64 = 36.5;
pub const DEFAULT_HEART_RATE_BPM: f64 = 75.0;

pub const DEFAULT_WINDOW_DAYS: u32 = 7;
/// Longest trend the dashboard charts, one year of daily points.
pub const MAX_WINDOW_DAYS: u32 = 366;
pub const DEFAULT_TOP_AT_RISK: usize = 5;

/// Only latest readings newer than this feed the critical/stable counters.
pub const RECENT_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateOptions {
    pub window_days: u32,
    pub top_at_risk: usize,
}

impl Default for AggregateOptions {
    fn default() -> Self {
        Self {
            window_days: DEFAULT_WINDOW_DAYS,
            top_at_risk: DEFAULT_TOP_AT_RISK,
        }
    }
}

impl AggregateOptions {
    fn window_days(&self) -> i64 {
        i64::from(self.window_days.clamp(1, MAX_WINDOW_DAYS))
    }
}

/// Computes counts, trend and at-risk list for the patients visible in `scope`.
///
/// Histories outside the scope are ignored, as are patients without a
/// bracelet. `top_at_risk` is only filled for staff scope.
pub fn aggregate(
    histories: &[PatientHistory],
    scope: &AccessScope,
    now: DateTime<Utc>,
    options: &AggregateOptions,
) -> Aggregate {
    let visible: Vec<&PatientHistory> = histories
        .iter()
        .filter(|history| scope.includes(history.state.patient.patient_id))
        .filter(|history| history.state.patient.bracelet_id.is_some())
        .collect();

    let counts = count_recent(visible.iter().map(|history| &history.state), now);
    let trend = daily_trend(
        visible.iter().flat_map(|history| history.samples.iter()),
        now,
        options,
    );
    let top_at_risk = if scope.is_staff() {
        rank_at_risk(visible.iter().map(|history| &history.state), options.top_at_risk)
    } else {
        Vec::new()
    };

    Aggregate {
        counts,
        trend,
        top_at_risk,
        degraded: false,
    }
}

/// Counts latest states observed within the last 24 hours. Patients without
/// a recent reading land in neither counter.
pub fn count_recent<'a>(
    states: impl IntoIterator<Item = &'a PatientLatestState>,
    now: DateTime<Utc>,
) -> StatusCounts {
    let cutoff = now - Duration::hours(RECENT_WINDOW_HOURS);
    let mut counts = StatusCounts::default();

    for sample in states.into_iter().filter_map(|state| state.latest.as_ref()) {
        if sample.observed_at <= cutoff {
            continue;
        }
        match classify(sample) {
            StatusTag::Critical => counts.critical += 1,
            StatusTag::Stable => counts.stable += 1,
            StatusTag::Warning => {}
        }
    }

    counts
}

/// First calendar day (UTC) of the trailing window ending today.
pub fn window_start(now: DateTime<Utc>, options: &AggregateOptions) -> NaiveDate {
    let today = now.date_naive();
    today
        .checked_sub_signed(Duration::days(options.window_days() - 1))
        .unwrap_or(today)
}

/// One point per calendar day, oldest first. Each field is the mean of the
/// samples that carry it; days with nothing to average use the default pair.
pub fn daily_trend<'a>(
    samples: impl IntoIterator<Item = &'a VitalsSample>,
    now: DateTime<Utc>,
    options: &AggregateOptions,
) -> Vec<TrendPoint> {
    #[derive(Default)]
    struct DayTotals {
        samples: usize,
        temperature_sum: f64,
        temperature_count: usize,
        heart_rate_sum: f64,
        heart_rate_count: usize,
    }

    let first_day = window_start(now, options);
    let today = now.date_naive();
    let mut days: BTreeMap<NaiveDate, DayTotals> = BTreeMap::new();

    for sample in samples {
        let day = sample.observed_at.date_naive();
        if day < first_day || day > today {
            continue;
        }
        let totals = days.entry(day).or_default();
        totals.samples += 1;
        if let Some(temperature) = sample.temperature_c.filter(|t| t.is_finite()) {
            totals.temperature_sum += temperature;
            totals.temperature_count += 1;
        }
        if let Some(heart_rate) = sample.heart_rate_bpm {
            totals.heart_rate_sum += f64::from(heart_rate);
            totals.heart_rate_count += 1;
        }
    }

    (0..options.window_days())
        .map(|offset| {
            let date = first_day + Duration::days(offset);
            let totals = days.remove(&date).unwrap_or_default();
            TrendPoint {
                date,
                avg_temperature_c: mean(totals.temperature_sum, totals.temperature_count)
                    .unwrap_or(DEFAULT_TEMPERATURE_C),
                avg_heart_rate_bpm: mean(totals.heart_rate_sum, totals.heart_rate_count)
                    .unwrap_or(DEFAULT_HEART_RATE_BPM),
                sample_count: totals.samples,
            }
        })
        .collect()
}

fn mean(sum: f64, count: usize) -> Option<f64> {
    (count > 0).then(|| sum / count as f64)
}

/// Orders by severity (critical, warning, stable, then no reading) and, within
/// a severity, by most recent observation. Keeps at most `limit` entries.
pub fn rank_at_risk<'a>(
    states: impl IntoIterator<Item = &'a PatientLatestState>,
    limit: usize,
) -> Vec<AtRiskPatient> {
    let mut ranked: Vec<AtRiskPatient> = states
        .into_iter()
        .map(|state| AtRiskPatient {
            status: state.latest.as_ref().map(classify),
            state: state.clone(),
        })
        .collect();

    ranked.sort_by_key(|entry| {
        (
            entry.status.map_or(u8::MAX, StatusTag::severity_rank),
            Reverse(entry.state.observed_at()),
        )
    });
    ranked.truncate(limit);
    ranked
}

/// Zeroed counts, a default-filled trend and no at-risk list.
pub fn degraded(now: DateTime<Utc>, options: &AggregateOptions) -> Aggregate {
    Aggregate {
        counts: StatusCounts::default(),
        trend: daily_trend(std::iter::empty(), now, options),
        top_at_risk: Vec::new(),
        degraded: true,
    }
}

/// Reads the scope's roster, latest samples and trend window from `store` and
/// aggregates them. A failing store yields the degraded result instead of an
/// error so callers can still render a view.
pub async fn load_aggregate<S: ReadingStore + ?Sized>(
    store: &S,
    scope: &AccessScope,
    now: DateTime<Utc>,
    options: &AggregateOptions,
) -> Aggregate {
    match load_histories(store, scope, now, options).await {
        Ok(histories) => aggregate(&histories, scope, now, options),
        Err(err) => {
            tracing::warn!(error = %err, ?scope, "reading store unavailable, serving defaults");
            degraded(now, options)
        }
    }
}

/// Latest state and in-window samples for every patient visible in `scope`.
pub async fn load_histories<S: ReadingStore + ?Sized>(
    store: &S,
    scope: &AccessScope,
    now: DateTime<Utc>,
    options: &AggregateOptions,
) -> Result<Vec<PatientHistory>, crate::store::StoreError> {
    let roster = store.fetch_roster(scope).await?;
    let bracelet_ids: Vec<BraceletId> = roster.iter().filter_map(|p| p.bracelet_id).collect();

    let mut latest = store.fetch_latest_per_bracelet(&bracelet_ids).await?;
    let start = window_start(now, options)
        .and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc())
        .unwrap_or(now);
    let samples = store
        .fetch_samples_in_window(&bracelet_ids, start, now + Duration::seconds(1))
        .await?;
    tracing::debug!(
        patients = roster.len(),
        samples = samples.len(),
        "loaded reading history"
    );

    let mut by_bracelet: HashMap<BraceletId, Vec<VitalsSample>> = HashMap::new();
    for sample in samples {
        by_bracelet.entry(sample.bracelet_id).or_default().push(sample);
    }

    Ok(roster
        .into_iter()
        .map(|patient| {
            let (latest, samples) = match patient.bracelet_id {
                Some(id) => (
                    latest.remove(&id).flatten(),
                    by_bracelet.remove(&id).unwrap_or_default(),
                ),
                None => (None, Vec::new()),
            };
            PatientHistory {
                state: PatientLatestState { patient, latest },
                samples,
            }
        })
        .collect())
}
