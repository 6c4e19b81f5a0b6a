use std::ops::RangeInclusive;

use crate::models::{StatusTag, VitalsSample};

/// Outside either band the patient is critical.
pub const CRITICAL_TEMPERATURE_C: RangeInclusive<f64> = 35.0..=39.5;
pub const CRITICAL_HEART_RATE_BPM: RangeInclusive<i32> = 40..=130;

/// Inside both bands, with the bracelet on, the patient is stable.
pub const STABLE_TEMPERATURE_C: RangeInclusive<f64> = 36.0..=37.5;
pub const STABLE_HEART_RATE_BPM: RangeInclusive<i32> = 60..=100;

/// Maps a sample to its semaphore colour. First match wins: missing data,
/// then critical, then stable, otherwise warning.
pub fn classify(sample: &VitalsSample) -> StatusTag {
    classify_vitals(sample.temperature_c, sample.heart_rate_bpm, sample.worn)
}

pub fn classify_vitals(
    temperature_c: Option<f64>,
    heart_rate_bpm: Option<i32>,
    worn: Option<bool>,
) -> StatusTag {
    // NaN compares false against every bound, so treat it as missing.
    let (Some(temperature), Some(heart_rate)) =
        (temperature_c.filter(|t| !t.is_nan()), heart_rate_bpm)
    else {
        return StatusTag::Warning;
    };

    if !CRITICAL_TEMPERATURE_C.contains(&temperature)
        || !CRITICAL_HEART_RATE_BPM.contains(&heart_rate)
    {
        return StatusTag::Critical;
    }

    if STABLE_TEMPERATURE_C.contains(&temperature)
        && STABLE_HEART_RATE_BPM.contains(&heart_rate)
        && worn == Some(true)
    {
        return StatusTag::Stable;
    }

    StatusTag::Warning
}

/// Status shown for a patient whose latest sample may be missing.
pub fn classify_latest(latest: Option<&VitalsSample>) -> StatusTag {
    latest.map(classify).unwrap_or(StatusTag::Warning)
}
