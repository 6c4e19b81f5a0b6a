use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::board::{summarize_by_status, BoardEntry};
use crate::models::{AccessScope, Aggregate, VitalsSample};

pub fn scope_label(scope: &AccessScope) -> String {
    match scope {
        AccessScope::All => "all patients".to_string(),
        AccessScope::SinglePatient(patient_id) => format!("patient {patient_id:03}"),
    }
}

fn describe_vitals(sample: Option<&VitalsSample>) -> String {
    let Some(sample) = sample else {
        return "no readings".to_string();
    };
    let temperature = sample
        .temperature_c
        .map(|t| format!("{t:.1} °C"))
        .unwrap_or_else(|| "-- °C".to_string());
    let heart_rate = sample
        .heart_rate_bpm
        .map(|hr| format!("{hr} bpm"))
        .unwrap_or_else(|| "-- bpm".to_string());
    let worn = match sample.worn {
        Some(true) => "worn",
        Some(false) => "not worn",
        None => "worn: unknown",
    };
    format!(
        "{temperature}, {heart_rate}, {worn}, at {}",
        sample.observed_at.format("%Y-%m-%d %H:%M")
    )
}

pub fn build_report(
    scope: &AccessScope,
    generated_at: DateTime<Utc>,
    aggregate: &Aggregate,
    board: &[BoardEntry],
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Vitals Semaphore Report");
    let _ = writeln!(
        output,
        "Generated for {} at {}",
        scope_label(scope),
        generated_at.format("%Y-%m-%d %H:%M UTC")
    );
    if aggregate.degraded {
        let _ = writeln!(output);
        let _ = writeln!(
            output,
            "> Reading store unavailable: figures below are defaults."
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Last 24 Hours");
    let _ = writeln!(output, "- Critical: {}", aggregate.counts.critical);
    let _ = writeln!(output, "- Stable: {}", aggregate.counts.stable);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Daily Trend");
    let _ = writeln!(output, "| Date | Avg °C | Avg bpm | Samples |");
    let _ = writeln!(output, "|---|---|---|---|");
    for point in &aggregate.trend {
        let _ = writeln!(
            output,
            "| {} | {:.1} | {:.0} | {} |",
            point.date, point.avg_temperature_c, point.avg_heart_rate_bpm, point.sample_count
        );
    }

    if scope.is_staff() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Patients at Risk");
        if aggregate.top_at_risk.is_empty() {
            let _ = writeln!(output, "No patients with bracelets in this scope.");
        } else {
            for entry in &aggregate.top_at_risk {
                let status = entry
                    .status
                    .map(|status| status.label())
                    .unwrap_or("No readings");
                let _ = writeln!(
                    output,
                    "- {} ({:03}): {} ({})",
                    entry.state.patient.full_name(),
                    entry.state.patient.patient_id,
                    status,
                    describe_vitals(entry.state.latest.as_ref())
                );
            }
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Semaphore");
    if board.is_empty() {
        let _ = writeln!(output, "No patients visible in this scope.");
    } else {
        let summary = summarize_by_status(board)
            .into_iter()
            .map(|(status, count)| format!("{} {}", count, status.label()))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(output, "{summary}");
        let _ = writeln!(output);
        for entry in board {
            let _ = writeln!(
                output,
                "- [{}] {} ({:03}, bracelet {}): {}",
                entry.label,
                entry.name,
                entry.state.patient.patient_id,
                entry.bracelet_label(),
                describe_vitals(entry.state.latest.as_ref())
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{aggregate, degraded, AggregateOptions};
    use crate::board::{build_board, BoardFilter};
    use crate::models::{PatientHistory, PatientLatestState, PatientRecord};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    fn history(patient_id: i32, temperature_c: f64) -> PatientHistory {
        let sample = VitalsSample {
            bracelet_id: patient_id,
            heart_rate_bpm: Some(80),
            temperature_c: Some(temperature_c),
            worn: Some(true),
            observed_at: now() - chrono::Duration::hours(1),
        };
        PatientHistory {
            state: PatientLatestState {
                patient: PatientRecord {
                    patient_id,
                    first_name: "Rosa".to_string(),
                    last_name: "Vargas".to_string(),
                    second_last_name: "Castro".to_string(),
                    birth_date: None,
                    bracelet_id: Some(patient_id),
                },
                latest: Some(sample.clone()),
            },
            samples: vec![sample],
        }
    }

    #[test]
    fn report_lists_counts_trend_and_board() {
        let histories = vec![history(1, 40.1), history(2, 36.9)];
        let result = aggregate(&histories, &AccessScope::All, now(), &AggregateOptions::default());
        let board = build_board(
            histories.iter().map(|h| h.state.clone()),
            now().date_naive(),
            &BoardFilter::default(),
        );

        let report = build_report(&AccessScope::All, now(), &result, &board);
        assert!(report.contains("Generated for all patients"));
        assert!(report.contains("- Critical: 1"));
        assert!(report.contains("- Stable: 1"));
        assert!(report.contains("| 2026-03-10 | 38.5 | 80 | 2 |"));
        assert!(report.contains("| 2026-03-04 | 36.5 | 75 | 0 |"));
        assert!(report.contains("- Rosa Vargas Castro (001): Crítico"));
        assert!(report.contains("1 Crítico, 0 Advertencia, 1 Estable"));
        assert!(!report.contains("unavailable"));
    }

    #[test]
    fn family_report_omits_at_risk_section() {
        let scope = AccessScope::SinglePatient(2);
        let histories = vec![history(2, 36.9)];
        let result = aggregate(&histories, &scope, now(), &AggregateOptions::default());
        let report = build_report(&scope, now(), &result, &[]);
        assert!(report.contains("Generated for patient 002"));
        assert!(!report.contains("Patients at Risk"));
        assert!(report.contains("No patients visible in this scope."));
    }

    #[test]
    fn degraded_report_is_flagged() {
        let result = degraded(now(), &AggregateOptions::default());
        let report = build_report(&AccessScope::All, now(), &result, &[]);
        assert!(report.contains("Reading store unavailable"));
        assert!(report.contains("- Critical: 0"));
    }
}
