use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

use vitals_semaphore::aggregate::load_aggregate;
use vitals_semaphore::board::{load_board, BoardFilter, BraceletFilter};
use vitals_semaphore::config::Settings;
use vitals_semaphore::db::{self, PgStore};
use vitals_semaphore::models::{AccessScope, NewReading, Role, StatusTag};
use vitals_semaphore::report;
use vitals_semaphore::store::{clamp_readings_limit, ReadingStore};

#[derive(Parser)]
#[command(name = "vitals-semaphore")]
#[command(about = "Patient vitals semaphore for bracelet readings", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum RoleArg {
    Admin,
    Doctor,
    Nurse,
    Family,
}

impl From<RoleArg> for Role {
    fn from(value: RoleArg) -> Self {
        match value {
            RoleArg::Admin => Role::Admin,
            RoleArg::Doctor => Role::Doctor,
            RoleArg::Nurse => Role::Nurse,
            RoleArg::Family => Role::Family,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum StatusArg {
    Critical,
    Stable,
    Warning,
}

impl From<StatusArg> for StatusTag {
    fn from(value: StatusArg) -> Self {
        match value {
            StatusArg::Critical => StatusTag::Critical,
            StatusArg::Stable => StatusTag::Stable,
            StatusArg::Warning => StatusTag::Warning,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum BraceletArg {
    With,
    Without,
}

#[derive(Args)]
struct ScopeArgs {
    #[arg(long, value_enum, default_value = "nurse")]
    role: RoleArg,
    /// Patient linked to a family account
    #[arg(long)]
    patient: Option<i32>,
}

impl ScopeArgs {
    fn resolve(&self) -> anyhow::Result<AccessScope> {
        AccessScope::for_role(self.role.into(), self.patient).context("invalid access scope")
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load demo patients, bracelets and a week of readings
    Seed,
    /// Import readings from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Record a reading sent by a bracelet
    Record {
        #[arg(long)]
        bracelet: i32,
        #[arg(long)]
        heart_rate: i32,
        #[arg(long)]
        temperature: f64,
        #[arg(long)]
        worn: Option<bool>,
        #[arg(long)]
        note: Option<String>,
    },
    /// Show recent readings for one bracelet
    Readings {
        #[arg(long)]
        bracelet: i32,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show the semaphore board
    Semaphore {
        #[command(flatten)]
        scope: ScopeArgs,
        #[arg(long, value_enum)]
        status: Option<StatusArg>,
        #[arg(long, value_enum)]
        bracelet: Option<BraceletArg>,
        /// Patient id or part of a name
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Show counts, daily trend and patients at risk
    Dashboard {
        #[command(flatten)]
        scope: ScopeArgs,
        #[arg(long)]
        json: bool,
    },
    /// Generate a markdown report
    Report {
        #[command(flatten)]
        scope: ScopeArgs,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("vitals_semaphore=info")),
        )
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .connect(&settings.database_url)
        .await
        .context("failed to connect to Postgres")?;
    let store = PgStore::new(pool);
    let options = settings.aggregate;

    match cli.command {
        Commands::InitDb => {
            db::init_db(store.pool()).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let summary = db::seed(store.pool(), Utc::now()).await?;
            println!(
                "Seeded {} patients, {} bracelets, {} readings ({} bracelets already had recent readings).",
                summary.patients,
                summary.bracelets,
                summary.readings_inserted,
                summary.bracelets_skipped
            );
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(store.pool(), &csv).await?;
            println!("Inserted {inserted} readings from {}.", csv.display());
        }
        Commands::Record {
            bracelet,
            heart_rate,
            temperature,
            worn,
            note,
        } => {
            let reading = NewReading {
                heart_rate_bpm: Some(heart_rate),
                temperature_c: Some(temperature),
                worn,
                note,
                observed_at: None,
            };
            let stored = store.record_reading(bracelet, reading).await?;
            println!(
                "Recorded reading {} for bracelet {} at {}.",
                stored.reading_id,
                bracelet,
                stored.sample.observed_at.to_rfc3339()
            );
        }
        Commands::Readings { bracelet, limit } => {
            let readings = store
                .fetch_recent_readings(bracelet, clamp_readings_limit(limit))
                .await?;
            println!("{}", serde_json::to_string_pretty(&readings)?);
        }
        Commands::Semaphore {
            scope,
            status,
            bracelet,
            search,
            json,
        } => {
            let scope = scope.resolve()?;
            let filter = BoardFilter {
                status: status.map(StatusTag::from),
                bracelet: match bracelet {
                    None => BraceletFilter::Any,
                    Some(BraceletArg::With) => BraceletFilter::With,
                    Some(BraceletArg::Without) => BraceletFilter::Without,
                },
                search,
            };
            let board = load_board(&store, &scope, Utc::now(), &filter).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&board)?);
            } else if board.is_empty() {
                println!("No patients match.");
            } else {
                for entry in &board {
                    println!(
                        "{:03} {:<32} bracelet {:<10} {}",
                        entry.state.patient.patient_id,
                        entry.name,
                        entry.bracelet_label(),
                        entry.label
                    );
                }
            }
        }
        Commands::Dashboard { scope, json } => {
            let scope = scope.resolve()?;
            let aggregate = load_aggregate(&store, &scope, Utc::now(), &options).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&aggregate)?);
            } else {
                if aggregate.degraded {
                    println!("Reading store unavailable; showing defaults.");
                }
                println!(
                    "Last 24h: {} critical, {} stable",
                    aggregate.counts.critical, aggregate.counts.stable
                );
                for point in &aggregate.trend {
                    println!(
                        "{}  {:.1} °C  {:.0} bpm  ({} samples)",
                        point.date,
                        point.avg_temperature_c,
                        point.avg_heart_rate_bpm,
                        point.sample_count
                    );
                }
                for entry in &aggregate.top_at_risk {
                    println!(
                        "- {} ({:03}): {}",
                        entry.state.patient.full_name(),
                        entry.state.patient.patient_id,
                        entry.status.map(StatusTag::label).unwrap_or("No readings")
                    );
                }
            }
        }
        Commands::Report { scope, out } => {
            let scope = scope.resolve()?;
            let now = Utc::now();
            let aggregate = load_aggregate(&store, &scope, now, &options).await;
            let board = match load_board(&store, &scope, now, &BoardFilter::default()).await {
                Ok(board) => board,
                Err(err) => {
                    tracing::warn!(error = %err, "semaphore board unavailable for report");
                    Vec::new()
                }
            };
            let report = report::build_report(&scope, now, &aggregate, &board);
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
