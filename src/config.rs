use anyhow::Context;

use crate::aggregate::{AggregateOptions, DEFAULT_TOP_AT_RISK, DEFAULT_WINDOW_DAYS, MAX_WINDOW_DAYS};

/// Runtime settings read from the environment (and `.env`, if present).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub database_url: String,
    pub max_connections: u32,
    pub aggregate: AggregateOptions,
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// `DB_URL` is accepted as a fallback for `DATABASE_URL`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let database_url = lookup("DATABASE_URL")
            .or_else(|| lookup("DB_URL"))
            .context("DATABASE_URL must be set to a Postgres instance")?;

        let window_days = parse_or(&lookup, "TREND_WINDOW_DAYS", DEFAULT_WINDOW_DAYS)?;
        if !(1..=MAX_WINDOW_DAYS).contains(&window_days) {
            anyhow::bail!("TREND_WINDOW_DAYS must be between 1 and {MAX_WINDOW_DAYS}, got {window_days}");
        }

        Ok(Self {
            database_url,
            max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", 5)?,
            aggregate: AggregateOptions {
                window_days,
                top_at_risk: parse_or(&lookup, "TOP_AT_RISK_LIMIT", DEFAULT_TOP_AT_RISK)?,
            },
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw}")),
        None => Ok(default),
    }
}
