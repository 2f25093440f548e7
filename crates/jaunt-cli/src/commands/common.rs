use std::env;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDate, Utc};
use jaunt_core::config::TrackingConfig;
use jaunt_core::db::{Database, SharedDatabase};
use jaunt_core::Journal;

use crate::error::CliError;

/// Resolve the database location: explicit flag, else the platform data dir.
pub fn resolve_db_path(flag: Option<PathBuf>) -> Result<PathBuf, CliError> {
    if let Some(path) = flag {
        return Ok(path);
    }
    let mut dir = dirs::data_dir().ok_or(CliError::NoDataDir)?;
    dir.push("jaunt");
    std::fs::create_dir_all(&dir)?;
    dir.push("journal.db");
    Ok(dir)
}

/// Device identifier for version stamps: flag, env, or a fixed default.
pub fn resolve_device(flag: Option<String>) -> String {
    flag.or_else(|| env::var("JAUNT_DEVICE_ID").ok())
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "cli".to_string())
}

pub fn open_database(path: &Path) -> Result<SharedDatabase, CliError> {
    tracing::debug!(path = %path.display(), "opening journal database");
    Ok(Database::open(path)?.into_shared())
}

pub fn open_journal(path: &Path, device: &str) -> Result<Journal, CliError> {
    let db = open_database(path)?;
    Ok(Journal::new(db, TrackingConfig::default(), device))
}

/// `[now - days, now)` window in Unix milliseconds.
pub fn recent_window(days: i64) -> (i64, i64) {
    let end = Utc::now().timestamp_millis();
    (end - days * 86_400_000, end)
}

/// Parse an anchor date, defaulting to today.
pub fn parse_date(date: Option<&str>) -> Result<NaiveDate, CliError> {
    match date {
        Some(raw) => raw
            .parse()
            .map_err(|_| CliError::InvalidDate(raw.to_string())),
        None => Ok(Local::now().date_naive()),
    }
}

/// Render a Unix-millisecond timestamp in local time.
pub fn format_time(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms).map_or_else(
        || "-".to_string(),
        |dt| {
            dt.with_timezone(&Local)
                .format("%Y-%m-%d %H:%M")
                .to_string()
        },
    )
}

/// Render a millisecond span as "3h 20m" / "12m".
pub fn format_duration(ms: i64) -> String {
    let minutes = ms / 60_000;
    if minutes >= 60 {
        format!("{}h {:02}m", minutes / 60, minutes % 60)
    } else {
        format!("{minutes}m")
    }
}

/// Render meters as "850 m" / "12.4 km".
pub fn format_distance(m: f64) -> String {
    if m >= 1_000.0 {
        format!("{:.1} km", m / 1_000.0)
    } else {
        format!("{m:.0} m")
    }
}
