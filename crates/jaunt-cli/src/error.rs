use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] jaunt_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid visit ID: {0}")]
    InvalidVisitId(String),
    #[error("Invalid conflict ID: {0}")]
    InvalidConflictId(String),
    #[error("Invalid date (expected YYYY-MM-DD): {0}")]
    InvalidDate(String),
    #[error("Could not determine a data directory; pass --db-path")]
    NoDataDir,
    #[error(
        "Sync is not configured. Pass --endpoint or set JAUNT_SYNC_URL to your sync service."
    )]
    SyncNotConfigured,
}
