//! Error types for jaunt-core

use thiserror::Error;

/// Result type alias using jaunt-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in jaunt-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// SQLite error
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Entity not found
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Entity rejected at the store boundary (invariant violation)
    #[error("Invalid {kind}: {reason}")]
    InvalidEntity { kind: &'static str, reason: String },

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote sync service error
    #[error("Sync error: {0}")]
    Sync(String),

    /// Transient remote failure (timeout, connection reset, 5xx); retried
    /// with backoff rather than surfaced.
    #[error("Transient sync failure: {0}")]
    TransientSync(String),

    /// HTTP transport error
    #[error("Sync HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Ingestion pipeline is no longer running
    #[error("Pipeline closed")]
    PipelineClosed,
}

impl Error {
    /// Whether retrying later could plausibly succeed.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::TransientSync(_))
    }

    /// Shorthand for a store-boundary validation failure.
    pub fn invalid(kind: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidEntity {
            kind,
            reason: reason.into(),
        }
    }

    /// Shorthand for a missing entity.
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}
