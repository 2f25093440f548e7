//! Database connection management

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{Connection, Transaction};

use crate::error::Result;

use super::migrations;

/// Wrapper around the local SQLite store.
///
/// The store is the single source of truth for every component: ingestion,
/// detection, queries, and sync all go through it, and each logical step is
/// one transaction. All operations are synchronous; nothing here suspends.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open the store at the given path, creating it if needed.
    ///
    /// Runs migrations automatically.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let database = Self { conn };
        database.configure()?;
        database.migrate()?;
        Ok(database)
    }

    /// Open an in-memory store (useful for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let database = Self { conn };
        database.configure()?;
        database.migrate()?;
        Ok(database)
    }

    /// Configure SQLite for local concurrency.
    fn configure(&self) -> Result<()> {
        // WAL is unavailable for in-memory databases; ignore the outcome.
        let _ = self
            .conn
            .pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| tracing::debug!("journal_mode pragma skipped: {e}"));
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(())
    }

    /// Run database migrations.
    fn migrate(&self) -> Result<()> {
        migrations::run(&self.conn)
    }

    /// Get a reference to the underlying connection.
    pub const fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Begin a transaction covering one logical operation.
    pub fn transaction(&mut self) -> Result<Transaction<'_>> {
        Ok(self.conn.transaction()?)
    }

    /// Wrap the store for shared use across tasks.
    ///
    /// A plain mutex is enough: local-store operations never await.
    pub fn into_shared(self) -> SharedDatabase {
        Arc::new(Mutex::new(self))
    }
}

/// Handle shared by the pipeline, journal service, and sync coordinator.
pub type SharedDatabase = Arc<Mutex<Database>>;
