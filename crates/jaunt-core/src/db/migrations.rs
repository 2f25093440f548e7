//! Database migrations

use rusqlite::Connection;

use crate::error::Result;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get::<_, i32>(0).map(|v| v != 0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    Ok(version)
}

/// Migration to version 1: journal entities and the sample buffer
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "BEGIN;
         CREATE TABLE IF NOT EXISTS schema_version (
             version INTEGER PRIMARY KEY
         );
         CREATE TABLE IF NOT EXISTS samples (
             timestamp_ms INTEGER PRIMARY KEY,
             latitude REAL NOT NULL,
             longitude REAL NOT NULL,
             accuracy_m REAL NOT NULL,
             speed_mps REAL,
             bearing_deg REAL
         );
         CREATE TABLE IF NOT EXISTS visits (
             id TEXT PRIMARY KEY,
             center_lat REAL NOT NULL,
             center_lon REAL NOT NULL,
             radius_m REAL NOT NULL,
             arrival_ms INTEGER NOT NULL,
             departure_ms INTEGER,
             category TEXT NOT NULL,
             resolved_address TEXT,
             user_label TEXT,
             user_notes TEXT,
             is_favorite INTEGER NOT NULL DEFAULT 0,
             trip_id TEXT,
             version INTEGER NOT NULL,
             device_id TEXT NOT NULL,
             updated_at INTEGER NOT NULL,
             base_version INTEGER NOT NULL DEFAULT 0,
             is_deleted INTEGER NOT NULL DEFAULT 0
         );
         CREATE INDEX IF NOT EXISTS idx_visits_arrival ON visits(arrival_ms);
         CREATE INDEX IF NOT EXISTS idx_visits_trip ON visits(trip_id);
         CREATE TABLE IF NOT EXISTS segments (
             id TEXT PRIMARY KEY,
             start_ms INTEGER NOT NULL,
             end_ms INTEGER NOT NULL,
             transport TEXT NOT NULL,
             distance_m REAL NOT NULL,
             confidence REAL NOT NULL,
             start_lat REAL NOT NULL,
             start_lon REAL NOT NULL,
             end_lat REAL NOT NULL,
             end_lon REAL NOT NULL,
             trip_id TEXT,
             version INTEGER NOT NULL,
             device_id TEXT NOT NULL,
             updated_at INTEGER NOT NULL,
             base_version INTEGER NOT NULL DEFAULT 0,
             is_deleted INTEGER NOT NULL DEFAULT 0
         );
         CREATE INDEX IF NOT EXISTS idx_segments_start ON segments(start_ms);
         CREATE INDEX IF NOT EXISTS idx_segments_trip ON segments(trip_id);
         CREATE TABLE IF NOT EXISTS trips (
             id TEXT PRIMARY KEY,
             start_ms INTEGER NOT NULL,
             end_ms INTEGER,
             display_name TEXT NOT NULL,
             is_ongoing INTEGER NOT NULL,
             is_auto_detected INTEGER NOT NULL,
             tags TEXT NOT NULL DEFAULT '[]',
             summary TEXT NOT NULL DEFAULT '',
             version INTEGER NOT NULL,
             device_id TEXT NOT NULL,
             updated_at INTEGER NOT NULL,
             base_version INTEGER NOT NULL DEFAULT 0,
             is_deleted INTEGER NOT NULL DEFAULT 0
         );
         CREATE INDEX IF NOT EXISTS idx_trips_start ON trips(start_ms);
         CREATE TABLE IF NOT EXISTS geocode_cache (
             bucket_key TEXT PRIMARY KEY,
             place TEXT NOT NULL,
             cached_at_ms INTEGER NOT NULL,
             ttl_secs INTEGER NOT NULL
         );
         INSERT INTO schema_version (version) VALUES (1);
         COMMIT;",
    )?;

    tracing::info!("Migrated database to version 1");
    Ok(())
}

/// Migration to version 2: sync queue, conflicts, and device state
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "BEGIN;
         CREATE TABLE IF NOT EXISTS pending_changes (
             entity_kind TEXT NOT NULL,
             entity_id TEXT NOT NULL,
             queued_at_ms INTEGER NOT NULL,
             PRIMARY KEY (entity_kind, entity_id)
         );
         CREATE TABLE IF NOT EXISTS sync_conflicts (
             id TEXT PRIMARY KEY,
             entity_kind TEXT NOT NULL,
             entity_id TEXT NOT NULL,
             kind TEXT NOT NULL,
             local_snapshot TEXT NOT NULL,
             local_version INTEGER NOT NULL,
             local_device TEXT NOT NULL,
             local_updated_at INTEGER NOT NULL,
             local_deleted INTEGER NOT NULL,
             remote_snapshot TEXT NOT NULL,
             remote_version INTEGER NOT NULL,
             remote_device TEXT NOT NULL,
             remote_updated_at INTEGER NOT NULL,
             remote_deleted INTEGER NOT NULL,
             detected_at_ms INTEGER NOT NULL
         );
         CREATE INDEX IF NOT EXISTS idx_conflicts_detected ON sync_conflicts(detected_at_ms);
         CREATE UNIQUE INDEX IF NOT EXISTS idx_conflicts_entity
             ON sync_conflicts(entity_kind, entity_id);
         CREATE TABLE IF NOT EXISTS sync_state (
             device_id TEXT PRIMARY KEY,
             last_push_version INTEGER NOT NULL DEFAULT 0,
             last_pull_cursor INTEGER NOT NULL DEFAULT 0,
             pending_push_count INTEGER NOT NULL DEFAULT 0,
             pending_conflict_count INTEGER NOT NULL DEFAULT 0
         );
         INSERT INTO schema_version (version) VALUES (2);
         COMMIT;",
    )?;

    tracing::info!("Migrated database to version {CURRENT_VERSION}");
    Ok(())
}
