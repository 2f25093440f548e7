//! Sync bookkeeping repository: push queue, conflict rows, device state

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, Result};
use crate::models::{
    ConflictId, ConflictKind, ConflictSide, DeviceSyncState, EntityKind, SyncConflict,
};

/// A queued local change awaiting push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChange {
    pub entity: EntityKind,
    pub entity_id: String,
    pub queued_at_ms: i64,
}

/// Trait for sync bookkeeping operations
pub trait SyncStateRepository {
    /// Queue an entity for push. Re-queuing an already queued entity keeps
    /// the original enqueue time (the queue is deduplicated per entity).
    fn enqueue_change(&self, entity: EntityKind, entity_id: &str, now_ms: i64) -> Result<()>;

    /// Queued changes, oldest first.
    fn list_pending(&self) -> Result<Vec<PendingChange>>;

    /// Whether this entity has a queued (unpushed) local change.
    fn is_pending(&self, entity: EntityKind, entity_id: &str) -> Result<bool>;

    /// Drop a queued change after the remote accepted it.
    fn remove_pending(&self, entity: EntityKind, entity_id: &str) -> Result<()>;

    fn pending_count(&self) -> Result<i64>;

    /// Record a detected conflict. A second conflict for the same entity
    /// replaces the first (the latest divergence is the one to resolve).
    fn insert_conflict(&self, conflict: &SyncConflict) -> Result<()>;

    /// Unresolved conflicts, oldest first.
    fn list_conflicts(&self) -> Result<Vec<SyncConflict>>;

    fn get_conflict(&self, id: &ConflictId) -> Result<Option<SyncConflict>>;

    /// The oldest unresolved conflict, if any.
    fn oldest_conflict(&self) -> Result<Option<SyncConflict>>;

    fn has_conflict_for(&self, entity: EntityKind, entity_id: &str) -> Result<bool>;

    fn delete_conflict(&self, id: &ConflictId) -> Result<()>;

    fn conflict_count(&self) -> Result<i64>;

    fn get_device_state(&self, device_id: &str) -> Result<DeviceSyncState>;

    fn save_device_state(&self, state: &DeviceSyncState) -> Result<()>;
}

/// SQLite implementation of `SyncStateRepository`
pub struct SqliteSyncStateRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteSyncStateRepository<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    const CONFLICT_SELECT: &'static str = "SELECT id, entity_kind, entity_id, kind,
            local_snapshot, local_version, local_device, local_updated_at, local_deleted,
            remote_snapshot, remote_version, remote_device, remote_updated_at, remote_deleted,
            detected_at_ms
         FROM sync_conflicts";

    fn parse_conflict(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncConflict> {
        let id: String = row.get(0)?;
        let entity: String = row.get(1)?;
        let kind: String = row.get(3)?;
        let local_snapshot: String = row.get(4)?;
        let remote_snapshot: String = row.get(9)?;
        Ok(SyncConflict {
            id: id.parse().unwrap_or_default(),
            entity: entity.parse().unwrap_or(EntityKind::Visit),
            entity_id: row.get(2)?,
            kind: kind.parse().unwrap_or(ConflictKind::VersionMismatch),
            local: ConflictSide {
                snapshot: serde_json::from_str(&local_snapshot).unwrap_or_default(),
                version: row.get(5)?,
                device_id: row.get(6)?,
                updated_at: row.get(7)?,
                is_deleted: row.get::<_, i32>(8)? != 0,
            },
            remote: ConflictSide {
                snapshot: serde_json::from_str(&remote_snapshot).unwrap_or_default(),
                version: row.get(10)?,
                device_id: row.get(11)?,
                updated_at: row.get(12)?,
                is_deleted: row.get::<_, i32>(13)? != 0,
            },
            detected_at_ms: row.get(14)?,
        })
    }
}

impl SyncStateRepository for SqliteSyncStateRepository<'_> {
    fn enqueue_change(&self, entity: EntityKind, entity_id: &str, now_ms: i64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO pending_changes (entity_kind, entity_id, queued_at_ms)
             VALUES (?, ?, ?)
             ON CONFLICT(entity_kind, entity_id) DO NOTHING",
            params![entity.as_str(), entity_id, now_ms],
        )?;
        Ok(())
    }

    fn list_pending(&self) -> Result<Vec<PendingChange>> {
        let mut stmt = self.conn.prepare(
            "SELECT entity_kind, entity_id, queued_at_ms
             FROM pending_changes
             ORDER BY queued_at_ms ASC, entity_id ASC",
        )?;

        let pending = stmt
            .query_map([], |row| {
                let kind: String = row.get(0)?;
                Ok(PendingChange {
                    entity: kind.parse().unwrap_or(EntityKind::Visit),
                    entity_id: row.get(1)?,
                    queued_at_ms: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(pending)
    }

    fn is_pending(&self, entity: EntityKind, entity_id: &str) -> Result<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM pending_changes WHERE entity_kind = ? AND entity_id = ?)",
            params![entity.as_str(), entity_id],
            |row| row.get::<_, i32>(0).map(|v| v != 0),
        )?;
        Ok(exists)
    }

    fn remove_pending(&self, entity: EntityKind, entity_id: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM pending_changes WHERE entity_kind = ? AND entity_id = ?",
            params![entity.as_str(), entity_id],
        )?;
        Ok(())
    }

    fn pending_count(&self) -> Result<i64> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM pending_changes", [], |row| row.get(0))?;
        Ok(count)
    }

    fn insert_conflict(&self, conflict: &SyncConflict) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO sync_conflicts
                 (id, entity_kind, entity_id, kind,
                  local_snapshot, local_version, local_device, local_updated_at, local_deleted,
                  remote_snapshot, remote_version, remote_device, remote_updated_at, remote_deleted,
                  detected_at_ms)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                conflict.id.as_str(),
                conflict.entity.as_str(),
                conflict.entity_id,
                conflict.kind.as_str(),
                serde_json::to_string(&conflict.local.snapshot)?,
                conflict.local.version,
                conflict.local.device_id,
                conflict.local.updated_at,
                i32::from(conflict.local.is_deleted),
                serde_json::to_string(&conflict.remote.snapshot)?,
                conflict.remote.version,
                conflict.remote.device_id,
                conflict.remote.updated_at,
                i32::from(conflict.remote.is_deleted),
                conflict.detected_at_ms,
            ],
        )?;
        Ok(())
    }

    fn list_conflicts(&self) -> Result<Vec<SyncConflict>> {
        let mut stmt = self.conn.prepare(&format!(
            "{} ORDER BY detected_at_ms ASC, id ASC",
            Self::CONFLICT_SELECT
        ))?;

        let conflicts = stmt
            .query_map([], Self::parse_conflict)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(conflicts)
    }

    fn get_conflict(&self, id: &ConflictId) -> Result<Option<SyncConflict>> {
        let conflict = self
            .conn
            .query_row(
                &format!("{} WHERE id = ?", Self::CONFLICT_SELECT),
                params![id.as_str()],
                Self::parse_conflict,
            )
            .optional()?;
        Ok(conflict)
    }

    fn oldest_conflict(&self) -> Result<Option<SyncConflict>> {
        let conflict = self
            .conn
            .query_row(
                &format!(
                    "{} ORDER BY detected_at_ms ASC, id ASC LIMIT 1",
                    Self::CONFLICT_SELECT
                ),
                [],
                Self::parse_conflict,
            )
            .optional()?;
        Ok(conflict)
    }

    fn has_conflict_for(&self, entity: EntityKind, entity_id: &str) -> Result<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sync_conflicts WHERE entity_kind = ? AND entity_id = ?)",
            params![entity.as_str(), entity_id],
            |row| row.get::<_, i32>(0).map(|v| v != 0),
        )?;
        Ok(exists)
    }

    fn delete_conflict(&self, id: &ConflictId) -> Result<()> {
        let rows = self.conn.execute(
            "DELETE FROM sync_conflicts WHERE id = ?",
            params![id.as_str()],
        )?;
        if rows == 0 {
            return Err(Error::not_found("conflict", id.to_string()));
        }
        Ok(())
    }

    fn conflict_count(&self) -> Result<i64> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM sync_conflicts", [], |row| row.get(0))?;
        Ok(count)
    }

    fn get_device_state(&self, device_id: &str) -> Result<DeviceSyncState> {
        let state = self
            .conn
            .query_row(
                "SELECT device_id, last_push_version, last_pull_cursor,
                        pending_push_count, pending_conflict_count
                 FROM sync_state WHERE device_id = ?",
                params![device_id],
                |row| {
                    Ok(DeviceSyncState {
                        device_id: row.get(0)?,
                        last_push_version: row.get(1)?,
                        last_pull_cursor: row.get(2)?,
                        pending_push_count: row.get(3)?,
                        pending_conflict_count: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(state.unwrap_or_else(|| DeviceSyncState::new(device_id)))
    }

    fn save_device_state(&self, state: &DeviceSyncState) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sync_state
                 (device_id, last_push_version, last_pull_cursor,
                  pending_push_count, pending_conflict_count)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(device_id) DO UPDATE SET
                 last_push_version = excluded.last_push_version,
                 last_pull_cursor = excluded.last_pull_cursor,
                 pending_push_count = excluded.pending_push_count,
                 pending_conflict_count = excluded.pending_conflict_count",
            params![
                state.device_id,
                state.last_push_version,
                state.last_pull_cursor,
                state.pending_push_count,
                state.pending_conflict_count,
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use serde_json::json;

    fn conflict(entity_id: &str, detected_at_ms: i64) -> SyncConflict {
        SyncConflict {
            id: ConflictId::new(),
            entity: EntityKind::Visit,
            entity_id: entity_id.to_string(),
            kind: ConflictKind::ConcurrentModification,
            local: ConflictSide {
                snapshot: json!({"user_label": "Cafe"}),
                version: 3,
                device_id: "device-a".to_string(),
                updated_at: 1_000,
                is_deleted: false,
            },
            remote: ConflictSide {
                snapshot: json!({"user_label": "Coffee place"}),
                version: 3,
                device_id: "device-b".to_string(),
                updated_at: 2_000,
                is_deleted: false,
            },
            detected_at_ms,
        }
    }

    #[test]
    fn enqueue_is_deduplicated() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteSyncStateRepository::new(db.conn());

        repo.enqueue_change(EntityKind::Visit, "v1", 1_000).unwrap();
        repo.enqueue_change(EntityKind::Visit, "v1", 9_000).unwrap();

        let pending = repo.list_pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].queued_at_ms, 1_000);
        assert!(repo.is_pending(EntityKind::Visit, "v1").unwrap());
    }

    #[test]
    fn pending_ordering_is_fifo() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteSyncStateRepository::new(db.conn());

        repo.enqueue_change(EntityKind::Trip, "t1", 2_000).unwrap();
        repo.enqueue_change(EntityKind::Visit, "v1", 1_000).unwrap();

        let pending = repo.list_pending().unwrap();
        assert_eq!(pending[0].entity_id, "v1");
        assert_eq!(pending[1].entity_id, "t1");
    }

    #[test]
    fn conflict_roundtrip_and_ordering() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteSyncStateRepository::new(db.conn());

        let newer = conflict("v2", 5_000);
        let older = conflict("v1", 1_000);
        repo.insert_conflict(&newer).unwrap();
        repo.insert_conflict(&older).unwrap();

        let oldest = repo.oldest_conflict().unwrap().unwrap();
        assert_eq!(oldest.entity_id, "v1");
        assert_eq!(oldest.local.snapshot, json!({"user_label": "Cafe"}));

        let all = repo.list_conflicts().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(repo.conflict_count().unwrap(), 2);
    }

    #[test]
    fn second_conflict_for_entity_replaces_first() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteSyncStateRepository::new(db.conn());

        repo.insert_conflict(&conflict("v1", 1_000)).unwrap();
        repo.insert_conflict(&conflict("v1", 2_000)).unwrap();

        assert_eq!(repo.conflict_count().unwrap(), 1);
        let remaining = repo.oldest_conflict().unwrap().unwrap();
        assert_eq!(remaining.detected_at_ms, 2_000);
    }

    #[test]
    fn delete_conflict_requires_existence() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteSyncStateRepository::new(db.conn());

        let c = conflict("v1", 1_000);
        repo.insert_conflict(&c).unwrap();
        repo.delete_conflict(&c.id).unwrap();
        assert!(repo.delete_conflict(&c.id).is_err());
    }

    #[test]
    fn device_state_defaults_then_persists() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteSyncStateRepository::new(db.conn());

        let state = repo.get_device_state("device-a").unwrap();
        assert_eq!(state.last_pull_cursor, 0);

        let mut state = state;
        state.last_pull_cursor = 42;
        state.pending_push_count = 3;
        repo.save_device_state(&state).unwrap();

        let reloaded = repo.get_device_state("device-a").unwrap();
        assert_eq!(reloaded.last_pull_cursor, 42);
        assert_eq!(reloaded.pending_push_count, 3);
    }
}
