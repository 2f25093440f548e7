//! Conflict resolution: keep-local, keep-remote, or field-level merge.
//!
//! Every resolution happens in one store transaction: the winner is written
//! locally, re-queued for push, and the conflict row deleted together, so
//! the coordinator can never observe a half-resolved entity.

use rusqlite::Connection;
use serde_json::{Map, Value};

use crate::db::{
    SharedDatabase, SqliteSegmentRepository, SqliteSyncStateRepository, SqliteTripRepository,
    SqliteVisitRepository, SegmentRepository, StoredSegment, StoredTrip, StoredVisit,
    SyncStateRepository, TripRepository, VisitRepository,
};
use crate::error::{Error, Result};
use crate::models::{
    ConflictId, ConflictSide, EntityKind, PlaceVisit, RouteSegment, SyncConflict, Trip,
};
use crate::util::unix_millis_now;

/// The three user-facing resolution operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionOp {
    KeepLocal,
    KeepRemote,
    Merge,
}

/// Applies user decisions to pending conflicts, strictly oldest-first.
///
/// Skipping is simply not resolving: a pending conflict stays pending until
/// a decision arrives, it is never auto-resolved.
pub struct ConflictResolver {
    db: SharedDatabase,
    device_id: String,
}

impl ConflictResolver {
    pub fn new(db: SharedDatabase, device_id: impl Into<String>) -> Self {
        Self {
            db,
            device_id: device_id.into(),
        }
    }

    /// All unresolved conflicts, oldest first.
    pub fn pending(&self) -> Result<Vec<SyncConflict>> {
        let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        SqliteSyncStateRepository::new(db.conn()).list_conflicts()
    }

    /// The conflict that must be resolved next.
    pub fn next(&self) -> Result<Option<SyncConflict>> {
        let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        SqliteSyncStateRepository::new(db.conn()).oldest_conflict()
    }

    pub fn keep_local(&self, id: &ConflictId) -> Result<()> {
        self.resolve(id, ResolutionOp::KeepLocal)
    }

    pub fn keep_remote(&self, id: &ConflictId) -> Result<()> {
        self.resolve(id, ResolutionOp::KeepRemote)
    }

    pub fn merge(&self, id: &ConflictId) -> Result<()> {
        self.resolve(id, ResolutionOp::Merge)
    }

    /// Resolve one conflict. The winner's version is bumped past both sides
    /// so every device observes the resolution as newest.
    pub fn resolve(&self, id: &ConflictId, op: ResolutionOp) -> Result<()> {
        let mut db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        let tx = db.transaction()?;
        {
            let sync_repo = SqliteSyncStateRepository::new(&tx);
            let conflict = sync_repo
                .get_conflict(id)?
                .ok_or_else(|| Error::not_found("conflict", id.to_string()))?;

            // Dependent conflicts (a trip and its child visit) must resolve
            // in detection order; out-of-order resolution could re-derive a
            // second conflict for work already decided.
            if let Some(oldest) = sync_repo.oldest_conflict()? {
                if oldest.id != conflict.id {
                    return Err(Error::InvalidInput(format!(
                        "conflicts resolve oldest-first; next is {}",
                        oldest.id
                    )));
                }
            }

            let winner = match op {
                ResolutionOp::KeepLocal => conflict.local.snapshot.clone(),
                ResolutionOp::KeepRemote => conflict.remote.snapshot.clone(),
                ResolutionOp::Merge => merge_snapshots(&conflict.local, &conflict.remote),
            };
            let winner_deleted = match op {
                ResolutionOp::KeepLocal => conflict.local.is_deleted,
                ResolutionOp::KeepRemote => conflict.remote.is_deleted,
                // An edit on either side outlives the other side's delete.
                ResolutionOp::Merge => conflict.local.is_deleted && conflict.remote.is_deleted,
            };
            let new_version = conflict.local.version.max(conflict.remote.version) + 1;

            write_winner(
                &tx,
                &conflict,
                winner,
                new_version,
                winner_deleted,
                &self.device_id,
            )?;
            sync_repo.enqueue_change(conflict.entity, &conflict.entity_id, unix_millis_now())?;
            sync_repo.delete_conflict(&conflict.id)?;

            tracing::info!(
                entity = %conflict.entity,
                entity_id = %conflict.entity_id,
                ?op,
                new_version,
                "conflict resolved"
            );
        }
        tx.commit()?;
        Ok(())
    }
}

/// Field-level reconciliation of two snapshots.
///
/// List-valued fields union their elements (deduplicated, canonically
/// ordered), so merging is commutative. Scalar fields take the side that
/// was updated more recently; ties break on version, then device id, so the
/// choice is deterministic on both devices.
fn merge_snapshots(local: &ConflictSide, remote: &ConflictSide) -> Value {
    let local_rank = (local.updated_at, local.version, &local.device_id);
    let remote_rank = (remote.updated_at, remote.version, &remote.device_id);
    let (newer, older) = if local_rank >= remote_rank {
        (&local.snapshot, &remote.snapshot)
    } else {
        (&remote.snapshot, &local.snapshot)
    };

    let (Some(newer_map), Some(older_map)) = (newer.as_object(), older.as_object()) else {
        return newer.clone();
    };

    let mut merged = Map::new();
    let keys: std::collections::BTreeSet<&String> =
        newer_map.keys().chain(older_map.keys()).collect();
    for key in keys {
        let value = match (older_map.get(key), newer_map.get(key)) {
            (Some(Value::Array(a)), Some(Value::Array(b))) => Value::Array(union_lists(a, b)),
            (_, Some(newer_value)) => newer_value.clone(),
            (Some(older_value), None) => older_value.clone(),
            (None, None) => continue,
        };
        merged.insert(key.clone(), value);
    }
    Value::Object(merged)
}

/// Order-insensitive union of two JSON arrays.
fn union_lists(a: &[Value], b: &[Value]) -> Vec<Value> {
    let mut items: Vec<Value> = a.iter().chain(b.iter()).cloned().collect();
    items.sort_by_key(|v| v.to_string());
    items.dedup();
    items
}

/// Write the winning snapshot with its bumped version stamp.
///
/// The remote's current version stays the CAS base, so the follow-up push
/// of the resolution is accepted without a second round-trip.
fn write_winner(
    conn: &Connection,
    conflict: &SyncConflict,
    winner: Value,
    new_version: i64,
    is_deleted: bool,
    device_id: &str,
) -> Result<()> {
    let base_version = conflict.remote.version;
    let updated_at = unix_millis_now();
    match conflict.entity {
        EntityKind::Visit => {
            let mut visit: PlaceVisit = serde_json::from_value(winner)?;
            visit.version = new_version;
            visit.device_id = device_id.to_string();
            visit.updated_at = updated_at;
            SqliteVisitRepository::new(conn).put(&StoredVisit {
                visit,
                base_version,
                is_deleted,
            })
        }
        EntityKind::Segment => {
            let mut segment: RouteSegment = serde_json::from_value(winner)?;
            segment.version = new_version;
            segment.device_id = device_id.to_string();
            segment.updated_at = updated_at;
            SqliteSegmentRepository::new(conn).put(&StoredSegment {
                segment,
                base_version,
                is_deleted,
            })
        }
        EntityKind::Trip => {
            let mut trip: Trip = serde_json::from_value(winner)?;
            trip.version = new_version;
            trip.device_id = device_id.to_string();
            trip.updated_at = updated_at;
            SqliteTripRepository::new(conn).put(&StoredTrip {
                trip,
                base_version,
                is_deleted,
            })
        }
    }
}
