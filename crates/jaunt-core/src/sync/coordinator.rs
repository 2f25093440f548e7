//! Push/pull sync cycle with optimistic concurrency.
//!
//! One cycle = pull remote changes in log order, then push queued local
//! changes with compare-and-swap expectations. Version mismatches become
//! persisted conflicts for the user; they are never auto-resolved here.

use std::time::Duration;

use rand::Rng;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::config::SyncSettings;
use crate::db::{
    SharedDatabase, SqliteSegmentRepository, SqliteSyncStateRepository, SqliteTripRepository,
    SqliteVisitRepository, SegmentRepository, StoredSegment, StoredTrip, StoredVisit,
    SyncStateRepository, TripRepository, VisitRepository,
};
use crate::error::{Error, Result};
use crate::models::{
    ConflictId, ConflictKind, ConflictSide, EntityKind, PlaceVisit, RouteSegment, SyncConflict,
    Trip,
};
use crate::util::unix_millis_now;

use super::protocol::{ChangeEnvelope, PushChange, PushRequest};
use super::transport::SyncTransport;

/// Cooperative cancellation for an in-flight sync cycle.
///
/// Checked between entities; a cancelled cycle leaves every partially pushed
/// entity in a retry-safe state (push is CAS, so retrying is idempotent).
#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// A token that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Handle that cancels tokens handed out via [`CancelSource::token`].
pub struct CancelSource {
    tx: watch::Sender<bool>,
}

impl CancelSource {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of one sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncReport {
    pub pulled_applied: u64,
    pub pull_conflicts: u64,
    pub pushed_accepted: u64,
    pub push_conflicts: u64,
    /// Pushes parked after exhausting retries; retried next cycle.
    pub parked: u64,
    /// Queued changes held back because their entity has an open conflict.
    pub held_back: u64,
    pub cancelled: bool,
    /// True when this call coalesced into an already running cycle.
    pub joined: bool,
    pub cursor: i64,
    /// Highest remote log sequence acknowledged for our pushes this cycle.
    pub pushed_log_seq: i64,
}

/// Drives the push/pull protocol against a [`SyncTransport`].
///
/// Single-flight: a second `sync()` while one is running does not start a
/// second cycle; it waits for the in-flight one and returns its report.
pub struct SyncCoordinator<T> {
    transport: T,
    db: SharedDatabase,
    settings: SyncSettings,
    flight: tokio::sync::Mutex<()>,
    last_report: std::sync::Mutex<SyncReport>,
}

impl<T: SyncTransport> SyncCoordinator<T> {
    pub fn new(transport: T, db: SharedDatabase, settings: SyncSettings) -> Self {
        Self {
            transport,
            db,
            settings,
            flight: tokio::sync::Mutex::new(()),
            last_report: std::sync::Mutex::new(SyncReport::default()),
        }
    }

    /// Run one sync cycle: pull, then push.
    pub async fn sync(&self, cancel: &CancelToken) -> Result<SyncReport> {
        let Ok(_guard) = self.flight.try_lock() else {
            // Coalesce: wait out the in-flight cycle and hand back its report.
            let _guard = self.flight.lock().await;
            let mut report = *self.last_report.lock().unwrap_or_else(|e| e.into_inner());
            report.joined = true;
            return Ok(report);
        };

        let mut report = SyncReport::default();
        match self.pull_phase(cancel, &mut report).await {
            Ok(()) => {}
            Err(error) if error.is_transient() => {
                // Retries inside the phase are exhausted; surface nothing,
                // the next scheduled cycle resumes from the saved cursor.
                tracing::warn!(%error, "pull failed; deferring to next cycle");
            }
            Err(error) => {
                self.save_state(&mut report)?;
                return Err(error);
            }
        }

        let push_outcome = if report.cancelled {
            Ok(())
        } else {
            self.push_phase(cancel, &mut report).await
        };
        self.save_state(&mut report)?;
        push_outcome?;

        *self.last_report.lock().unwrap_or_else(|e| e.into_inner()) = report;
        Ok(report)
    }

    /// Most recent completed cycle's report.
    pub fn last_report(&self) -> SyncReport {
        *self.last_report.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Persist device-level progress regardless of how the cycle ended.
    fn save_state(&self, report: &mut SyncReport) -> Result<()> {
        let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        let sync_repo = SqliteSyncStateRepository::new(db.conn());
        let mut state = sync_repo.get_device_state(&self.settings.device_id)?;
        state.last_pull_cursor = report.cursor.max(state.last_pull_cursor);
        state.last_push_version = report.pushed_log_seq.max(state.last_push_version);
        state.pending_push_count = sync_repo.pending_count()?;
        state.pending_conflict_count = sync_repo.conflict_count()?;
        report.cursor = state.last_pull_cursor;
        sync_repo.save_device_state(&state)?;
        Ok(())
    }

    async fn pull_phase(&self, cancel: &CancelToken, report: &mut SyncReport) -> Result<()> {
        let mut cursor = {
            let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
            SqliteSyncStateRepository::new(db.conn())
                .get_device_state(&self.settings.device_id)?
                .last_pull_cursor
        };
        report.cursor = cursor;

        loop {
            if cancel.is_cancelled() {
                report.cancelled = true;
                return Ok(());
            }

            let page = self
                .with_retries(cancel, || {
                    self.transport
                        .pull_changes(cursor, self.settings.pull_page_size)
                })
                .await?;

            let page_len = page.changes.len();
            for envelope in page.changes {
                if cancel.is_cancelled() {
                    report.cancelled = true;
                    return Ok(());
                }
                // One transaction per entity, applied in remote log order.
                let mut db = self.db.lock().unwrap_or_else(|e| e.into_inner());
                let tx = db.transaction()?;
                self.apply_pulled(&tx, &envelope, report)?;
                tx.commit()?;
            }

            cursor = page.new_cursor;
            report.cursor = cursor;

            if page_len < self.settings.pull_page_size {
                return Ok(());
            }
        }
    }

    /// Apply one pulled change, or record a conflict if the entity has
    /// unpushed local edits. A pull never overwrites local changes.
    fn apply_pulled(
        &self,
        conn: &Connection,
        envelope: &ChangeEnvelope,
        report: &mut SyncReport,
    ) -> Result<()> {
        // Our own accepted pushes echo back through the log; they are
        // already reflected locally.
        if envelope.device_id == self.settings.device_id {
            return Ok(());
        }

        let sync_repo = SqliteSyncStateRepository::new(conn);
        if sync_repo.is_pending(envelope.entity, &envelope.entity_id)? {
            if let Some(local) = load_side(conn, envelope.entity, &envelope.entity_id)? {
                let conflict = build_conflict(envelope, local);
                sync_repo.insert_conflict(&conflict)?;
                report.pull_conflicts += 1;
                tracing::info!(
                    entity = %envelope.entity,
                    entity_id = %envelope.entity_id,
                    kind = conflict.kind.as_str(),
                    "pull raised a conflict"
                );
                return Ok(());
            }
        }

        match apply_envelope(conn, envelope) {
            Ok(()) => {
                report.pulled_applied += 1;
                Ok(())
            }
            Err(Error::InvalidEntity { kind, reason }) => {
                // Malformed remote payloads are dropped, not fatal.
                tracing::warn!(kind, reason, "pulled entity failed validation; skipped");
                Ok(())
            }
            Err(Error::Serialization(error)) => {
                tracing::warn!(%error, "pulled payload undecodable; skipped");
                Ok(())
            }
            Err(other) => Err(other),
        }
    }

    async fn push_phase(&self, cancel: &CancelToken, report: &mut SyncReport) -> Result<()> {
        let pending = {
            let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
            SqliteSyncStateRepository::new(db.conn()).list_pending()?
        };

        for change in pending {
            if cancel.is_cancelled() {
                report.cancelled = true;
                return Ok(());
            }

            let prepared = {
                let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
                let conn = db.conn();
                let sync_repo = SqliteSyncStateRepository::new(conn);

                // An entity with an unresolved conflict is held back until
                // the user decides; pushing would race the resolution.
                if sync_repo.has_conflict_for(change.entity, &change.entity_id)? {
                    report.held_back += 1;
                    continue;
                }

                match load_push_change(conn, change.entity, &change.entity_id)? {
                    Some(prepared) => prepared,
                    None => {
                        // Queued entity no longer exists; drop the stale entry.
                        sync_repo.remove_pending(change.entity, &change.entity_id)?;
                        continue;
                    }
                }
            };

            let request = PushRequest {
                device_id: self.settings.device_id.clone(),
                changes: vec![prepared],
            };

            match self
                .with_retries(cancel, || self.transport.push_changes(&request))
                .await
            {
                Ok(response) => {
                    let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
                    let conn = db.conn();
                    let sync_repo = SqliteSyncStateRepository::new(conn);

                    for accepted in response.accepted {
                        set_base_version(conn, accepted.entity, &accepted.entity_id)?;
                        sync_repo.remove_pending(accepted.entity, &accepted.entity_id)?;
                        report.pushed_accepted += 1;
                        report.pushed_log_seq = report.pushed_log_seq.max(accepted.log_seq);
                    }
                    for rejected in response.conflicts {
                        let envelope = rejected.remote;
                        if let Some(local) =
                            load_side(conn, envelope.entity, &envelope.entity_id)?
                        {
                            let conflict = build_conflict(&envelope, local);
                            tracing::info!(
                                entity = %envelope.entity,
                                entity_id = %envelope.entity_id,
                                kind = conflict.kind.as_str(),
                                "push rejected by remote; conflict recorded"
                            );
                            sync_repo.insert_conflict(&conflict)?;
                            sync_repo.remove_pending(envelope.entity, &envelope.entity_id)?;
                            report.push_conflicts += 1;
                        }
                    }
                }
                Err(error) if error.is_transient() => {
                    // Parked: stays queued for the next scheduled cycle.
                    tracing::warn!(%error, entity_id = %change.entity_id, "push parked");
                    report.parked += 1;
                }
                Err(error) => return Err(error),
            }

            if cancel.is_cancelled() {
                report.cancelled = true;
                return Ok(());
            }
        }

        Ok(())
    }

    /// Run a transport call with exponential backoff and jitter on transient
    /// failures, up to the configured attempt limit.
    async fn with_retries<F, Fut, R>(&self, cancel: &CancelToken, mut call: F) -> Result<R>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<R>>,
    {
        let mut attempt = 0u32;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_transient() => {
                    attempt += 1;
                    if attempt >= self.settings.max_push_attempts || cancel.is_cancelled() {
                        return Err(error);
                    }
                    let delay = self.settings.backoff_delay(attempt - 1);
                    tokio::time::sleep(jittered(delay)).await;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

/// Spread retries out by up to 25% so devices that failed together do not
/// retry together.
fn jittered(delay: Duration) -> Duration {
    let ms = delay.as_millis() as u64;
    let jitter = rand::thread_rng().gen_range(0..=ms / 4);
    Duration::from_millis(ms + jitter)
}

fn build_conflict(remote_envelope: &ChangeEnvelope, local: ConflictSide) -> SyncConflict {
    let remote = ConflictSide {
        snapshot: remote_envelope.payload.clone(),
        version: remote_envelope.version,
        device_id: remote_envelope.device_id.clone(),
        updated_at: remote_envelope.updated_at,
        is_deleted: remote_envelope.is_deleted,
    };
    let kind = if local.is_deleted || remote.is_deleted {
        ConflictKind::DeletionConflict
    } else if remote.device_id != local.device_id {
        ConflictKind::ConcurrentModification
    } else {
        ConflictKind::VersionMismatch
    };
    SyncConflict {
        id: ConflictId::new(),
        entity: remote_envelope.entity,
        entity_id: remote_envelope.entity_id.clone(),
        kind,
        local,
        remote,
        detected_at_ms: unix_millis_now(),
    }
}

/// Local entity state as one side of a conflict.
fn load_side(conn: &Connection, entity: EntityKind, entity_id: &str) -> Result<Option<ConflictSide>> {
    let side = match entity {
        EntityKind::Visit => SqliteVisitRepository::new(conn)
            .get_stored(&entity_id.parse().map_err(bad_id)?)?
            .map(|s| {
                Ok::<_, Error>(ConflictSide {
                    snapshot: serde_json::to_value(&s.visit)?,
                    version: s.visit.version,
                    device_id: s.visit.device_id.clone(),
                    updated_at: s.visit.updated_at,
                    is_deleted: s.is_deleted,
                })
            })
            .transpose()?,
        EntityKind::Segment => SqliteSegmentRepository::new(conn)
            .get_stored(&entity_id.parse().map_err(bad_id)?)?
            .map(|s| {
                Ok::<_, Error>(ConflictSide {
                    snapshot: serde_json::to_value(&s.segment)?,
                    version: s.segment.version,
                    device_id: s.segment.device_id.clone(),
                    updated_at: s.segment.updated_at,
                    is_deleted: s.is_deleted,
                })
            })
            .transpose()?,
        EntityKind::Trip => SqliteTripRepository::new(conn)
            .get_stored(&entity_id.parse().map_err(bad_id)?)?
            .map(|s| {
                Ok::<_, Error>(ConflictSide {
                    snapshot: serde_json::to_value(&s.trip)?,
                    version: s.trip.version,
                    device_id: s.trip.device_id.clone(),
                    updated_at: s.trip.updated_at,
                    is_deleted: s.is_deleted,
                })
            })
            .transpose()?,
    };
    Ok(side)
}

/// Decode and store a pulled envelope; the remote version becomes the base.
fn apply_envelope(conn: &Connection, envelope: &ChangeEnvelope) -> Result<()> {
    match envelope.entity {
        EntityKind::Visit => {
            let visit: PlaceVisit = serde_json::from_value(envelope.payload.clone())?;
            SqliteVisitRepository::new(conn).apply_remote(&StoredVisit {
                visit,
                base_version: envelope.version,
                is_deleted: envelope.is_deleted,
            })
        }
        EntityKind::Segment => {
            let segment: RouteSegment = serde_json::from_value(envelope.payload.clone())?;
            SqliteSegmentRepository::new(conn).apply_remote(&StoredSegment {
                segment,
                base_version: envelope.version,
                is_deleted: envelope.is_deleted,
            })
        }
        EntityKind::Trip => {
            let trip: Trip = serde_json::from_value(envelope.payload.clone())?;
            SqliteTripRepository::new(conn).apply_remote(&StoredTrip {
                trip,
                base_version: envelope.version,
                is_deleted: envelope.is_deleted,
            })
        }
    }
}

/// Build the CAS push for a queued entity from its stored row.
fn load_push_change(
    conn: &Connection,
    entity: EntityKind,
    entity_id: &str,
) -> Result<Option<PushChange>> {
    let change = match entity {
        EntityKind::Visit => SqliteVisitRepository::new(conn)
            .get_stored(&entity_id.parse().map_err(bad_id)?)?
            .map(|s| {
                Ok::<_, Error>(PushChange {
                    envelope: ChangeEnvelope {
                        entity,
                        entity_id: entity_id.to_string(),
                        version: s.visit.version,
                        device_id: s.visit.device_id.clone(),
                        updated_at: s.visit.updated_at,
                        is_deleted: s.is_deleted,
                        payload: serde_json::to_value(&s.visit)?,
                    },
                    expected_version: s.base_version,
                })
            })
            .transpose()?,
        EntityKind::Segment => SqliteSegmentRepository::new(conn)
            .get_stored(&entity_id.parse().map_err(bad_id)?)?
            .map(|s| {
                Ok::<_, Error>(PushChange {
                    envelope: ChangeEnvelope {
                        entity,
                        entity_id: entity_id.to_string(),
                        version: s.segment.version,
                        device_id: s.segment.device_id.clone(),
                        updated_at: s.segment.updated_at,
                        is_deleted: s.is_deleted,
                        payload: serde_json::to_value(&s.segment)?,
                    },
                    expected_version: s.base_version,
                })
            })
            .transpose()?,
        EntityKind::Trip => SqliteTripRepository::new(conn)
            .get_stored(&entity_id.parse().map_err(bad_id)?)?
            .map(|s| {
                Ok::<_, Error>(PushChange {
                    envelope: ChangeEnvelope {
                        entity,
                        entity_id: entity_id.to_string(),
                        version: s.trip.version,
                        device_id: s.trip.device_id.clone(),
                        updated_at: s.trip.updated_at,
                        is_deleted: s.is_deleted,
                        payload: serde_json::to_value(&s.trip)?,
                    },
                    expected_version: s.base_version,
                })
            })
            .transpose()?,
    };
    Ok(change)
}

/// After an accepted push, the entity's own version is the new base.
fn set_base_version(conn: &Connection, entity: EntityKind, entity_id: &str) -> Result<()> {
    match entity {
        EntityKind::Visit => {
            let repo = SqliteVisitRepository::new(conn);
            let id = entity_id.parse().map_err(bad_id)?;
            if let Some(s) = repo.get_stored(&id)? {
                repo.set_base_version(&id, s.visit.version)?;
            }
        }
        EntityKind::Segment => {
            let repo = SqliteSegmentRepository::new(conn);
            let id = entity_id.parse().map_err(bad_id)?;
            if let Some(s) = repo.get_stored(&id)? {
                repo.set_base_version(&id, s.segment.version)?;
            }
        }
        EntityKind::Trip => {
            let repo = SqliteTripRepository::new(conn);
            let id = entity_id.parse().map_err(bad_id)?;
            if let Some(s) = repo.get_stored(&id)? {
                repo.set_base_version(&id, s.trip.version)?;
            }
        }
    }
    Ok(())
}

fn bad_id(error: uuid::Error) -> Error {
    Error::InvalidInput(format!("malformed entity id: {error}"))
}
