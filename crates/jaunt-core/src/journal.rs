//! Read-side query service and the user-intent mutation surface.
//!
//! Everything the UI layer touches goes through here: immutable snapshots
//! out, explicit user operations in. Trip detection and aggregation are
//! serialized per user behind one lock; they may run alongside ingestion of
//! future samples but never alongside each other.

use std::sync::Mutex;

use crate::aggregate::{Period, PeriodSummary, TripDayAggregator};
use crate::config::TrackingConfig;
use crate::db::{
    SampleRepository, SegmentRepository, SharedDatabase, SqliteSampleRepository,
    SqliteSegmentRepository, SqliteSyncStateRepository, SqliteTripRepository,
    SqliteVisitRepository, SyncStateRepository, TripRepository, VisitRepository,
};
use crate::detect::TripDetector;
use crate::error::{Error, Result};
use crate::models::{
    ConflictId, EntityKind, PlaceVisit, RouteSegment, SyncConflict, Trip, TripId, VisitId,
};
use crate::sync::{ConflictResolver, ResolutionOp};
use crate::util::{normalize_text_option, unix_millis_now};

/// Facade over the store for queries, user edits, and on-demand detection.
pub struct Journal {
    db: SharedDatabase,
    config: TrackingConfig,
    device_id: String,
    aggregator: TripDayAggregator,
    /// Serializes trip detection and aggregation for this user.
    detect_lock: Mutex<()>,
}

impl Journal {
    pub fn new(db: SharedDatabase, config: TrackingConfig, device_id: impl Into<String>) -> Self {
        Self {
            db,
            config,
            device_id: device_id.into(),
            aggregator: TripDayAggregator::default(),
            detect_lock: Mutex::new(()),
        }
    }

    /// Live visits arriving in `[start_ms, end_ms)`.
    pub fn visits(&self, start_ms: i64, end_ms: i64) -> Result<Vec<PlaceVisit>> {
        let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        SqliteVisitRepository::new(db.conn()).list_in_window(start_ms, end_ms)
    }

    /// Live segments starting in `[start_ms, end_ms)`.
    pub fn segments(&self, start_ms: i64, end_ms: i64) -> Result<Vec<RouteSegment>> {
        let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        SqliteSegmentRepository::new(db.conn()).list_in_window(start_ms, end_ms)
    }

    /// Live trips overlapping `[start_ms, end_ms)`.
    pub fn trips(&self, start_ms: i64, end_ms: i64) -> Result<Vec<Trip>> {
        let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        SqliteTripRepository::new(db.conn()).list_overlapping(start_ms, end_ms)
    }

    /// Unresolved sync conflicts, oldest first.
    pub fn pending_conflicts(&self) -> Result<Vec<SyncConflict>> {
        let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        SqliteSyncStateRepository::new(db.conn()).list_conflicts()
    }

    /// Aggregate a period from stored records. Pure and recomputable; the
    /// same records always produce the same summary.
    pub fn summary(&self, period: Period) -> Result<PeriodSummary> {
        let _serialize = self.detect_lock.lock().unwrap_or_else(|e| e.into_inner());
        let (start_ms, end_ms) = period.window_ms();
        let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        let conn = db.conn();
        let trips = SqliteTripRepository::new(conn).list_overlapping(start_ms, end_ms)?;
        let visits = SqliteVisitRepository::new(conn).list_in_window(start_ms, end_ms)?;
        let segments = SqliteSegmentRepository::new(conn).list_in_window(start_ms, end_ms)?;
        Ok(self.aggregator.summarize(period, &trips, &visits, &segments))
    }

    /// Set or clear the user label on a visit.
    pub fn set_label(&self, id: &VisitId, label: Option<String>) -> Result<PlaceVisit> {
        self.edit_visit(id, |visit| visit.user_label = normalize_text_option(label.clone()))
    }

    /// Set or clear the user notes on a visit.
    pub fn set_notes(&self, id: &VisitId, notes: Option<String>) -> Result<PlaceVisit> {
        self.edit_visit(id, |visit| visit.user_notes = normalize_text_option(notes.clone()))
    }

    /// Mark or unmark a visit as a favorite.
    pub fn set_favorite(&self, id: &VisitId, is_favorite: bool) -> Result<PlaceVisit> {
        self.edit_visit(id, |visit| visit.is_favorite = is_favorite)
    }

    /// Apply a user decision to a pending conflict (oldest first).
    pub fn resolve_conflict(&self, id: &ConflictId, op: ResolutionOp) -> Result<()> {
        ConflictResolver::new(self.db.clone(), self.device_id.clone()).resolve(id, op)
    }

    /// Create a user-authored trip. Never touched by the detector.
    pub fn add_user_trip(
        &self,
        start_ms: i64,
        end_ms: i64,
        display_name: impl Into<String>,
    ) -> Result<Trip> {
        let trip = Trip::user_created(start_ms, end_ms, display_name, self.device_id.clone());
        let mut db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        let tx = db.transaction()?;
        {
            SqliteTripRepository::new(&tx).insert(&trip)?;
            SqliteSyncStateRepository::new(&tx).enqueue_change(
                EntityKind::Trip,
                &trip.id.as_str(),
                unix_millis_now(),
            )?;
        }
        tx.commit()?;
        Ok(trip)
    }

    /// Run trip detection over a window and reconcile the results with the
    /// store. Auto-detected trips are keyed by their start time: an existing
    /// trip with the same start is updated in place (closing it if the new
    /// run closed it), unmatched leftovers are tombstoned, and unchanged
    /// trips are left untouched so re-runs are idempotent. User-created
    /// trips are never examined.
    pub fn detect_trips(&self, start_ms: i64, end_ms: i64) -> Result<Vec<Trip>> {
        let _serialize = self.detect_lock.lock().unwrap_or_else(|e| e.into_inner());
        let detector = TripDetector::new(self.config.clone());

        let mut db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        let tx = db.transaction()?;
        let mut result = Vec::new();
        {
            let visit_repo = SqliteVisitRepository::new(&tx);
            let segment_repo = SqliteSegmentRepository::new(&tx);
            let trip_repo = SqliteTripRepository::new(&tx);
            let sync_repo = SqliteSyncStateRepository::new(&tx);
            let now_ms = unix_millis_now();

            let visits = visit_repo.list_in_window(start_ms, end_ms)?;
            let segments = segment_repo.list_in_window(start_ms, end_ms)?;
            let drafts = detector.detect(&visits, &segments);

            let mut existing = trip_repo.list_auto_in_window(start_ms, end_ms)?;

            for draft in drafts {
                let matched = existing
                    .iter()
                    .position(|t| t.start_ms == draft.start_ms)
                    .map(|i| existing.remove(i));

                let trip = match matched {
                    Some(mut trip) => {
                        if trip.end_ms != draft.end_ms {
                            match draft.end_ms {
                                Some(end) => trip.close(end),
                                None => {
                                    trip.end_ms = None;
                                    trip.is_ongoing = true;
                                }
                            }
                            trip.touch(&self.device_id);
                            trip_repo.update(&trip)?;
                            sync_repo.enqueue_change(
                                EntityKind::Trip,
                                &trip.id.as_str(),
                                now_ms,
                            )?;
                        }
                        trip
                    }
                    None => {
                        let mut trip = Trip::auto_detected(draft.start_ms, self.device_id.clone());
                        if let Some(end) = draft.end_ms {
                            trip.close(end);
                        }
                        trip.summary = format!(
                            "{} visits, {} segments",
                            draft.visit_ids.len(),
                            draft.segment_ids.len()
                        );
                        trip_repo.insert(&trip)?;
                        sync_repo.enqueue_change(EntityKind::Trip, &trip.id.as_str(), now_ms)?;
                        trip
                    }
                };

                self.assign_members(
                    &visit_repo,
                    &segment_repo,
                    &sync_repo,
                    &visits,
                    &segments,
                    &draft.visit_ids,
                    &draft.segment_ids,
                    trip.id,
                    now_ms,
                )?;
                result.push(trip);
            }

            // Auto trips no longer backed by any boundary are stale.
            for orphan in existing {
                trip_repo.mark_deleted(&orphan.id, &self.device_id)?;
                sync_repo.enqueue_change(EntityKind::Trip, &orphan.id.as_str(), now_ms)?;
                tracing::debug!(trip_id = %orphan.id, "stale auto-detected trip removed");
            }
        }
        tx.commit()?;
        Ok(result)
    }

    /// Drop samples past the retention window. Returns rows removed.
    pub fn prune_samples(&self) -> Result<usize> {
        let cutoff_ms = unix_millis_now() - self.config.sample_retention_days * 86_400_000;
        let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        SqliteSampleRepository::new(db.conn()).prune_before(cutoff_ms)
    }

    fn edit_visit(
        &self,
        id: &VisitId,
        apply: impl Fn(&mut PlaceVisit),
    ) -> Result<PlaceVisit> {
        let mut db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        let tx = db.transaction()?;
        let visit = {
            let visit_repo = SqliteVisitRepository::new(&tx);
            let mut visit = visit_repo
                .get(id)?
                .ok_or_else(|| Error::not_found("visit", id.to_string()))?;
            apply(&mut visit);
            visit.touch(&self.device_id);
            visit_repo.update(&visit)?;
            SqliteSyncStateRepository::new(&tx).enqueue_change(
                EntityKind::Visit,
                &visit.id.as_str(),
                unix_millis_now(),
            )?;
            visit
        };
        tx.commit()?;
        Ok(visit)
    }

    /// Point members at their trip, bumping versions only where membership
    /// actually changed.
    #[allow(clippy::too_many_arguments)]
    fn assign_members(
        &self,
        visit_repo: &SqliteVisitRepository<'_>,
        segment_repo: &SqliteSegmentRepository<'_>,
        sync_repo: &SqliteSyncStateRepository<'_>,
        visits: &[PlaceVisit],
        segments: &[RouteSegment],
        visit_ids: &[VisitId],
        segment_ids: &[crate::models::SegmentId],
        trip_id: TripId,
        now_ms: i64,
    ) -> Result<()> {
        for id in visit_ids {
            let Some(visit) = visits.iter().find(|v| v.id == *id) else {
                continue;
            };
            if visit.trip_id != Some(trip_id) {
                let mut visit = visit.clone();
                visit.trip_id = Some(trip_id);
                visit.touch(&self.device_id);
                visit_repo.update(&visit)?;
                sync_repo.enqueue_change(EntityKind::Visit, &visit.id.as_str(), now_ms)?;
            }
        }
        for id in segment_ids {
            let Some(segment) = segments.iter().find(|s| s.id == *id) else {
                continue;
            };
            if segment.trip_id != Some(trip_id) {
                let mut segment = segment.clone();
                segment.trip_id = Some(trip_id);
                segment.touch(&self.device_id);
                segment_repo.update(&segment)?;
                sync_repo.enqueue_change(EntityKind::Segment, &segment.id.as_str(), now_ms)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::geo::Coordinate;

    const HOUR_MS: i64 = 3_600_000;

    fn journal() -> Journal {
        let db = Database::open_in_memory().unwrap().into_shared();
        Journal::new(db, TrackingConfig::default(), "device-a")
    }

    fn insert_visit(journal: &Journal, arrival_ms: i64, duration_ms: i64) -> PlaceVisit {
        let visit = PlaceVisit::new(
            Coordinate::new(51.5, -0.12),
            30.0,
            arrival_ms,
            Some(arrival_ms + duration_ms),
            "device-a",
        );
        let db = journal.db.lock().unwrap();
        SqliteVisitRepository::new(db.conn()).insert(&visit).unwrap();
        visit
    }

    fn insert_segment(journal: &Journal, start_ms: i64, distance_m: f64) -> RouteSegment {
        let mut segment = RouteSegment::new(
            start_ms,
            start_ms + 30 * 60_000,
            Coordinate::new(51.5, -0.12),
            Coordinate::new(51.6, -0.1),
            "device-a",
        );
        segment.distance_m = distance_m;
        segment.confidence = 0.9;
        let db = journal.db.lock().unwrap();
        SqliteSegmentRepository::new(db.conn())
            .insert(&segment)
            .unwrap();
        segment
    }

    #[test]
    fn user_edits_bump_version_and_queue() {
        let j = journal();
        let visit = insert_visit(&j, 1_000, HOUR_MS);

        let updated = j.set_label(&visit.id, Some("Harbour cafe".to_string())).unwrap();
        assert_eq!(updated.user_label.as_deref(), Some("Harbour cafe"));
        assert_eq!(updated.version, 2);

        let favored = j.set_favorite(&visit.id, true).unwrap();
        assert!(favored.is_favorite);
        assert_eq!(favored.version, 3);

        let noted = j
            .set_notes(&visit.id, Some("good flat white".to_string()))
            .unwrap();
        assert_eq!(noted.user_notes.as_deref(), Some("good flat white"));
        assert_eq!(noted.version, 4);

        let db = j.db.lock().unwrap();
        let sync_repo = SqliteSyncStateRepository::new(db.conn());
        assert!(sync_repo.is_pending(EntityKind::Visit, &visit.id.as_str()).unwrap());
    }

    #[test]
    fn blank_label_clears() {
        let j = journal();
        let visit = insert_visit(&j, 1_000, HOUR_MS);
        j.set_label(&visit.id, Some("Cafe".to_string())).unwrap();
        let cleared = j.set_label(&visit.id, Some("   ".to_string())).unwrap();
        assert_eq!(cleared.user_label, None);
    }

    #[test]
    fn detect_trips_creates_then_reruns_idempotently() {
        let j = journal();
        let segment = insert_segment(&j, 0, 8_000.0);
        let stay = insert_visit(&j, segment.end_ms + 60_000, 3 * HOUR_MS);

        let first = j.detect_trips(0, 24 * HOUR_MS).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].end_ms, Some(stay.arrival_ms));
        assert!(first[0].is_auto_detected);

        // Members are linked
        let visits = j.visits(0, 24 * HOUR_MS).unwrap();
        assert_eq!(visits[0].trip_id, Some(first[0].id));

        // Re-run over unchanged inputs: same trip, same id, no churn
        let second = j.detect_trips(0, 24 * HOUR_MS).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, first[0].id);
        assert_eq!(second[0].version, first[0].version);
    }

    #[test]
    fn stale_auto_trips_are_removed() {
        let j = journal();
        // Seed an auto trip with no backing records
        {
            let db = j.db.lock().unwrap();
            let trip = Trip::auto_detected(1_000, "device-a");
            SqliteTripRepository::new(db.conn()).insert(&trip).unwrap();
        }

        let detected = j.detect_trips(0, 24 * HOUR_MS).unwrap();
        assert!(detected.is_empty());
        assert!(j.trips(0, 24 * HOUR_MS).unwrap().is_empty());
    }

    #[test]
    fn user_trips_are_untouched_by_detection() {
        let j = journal();
        let mine = j.add_user_trip(1_000, 2 * HOUR_MS, "My weekend").unwrap();
        assert!(!mine.is_auto_detected);

        j.detect_trips(0, 24 * HOUR_MS).unwrap();

        let trips = j.trips(0, 24 * HOUR_MS).unwrap();
        assert_eq!(trips.len(), 1);
        assert_eq!(trips[0].id, mine.id);
        assert_eq!(trips[0].version, mine.version);
    }

    #[test]
    fn open_trip_closes_on_next_detection_batch() {
        let j = journal();
        let segment = insert_segment(&j, 0, 8_000.0);
        // Window ends while the traveler is still out: open trip
        let first = j.detect_trips(0, segment.end_ms + 1).unwrap();
        assert_eq!(first.len(), 1);
        assert!(first[0].is_ongoing);

        // The long stay lands in the next batch; same trip closes
        let stay = insert_visit(&j, segment.end_ms + 60_000, 3 * HOUR_MS);
        let second = j.detect_trips(0, 24 * HOUR_MS).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, first[0].id);
        assert_eq!(second[0].end_ms, Some(stay.arrival_ms));
        assert!(!second[0].is_ongoing);
    }

    #[test]
    fn summary_reflects_store_contents() {
        let j = journal();
        insert_visit(&j, 1_000, HOUR_MS);
        insert_segment(&j, HOUR_MS + 2_000, 8_000.0);

        let date = chrono::DateTime::from_timestamp_millis(1_000)
            .unwrap()
            .date_naive();
        let summary = j.summary(Period::Day(date)).unwrap();
        assert_eq!(summary.visit_count, 1);
        assert!((summary.total_distance_m - 8_000.0).abs() < 1e-9);
    }
}
