//! Multi-device sync scenarios against an in-memory CAS remote.

use std::sync::Arc;

use jaunt_core::config::{SyncSettings, TrackingConfig};
use jaunt_core::db::{
    Database, SharedDatabase, SqliteSyncStateRepository, SqliteVisitRepository,
    SyncStateRepository, VisitRepository,
};
use jaunt_core::geo::Coordinate;
use jaunt_core::models::{ConflictKind, EntityKind, PlaceVisit};
use jaunt_core::sync::{
    CancelSource, CancelToken, ChangeEnvelope, ConflictResolver, InMemoryRemote, PushChange,
    PushRequest, SyncCoordinator, SyncTransport,
};
use jaunt_core::Journal;

const HOUR_MS: i64 = 3_600_000;

struct Device {
    name: String,
    db: SharedDatabase,
    journal: Journal,
    coordinator: SyncCoordinator<Arc<InMemoryRemote>>,
    resolver: ConflictResolver,
}

fn device(name: &str, remote: &Arc<InMemoryRemote>) -> Device {
    let db = Database::open_in_memory().unwrap().into_shared();
    let settings = SyncSettings {
        backoff_base_ms: 1,
        backoff_cap_ms: 4,
        ..SyncSettings::for_device(name)
    };
    Device {
        name: name.to_string(),
        db: db.clone(),
        journal: Journal::new(db.clone(), TrackingConfig::default(), name),
        coordinator: SyncCoordinator::new(remote.clone(), db.clone(), settings),
        resolver: ConflictResolver::new(db, name),
    }
}

fn seed_visit(device: &Device) -> PlaceVisit {
    let visit = PlaceVisit::new(
        Coordinate::new(51.5, -0.12),
        30.0,
        1_000,
        Some(1_000 + HOUR_MS),
        "device-a",
    );
    let db = device.db.lock().unwrap();
    SqliteVisitRepository::new(db.conn()).insert(&visit).unwrap();
    SqliteSyncStateRepository::new(db.conn())
        .enqueue_change(EntityKind::Visit, &visit.id.as_str(), 1_000)
        .unwrap();
    visit
}

fn visit_on(device: &Device, visit: &PlaceVisit) -> PlaceVisit {
    let db = device.db.lock().unwrap();
    SqliteVisitRepository::new(db.conn())
        .get(&visit.id)
        .unwrap()
        .expect("visit present")
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_label_edits_yield_exactly_one_conflict() {
    let remote = Arc::new(InMemoryRemote::new());
    let a = device("device-a", &remote);
    let b = device("device-b", &remote);
    let cancel = CancelToken::never();

    // Device A records a visit and syncs it up
    let visit = seed_visit(&a);
    let report = a.coordinator.sync(&cancel).await.unwrap();
    assert_eq!(report.pushed_accepted, 1);

    // Device B pulls it down
    let report = b.coordinator.sync(&cancel).await.unwrap();
    assert_eq!(report.pulled_applied, 1);
    assert_eq!(visit_on(&b, &visit).version, 1);

    // Both devices edit the label while offline
    a.journal
        .set_label(&visit.id, Some("Sunset point".to_string()))
        .unwrap();
    b.journal
        .set_label(&visit.id, Some("Harbour view".to_string()))
        .unwrap();

    // A syncs first and wins the race
    let report = a.coordinator.sync(&cancel).await.unwrap();
    assert_eq!(report.pushed_accepted, 1);
    assert_eq!(remote.version_of(EntityKind::Visit, &visit.id.as_str()), 2);

    // B syncs: the pull detects divergence, the push holds the entity back
    let report = b.coordinator.sync(&cancel).await.unwrap();
    assert_eq!(report.pull_conflicts, 1);
    assert_eq!(report.held_back, 1);
    assert_eq!(report.pushed_accepted, 0);

    // Exactly one conflict, concurrent modification, with both snapshots
    let conflicts = b.journal.pending_conflicts().unwrap();
    assert_eq!(conflicts.len(), 1);
    let conflict = &conflicts[0];
    assert_eq!(conflict.kind, ConflictKind::ConcurrentModification);
    assert_eq!(conflict.local.snapshot["user_label"], "Harbour view");
    assert_eq!(conflict.remote.snapshot["user_label"], "Sunset point");

    // The remote still holds A's write untouched
    assert_eq!(remote.version_of(EntityKind::Visit, &visit.id.as_str()), 2);

    // keep_local bumps the winner past both versions
    b.resolver.keep_local(&conflict.id).unwrap();
    let resolved = visit_on(&b, &visit);
    assert_eq!(resolved.user_label.as_deref(), Some("Harbour view"));
    assert!(resolved.version > conflict.local.version);
    assert!(resolved.version > conflict.remote.version);
    assert_eq!(resolved.version, 3);
    assert!(b.journal.pending_conflicts().unwrap().is_empty());

    // The resolution pushes cleanly and A converges on it
    let report = b.coordinator.sync(&cancel).await.unwrap();
    assert_eq!(report.pushed_accepted, 1);
    let report = a.coordinator.sync(&cancel).await.unwrap();
    assert_eq!(report.pulled_applied, 1);
    assert_eq!(
        visit_on(&a, &visit).user_label.as_deref(),
        Some("Harbour view")
    );
    assert_eq!(visit_on(&a, &visit).version, 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn stale_push_yields_conflict_not_overwrite() {
    let remote = Arc::new(InMemoryRemote::new());
    let a = device("device-a", &remote);
    let cancel = CancelToken::never();

    let visit = seed_visit(&a);
    a.coordinator.sync(&cancel).await.unwrap();

    // Another device overwrites the entity directly on the remote
    let mut foreign = visit.clone();
    foreign.user_label = Some("Renamed elsewhere".to_string());
    foreign.version = 2;
    foreign.device_id = "device-z".to_string();
    remote
        .push_changes(&PushRequest {
            device_id: "device-z".to_string(),
            changes: vec![PushChange {
                envelope: ChangeEnvelope {
                    entity: EntityKind::Visit,
                    entity_id: visit.id.as_str(),
                    version: 2,
                    device_id: "device-z".to_string(),
                    updated_at: foreign.updated_at + 1,
                    is_deleted: false,
                    payload: serde_json::to_value(&foreign).unwrap(),
                },
                expected_version: 1,
            }],
        })
        .await
        .unwrap();

    // A edits locally, then pretends its cursor already covers the foreign
    // write (e.g. the pull raced): the push must CAS-fail, never overwrite.
    a.journal
        .set_label(&visit.id, Some("My name".to_string()))
        .unwrap();
    {
        let db = a.db.lock().unwrap();
        let repo = SqliteSyncStateRepository::new(db.conn());
        let mut state = repo.get_device_state("device-a").unwrap();
        state.last_pull_cursor = remote.log_len() as i64;
        repo.save_device_state(&state).unwrap();
    }

    let report = a.coordinator.sync(&cancel).await.unwrap();
    assert_eq!(report.push_conflicts, 1);
    assert_eq!(report.pushed_accepted, 0);

    // Remote untouched; local conflict recorded
    let envelope = remote
        .envelope_of(EntityKind::Visit, &visit.id.as_str())
        .unwrap();
    assert_eq!(envelope.device_id, "device-z");
    assert_eq!(envelope.version, 2);
    assert_eq!(a.journal.pending_conflicts().unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn merge_unions_tags_and_takes_fresher_scalars() {
    let remote = Arc::new(InMemoryRemote::new());
    let a = device("device-a", &remote);
    let b = device("device-b", &remote);
    let cancel = CancelToken::never();

    // A shared trip, synced to both devices
    let trip = a.journal.add_user_trip(0, HOUR_MS, "Coast weekend").unwrap();
    a.coordinator.sync(&cancel).await.unwrap();
    b.coordinator.sync(&cancel).await.unwrap();

    // Each device tags the trip differently while offline
    let tag_trip = |device: &Device, tags: Vec<String>, name: &str| {
        let db = device.db.lock().unwrap();
        let repo = jaunt_core::db::SqliteTripRepository::new(db.conn());
        use jaunt_core::db::TripRepository;
        let mut t = repo.get(&trip.id).unwrap().unwrap();
        t.tags = tags;
        t.display_name = name.to_string();
        t.touch(&device.name);
        repo.update(&t).unwrap();
        SqliteSyncStateRepository::new(db.conn())
            .enqueue_change(EntityKind::Trip, &trip.id.as_str(), 5_000)
            .unwrap();
    };
    tag_trip(&a, vec!["beach".into(), "family".into()], "Coast weekend");
    // Ensure B's edit is strictly fresher for the scalar merge
    std::thread::sleep(std::time::Duration::from_millis(5));
    tag_trip(&b, vec!["family".into(), "sunset".into()], "Seaside break");

    a.coordinator.sync(&cancel).await.unwrap();
    let report = b.coordinator.sync(&cancel).await.unwrap();
    assert_eq!(report.pull_conflicts, 1);

    let conflict = &b.journal.pending_conflicts().unwrap()[0];
    b.resolver.merge(&conflict.id).unwrap();

    let db = b.db.lock().unwrap();
    use jaunt_core::db::TripRepository;
    let merged = jaunt_core::db::SqliteTripRepository::new(db.conn())
        .get(&trip.id)
        .unwrap()
        .unwrap();
    let mut tags = merged.tags.clone();
    tags.sort();
    assert_eq!(tags, vec!["beach", "family", "sunset"]);
    // B's rename was fresher
    assert_eq!(merged.display_name, "Seaside break");
    assert!(merged.version > conflict.local.version.max(conflict.remote.version));
}

#[tokio::test(flavor = "multi_thread")]
async fn conflicts_resolve_strictly_oldest_first() {
    let remote = Arc::new(InMemoryRemote::new());
    let a = device("device-a", &remote);
    let b = device("device-b", &remote);
    let cancel = CancelToken::never();

    let first = seed_visit(&a);
    let second = seed_visit(&a);
    a.coordinator.sync(&cancel).await.unwrap();
    b.coordinator.sync(&cancel).await.unwrap();

    for visit in [&first, &second] {
        a.journal.set_label(&visit.id, Some("A says".to_string())).unwrap();
        b.journal.set_label(&visit.id, Some("B says".to_string())).unwrap();
    }
    a.coordinator.sync(&cancel).await.unwrap();
    b.coordinator.sync(&cancel).await.unwrap();

    let conflicts = b.journal.pending_conflicts().unwrap();
    assert_eq!(conflicts.len(), 2);

    // The newer conflict is refused while the older one is open
    let err = b.resolver.keep_local(&conflicts[1].id).unwrap_err();
    assert!(err.to_string().contains("oldest-first"));

    b.resolver.keep_local(&conflicts[0].id).unwrap();
    b.resolver.keep_remote(&conflicts[1].id).unwrap();
    assert!(b.journal.pending_conflicts().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn transient_failures_park_and_recover() {
    let remote = Arc::new(InMemoryRemote::new());
    let a = device("device-a", &remote);
    let cancel = CancelToken::never();

    seed_visit(&a);
    // Default max attempts is 5; starve both the pull and every push retry
    remote.inject_failures(10);

    let report = a.coordinator.sync(&cancel).await.unwrap();
    assert_eq!(report.parked, 1);
    assert_eq!(report.pushed_accepted, 0);

    // Still queued for the next cycle
    {
        let db = a.db.lock().unwrap();
        assert_eq!(
            SqliteSyncStateRepository::new(db.conn()).pending_count().unwrap(),
            1
        );
    }

    // Next scheduled cycle drains the queue
    let report = a.coordinator.sync(&cancel).await.unwrap();
    assert_eq!(report.parked, 0);
    assert_eq!(report.pushed_accepted, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn second_sync_call_joins_the_inflight_cycle() {
    let remote = Arc::new(InMemoryRemote::new());
    let a = device("device-a", &remote);
    let cancel = CancelToken::never();

    seed_visit(&a);
    // A couple of transient failures slow the first cycle down
    remote.inject_failures(2);

    let (first, second) =
        tokio::join!(a.coordinator.sync(&cancel), a.coordinator.sync(&cancel));
    let first = first.unwrap();
    let second = second.unwrap();

    // Exactly one cycle ran; the other coalesced into it
    assert_ne!(first.joined, second.joined);
    let fresh = if first.joined { second } else { first };
    assert_eq!(fresh.pushed_accepted, 1);
    assert_eq!(remote.log_len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelled_cycle_is_safe_to_retry() {
    let remote = Arc::new(InMemoryRemote::new());
    let a = device("device-a", &remote);

    seed_visit(&a);
    let source = CancelSource::new();
    source.cancel();
    let report = a.coordinator.sync(&source.token()).await.unwrap();
    assert!(report.cancelled);
    assert_eq!(report.pushed_accepted, 0);

    // Nothing was lost; a later cycle completes the push
    let report = a.coordinator.sync(&CancelToken::never()).await.unwrap();
    assert_eq!(report.pushed_accepted, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_remote_payload_is_skipped_not_fatal() {
    let remote = Arc::new(InMemoryRemote::new());
    let a = device("device-a", &remote);
    let cancel = CancelToken::never();

    // A malformed visit lands in the remote log (arrival after departure)
    let mut bad = PlaceVisit::new(
        Coordinate::new(51.5, -0.12),
        30.0,
        5_000,
        Some(1_000),
        "device-z",
    );
    bad.arrival_ms = 5_000;
    let mut payload = serde_json::to_value(&bad).unwrap();
    payload["departure_ms"] = serde_json::json!(1_000);
    remote
        .push_changes(&PushRequest {
            device_id: "device-z".to_string(),
            changes: vec![PushChange {
                envelope: ChangeEnvelope {
                    entity: EntityKind::Visit,
                    entity_id: bad.id.as_str(),
                    version: 1,
                    device_id: "device-z".to_string(),
                    updated_at: 1,
                    is_deleted: false,
                    payload,
                },
                expected_version: 0,
            }],
        })
        .await
        .unwrap();

    let report = a.coordinator.sync(&cancel).await.unwrap();
    assert_eq!(report.pulled_applied, 0);
    // The offending entity never landed locally
    assert!(a.journal.visits(0, i64::MAX).unwrap().is_empty());
}
