//! End-to-end pipeline scenarios: samples in, visits/segments/trips out.

use std::sync::Arc;

use jaunt_core::config::{GeocodeConfig, TrackingConfig};
use jaunt_core::db::{Database, SharedDatabase};
use jaunt_core::geocode::{GeocodeProvider, ReverseGeocodeCache};
use jaunt_core::models::{LocationSample, PlaceInfo, TransportType, VisitCategory};
use jaunt_core::pipeline::TrackerPipeline;
use jaunt_core::Journal;

const HOUR_MS: i64 = 3_600_000;
/// Fixed journey start; absolute value is irrelevant to the pipeline.
const T0: i64 = 1_717_200_000_000;

struct CafeProvider;

impl GeocodeProvider for CafeProvider {
    async fn reverse_geocode(
        &self,
        lat: f64,
        lon: f64,
    ) -> jaunt_core::Result<Option<PlaceInfo>> {
        Ok(Some(PlaceInfo {
            latitude: lat,
            longitude: lon,
            address: Some("1 Harbour St".to_string()),
            city: Some("London".to_string()),
            country: Some("GB".to_string()),
            poi_kind: Some("cafe".to_string()),
        }))
    }
}

fn setup() -> (SharedDatabase, TrackerPipeline, Journal) {
    let db = Database::open_in_memory().unwrap().into_shared();
    let geocoder = Arc::new(ReverseGeocodeCache::new(
        CafeProvider,
        GeocodeConfig::default(),
        db.clone(),
    ));
    let pipeline = TrackerPipeline::spawn(
        db.clone(),
        geocoder,
        TrackingConfig::default(),
        "device-a",
        64,
    );
    let journal = Journal::new(db.clone(), TrackingConfig::default(), "device-a");
    (db, pipeline, journal)
}

/// A cluster of fixes jittering within ~15m of a point.
fn cluster(center_lat: f64, center_lon: f64, start_ms: i64, count: usize) -> Vec<LocationSample> {
    (0..count)
        .map(|i| {
            let jitter = if i % 2 == 0 { 0.0001 } else { -0.0001 };
            LocationSample::new(
                center_lat,
                center_lon + jitter,
                10.0,
                start_ms + i as i64 * 30_000,
            )
        })
        .collect()
}

/// Fixes heading north at `speed_kmh`, one every 30 seconds.
fn drive(from_lat: f64, lon: f64, speed_kmh: f64, start_ms: i64, count: usize) -> Vec<LocationSample> {
    let mps = speed_kmh / 3.6;
    (0..count)
        .map(|i| {
            let elapsed_s = (i as i64 + 1) * 30;
            LocationSample::new(
                from_lat + mps * elapsed_s as f64 / 111_320.0,
                lon,
                10.0,
                start_ms + elapsed_s * 1000,
            )
            .with_speed(mps)
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn clustered_samples_become_exactly_one_visit() {
    let (_db, pipeline, journal) = setup();
    let sender = pipeline.sender();

    // 21 fixes over 10 minutes within ~15m, then a departure fix far away
    for sample in cluster(51.5000, -0.1200, T0, 21) {
        sender.send(sample).await.unwrap();
    }
    sender
        .send(LocationSample::new(51.5100, -0.1200, 10.0, T0 + 11 * 60_000))
        .await
        .unwrap();

    drop(sender);
    let snapshot = pipeline.shutdown().await.unwrap();
    assert_eq!(snapshot.visits_created, 1);

    let visits = journal.visits(T0 - HOUR_MS, T0 + HOUR_MS).unwrap();
    assert_eq!(visits.len(), 1);
    let visit = &visits[0];
    assert!(visit.radius_m <= 50.0, "radius {}", visit.radius_m);
    let duration = visit.duration_ms().unwrap();
    assert!(
        (570_000..=630_000).contains(&duration),
        "duration {duration}"
    );
    // Geocoding enriched the visit
    assert_eq!(visit.resolved_address.as_deref(), Some("1 Harbour St"));
    assert_eq!(visit.category, VisitCategory::Food);
}

#[tokio::test(flavor = "multi_thread")]
async fn full_journey_produces_visits_segment_and_trip() {
    let (_db, pipeline, journal) = setup();
    let sender = pipeline.sender();

    // Stay one: ten minutes at the cafe
    for sample in cluster(51.5000, -0.1200, T0, 21) {
        sender.send(sample).await.unwrap();
    }
    let depart_ms = T0 + 600_000;

    // Drive 25 km/h for ~12 minutes (5 km)
    for sample in drive(51.5000, -0.1200, 25.0, depart_ms, 24) {
        sender.send(sample).await.unwrap();
    }
    let arrive_lat = 51.5000 + (25.0 / 3.6) * (24.0 * 30.0) / 111_320.0;
    let arrive_ms = depart_ms + 24 * 30_000;

    // Stay two: three hours at the destination (sparse heartbeat fixes)
    for i in 0..37 {
        sender
            .send(LocationSample::new(
                arrive_lat,
                -0.1200,
                10.0,
                arrive_ms + 30_000 + i * 5 * 60_000,
            ))
            .await
            .unwrap();
    }
    // Departure fix closes stay two
    sender
        .send(LocationSample::new(
            arrive_lat + 0.01,
            -0.1200,
            10.0,
            arrive_ms + 4 * HOUR_MS,
        ))
        .await
        .unwrap();

    drop(sender);
    let snapshot = pipeline.shutdown().await.unwrap();
    assert_eq!(snapshot.visits_created, 2);
    assert_eq!(snapshot.segments_created, 1);

    let window_end = T0 + 24 * HOUR_MS;
    let segments = journal.segments(T0, window_end).unwrap();
    assert_eq!(segments.len(), 1);
    let segment = &segments[0];
    assert_eq!(segment.transport, TransportType::CarOrTrain);
    assert!(segment.confidence >= 0.8, "confidence {}", segment.confidence);
    assert!(
        segment.distance_m > 4_000.0 && segment.distance_m < 6_000.0,
        "distance {}",
        segment.distance_m
    );

    // The qualifying drive plus a three-hour stay forms one auto trip
    let trips = journal.detect_trips(T0, window_end).unwrap();
    assert_eq!(trips.len(), 1);
    let trip = &trips[0];
    assert!(trip.is_auto_detected);
    assert_eq!(trip.start_ms, segment.start_ms);

    let visits = journal.visits(T0, window_end).unwrap();
    let destination = visits
        .iter()
        .find(|v| v.arrival_ms > depart_ms)
        .expect("destination visit");
    assert_eq!(trip.end_ms, Some(destination.arrival_ms));
    assert_eq!(destination.trip_id, Some(trip.id));
}

#[tokio::test(flavor = "multi_thread")]
async fn quiet_day_produces_zero_trips() {
    let (_db, pipeline, journal) = setup();
    let sender = pipeline.sender();

    // A single two-hour visit (fixes every 5 minutes), then one departure
    // fix after a five-hour idle gap. Nothing qualifies as a trip.
    for i in 0..25 {
        sender
            .send(LocationSample::new(
                51.5000,
                -0.1200,
                10.0,
                T0 + i * 5 * 60_000,
            ))
            .await
            .unwrap();
    }
    sender
        .send(LocationSample::new(
            51.5100,
            -0.1200,
            10.0,
            T0 + 2 * HOUR_MS + 5 * HOUR_MS,
        ))
        .await
        .unwrap();

    drop(sender);
    let snapshot = pipeline.shutdown().await.unwrap();
    assert_eq!(snapshot.visits_created, 1);

    let trips = journal.detect_trips(T0 - HOUR_MS, T0 + 24 * HOUR_MS).unwrap();
    assert!(trips.is_empty());
    assert!(journal
        .trips(T0 - HOUR_MS, T0 + 24 * HOUR_MS)
        .unwrap()
        .is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_samples_never_reach_the_store() {
    let (db, pipeline, _journal) = setup();
    let sender = pipeline.sender();

    sender
        .send(LocationSample::new(51.5, -0.12, 10.0, T0))
        .await
        .unwrap();
    // Terrible accuracy: filtered
    sender
        .send(LocationSample::new(51.6, -0.12, 400.0, T0 + 60_000))
        .await
        .unwrap();
    // Out of order: filtered
    sender
        .send(LocationSample::new(51.7, -0.12, 10.0, T0 - 60_000))
        .await
        .unwrap();

    drop(sender);
    let snapshot = pipeline.shutdown().await.unwrap();
    assert_eq!(snapshot.ingest.accepted, 1);
    assert_eq!(snapshot.ingest.rejected(), 2);

    let db = db.lock().unwrap();
    let count: i64 = db
        .conn()
        .query_row("SELECT COUNT(*) FROM samples", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 1);
}
