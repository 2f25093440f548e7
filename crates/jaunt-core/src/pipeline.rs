//! The ingestion pipeline: one producer, a bounded queue, one consumer.
//!
//! Strict temporal ordering is the invariant everything downstream leans on;
//! a single consumer task drives the ingestor, stay-point detector, and
//! route builder in sample order. Each logical step ("close a stay point and
//! open a route segment") commits as one store transaction.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::TrackingConfig;
use crate::db::{
    SampleRepository, SegmentRepository, SharedDatabase, SqliteSampleRepository,
    SqliteSegmentRepository, SqliteSyncStateRepository, SqliteVisitRepository,
    SyncStateRepository, VisitRepository,
};
use crate::detect::{RouteSegmentBuilder, StayPointDetector, VisitDraft};
use crate::error::{Error, Result};
use crate::geocode::{GeocodeProvider, ReverseGeocodeCache};
use crate::ingest::{IngestStats, SampleIngestor};
use crate::models::{EntityKind, LocationSample, PlaceVisit, RouteSegment, VisitCategory};
use crate::util::unix_millis_now;

/// Immutable progress snapshot published over a watch channel; the UI layer
/// observes this instead of reaching into pipeline state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineSnapshot {
    pub ingest: IngestStats,
    pub visits_created: u64,
    pub segments_created: u64,
    pub last_sample_ms: Option<i64>,
}

/// Producer handle into the bounded sample queue.
#[derive(Clone)]
pub struct SampleSender {
    tx: mpsc::Sender<LocationSample>,
}

impl SampleSender {
    /// Queue one sample, waiting if the buffer is full (backpressure keeps
    /// ordering intact; dropping would not).
    pub async fn send(&self, sample: LocationSample) -> Result<()> {
        self.tx
            .send(sample)
            .await
            .map_err(|_| Error::PipelineClosed)
    }
}

/// The running ingestion worker.
pub struct TrackerPipeline {
    sender: SampleSender,
    snapshot_rx: watch::Receiver<PipelineSnapshot>,
    handle: JoinHandle<Result<()>>,
}

impl TrackerPipeline {
    /// Spawn the consumer task.
    ///
    /// `queue_capacity` bounds the producer/consumer channel; the periodic
    /// tick drives silence timeouts when no samples arrive at all.
    pub fn spawn<P: GeocodeProvider + 'static>(
        db: SharedDatabase,
        geocoder: Arc<ReverseGeocodeCache<P>>,
        config: TrackingConfig,
        device_id: impl Into<String>,
        queue_capacity: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(queue_capacity);
        let (snapshot_tx, snapshot_rx) = watch::channel(PipelineSnapshot::default());

        let worker = Worker {
            db,
            geocoder,
            builder: RouteSegmentBuilder::new(config.clone()),
            detector: StayPointDetector::new(config.clone()),
            ingestor: SampleIngestor::new(config),
            device_id: device_id.into(),
            snapshot: PipelineSnapshot::default(),
            snapshot_tx,
        };
        let handle = tokio::spawn(worker.run(rx));

        Self {
            sender: SampleSender { tx },
            snapshot_rx,
            handle,
        }
    }

    pub fn sender(&self) -> SampleSender {
        self.sender.clone()
    }

    /// Observe pipeline progress without touching its state.
    pub fn watch(&self) -> watch::Receiver<PipelineSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Close the queue and wait for the consumer to drain.
    ///
    /// Every `SampleSender` clone must be dropped first; the consumer only
    /// exits once the channel has no remaining producers.
    pub async fn shutdown(self) -> Result<PipelineSnapshot> {
        let Self {
            sender,
            snapshot_rx,
            handle,
        } = self;
        drop(sender);
        match handle.await {
            Ok(outcome) => outcome?,
            Err(join_error) => return Err(Error::Sync(format!("pipeline task died: {join_error}"))),
        }
        let snapshot = *snapshot_rx.borrow();
        Ok(snapshot)
    }
}

struct Worker<P> {
    db: SharedDatabase,
    geocoder: Arc<ReverseGeocodeCache<P>>,
    builder: RouteSegmentBuilder,
    detector: StayPointDetector,
    ingestor: SampleIngestor,
    device_id: String,
    snapshot: PipelineSnapshot,
    snapshot_tx: watch::Sender<PipelineSnapshot>,
}

impl<P: GeocodeProvider> Worker<P> {
    async fn run(mut self, mut rx: mpsc::Receiver<LocationSample>) -> Result<()> {
        let period = std::time::Duration::from_secs(60);
        // First check one period out; an immediate tick would race the
        // first samples.
        let mut tick = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                sample = rx.recv() => {
                    let Some(sample) = sample else { break };
                    self.handle_sample(sample).await?;
                }
                _ = tick.tick() => {
                    // Synthetic visit-end when the device has gone silent
                    // longer than the trip-ended timeout.
                    if let Some(draft) = self.detector.check_timeout(unix_millis_now()) {
                        self.commit_visit(draft).await?;
                        self.publish();
                    }
                }
            }
        }

        self.publish();
        Ok(())
    }

    async fn handle_sample(&mut self, sample: LocationSample) -> Result<()> {
        if !self.ingestor.ingest(&sample).is_accepted() {
            self.snapshot.ingest = self.ingestor.stats();
            self.publish();
            return Ok(());
        }

        {
            let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
            SqliteSampleRepository::new(db.conn()).append(&sample)?;
        }

        if let Some(draft) = self.detector.observe(&sample) {
            self.commit_visit(draft).await?;
        }

        self.snapshot.ingest = self.ingestor.stats();
        self.snapshot.last_sample_ms = Some(sample.timestamp_ms);
        self.publish();
        Ok(())
    }

    /// Turn a closed stay into a visit record, plus the route segment
    /// covering the gap from the previous visit - one transaction.
    async fn commit_visit(&mut self, draft: VisitDraft) -> Result<()> {
        // The only suspension point: geocoding happens before the store
        // transaction opens, never inside it.
        let place = self
            .geocoder
            .resolve(draft.center.latitude, draft.center.longitude)
            .await?;

        let mut visit = PlaceVisit::new(
            draft.center,
            draft.radius_m,
            draft.arrival_ms,
            Some(draft.departure_ms),
            self.device_id.clone(),
        );
        visit.resolved_address = place.address.clone();
        visit.category = place
            .poi_kind
            .as_deref()
            .map_or(VisitCategory::Other, VisitCategory::from_poi_kind);

        let mut db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        let tx = db.transaction()?;
        {
            let visit_repo = SqliteVisitRepository::new(&tx);
            let sync_repo = SqliteSyncStateRepository::new(&tx);
            let now_ms = unix_millis_now();

            let previous = visit_repo.latest_departed_before(draft.arrival_ms)?;
            visit_repo.insert(&visit)?;
            sync_repo.enqueue_change(EntityKind::Visit, &visit.id.as_str(), now_ms)?;
            self.snapshot.visits_created += 1;

            if let Some(previous) = previous {
                if let Some(gap_start) = previous.departure_ms {
                    let samples = SqliteSampleRepository::new(&tx)
                        .list_between(gap_start + 1, draft.arrival_ms)?;
                    let seg_draft = self.builder.build(
                        previous.center(),
                        gap_start,
                        draft.center,
                        draft.arrival_ms,
                        &samples,
                    );
                    let mut segment = RouteSegment::new(
                        seg_draft.start_ms,
                        seg_draft.end_ms,
                        seg_draft.start_coord,
                        seg_draft.end_coord,
                        self.device_id.clone(),
                    );
                    segment.transport = seg_draft.transport;
                    segment.distance_m = seg_draft.distance_m;
                    segment.confidence = seg_draft.confidence;

                    let segment_repo = SqliteSegmentRepository::new(&tx);
                    segment_repo.insert(&segment)?;
                    sync_repo.enqueue_change(EntityKind::Segment, &segment.id.as_str(), now_ms)?;
                    self.snapshot.segments_created += 1;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn publish(&self) {
        let _ = self.snapshot_tx.send(self.snapshot);
    }
}
