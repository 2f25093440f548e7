//! Stay-point detection: clustering consecutive low-movement samples.

use crate::config::TrackingConfig;
use crate::geo::Coordinate;
use crate::models::LocationSample;

/// A completed stay emitted by the detector, before it becomes a
/// `PlaceVisit` (id, category, and geocoding are attached downstream).
#[derive(Debug, Clone, PartialEq)]
pub struct VisitDraft {
    pub center: Coordinate,
    pub radius_m: f64,
    pub arrival_ms: i64,
    pub departure_ms: i64,
    pub sample_count: usize,
    /// True when the close was forced by a silence timeout rather than an
    /// observed departure.
    pub synthetic_close: bool,
}

impl VisitDraft {
    pub const fn duration_ms(&self) -> i64 {
        self.departure_ms - self.arrival_ms
    }
}

/// An open cluster of consecutive nearby samples.
///
/// The centroid is a running mean, recomputed incrementally so the detector
/// stays O(1) per sample; it is never recentered over past members.
#[derive(Debug, Clone)]
struct Candidate {
    centroid: Coordinate,
    count: usize,
    first_ms: i64,
    last_ms: i64,
    /// Largest observed deviation from the centroid at incorporation time.
    max_deviation_m: f64,
}

impl Candidate {
    fn open(sample: &LocationSample) -> Self {
        Self {
            centroid: sample.coordinate(),
            count: 1,
            first_ms: sample.timestamp_ms,
            last_ms: sample.timestamp_ms,
            max_deviation_m: 0.0,
        }
    }

    fn incorporate(&mut self, sample: &LocationSample, deviation_m: f64) {
        let n = self.count as f64;
        self.centroid.latitude = (self.centroid.latitude * n + sample.latitude) / (n + 1.0);
        self.centroid.longitude = (self.centroid.longitude * n + sample.longitude) / (n + 1.0);
        self.count += 1;
        self.last_ms = sample.timestamp_ms;
        if deviation_m > self.max_deviation_m {
            self.max_deviation_m = deviation_m;
        }
    }

    fn dwell_ms(&self) -> i64 {
        self.last_ms - self.first_ms
    }

    fn into_draft(self, synthetic_close: bool) -> VisitDraft {
        VisitDraft {
            center: self.centroid,
            // A lone fix has zero spread; floor the radius so it stays positive.
            radius_m: self.max_deviation_m.max(5.0),
            arrival_ms: self.first_ms,
            departure_ms: self.last_ms,
            sample_count: self.count,
            synthetic_close,
        }
    }
}

/// Clusters the accepted-sample stream into place-visit drafts.
///
/// Deterministic: the same finite sample sequence always yields identical
/// visit boundaries.
pub struct StayPointDetector {
    config: TrackingConfig,
    candidate: Option<Candidate>,
}

impl StayPointDetector {
    pub const fn new(config: TrackingConfig) -> Self {
        Self {
            config,
            candidate: None,
        }
    }

    /// Feed one accepted sample. Returns a completed visit draft when this
    /// sample closes a qualifying stay.
    pub fn observe(&mut self, sample: &LocationSample) -> Option<VisitDraft> {
        let Some(candidate) = self.candidate.as_mut() else {
            self.candidate = Some(Candidate::open(sample));
            return None;
        };

        // A long silent gap means the device stopped reporting; the stay
        // cannot extend into the silence, so it closes at the last sample.
        let silent_ms = sample.timestamp_ms - candidate.last_ms;
        if silent_ms > self.config.gap_timeout_secs * 1000 {
            let closed = self.take_if_qualified(false);
            self.candidate = Some(Candidate::open(sample));
            return closed;
        }

        let deviation_m = sample.coordinate().distance_m(&candidate.centroid);
        if deviation_m <= self.config.stay_radius_m {
            candidate.incorporate(sample, deviation_m);
            return None;
        }

        // Departure: the sample left the cluster radius.
        let closed = self.take_if_qualified(false);
        self.candidate = Some(Candidate::open(sample));
        closed
    }

    /// Close the open candidate if silence has exceeded the trip-ended
    /// timeout. Called periodically by the pipeline so downstream trip
    /// boundaries stay sane even when no further samples ever arrive.
    pub fn check_timeout(&mut self, now_ms: i64) -> Option<VisitDraft> {
        let candidate = self.candidate.as_ref()?;
        if now_ms - candidate.last_ms > self.config.trip_ended_timeout_secs * 1000 {
            tracing::debug!(
                last_ms = candidate.last_ms,
                "stay point closed by trip-ended timeout"
            );
            return self.take_if_qualified(true);
        }
        None
    }

    /// Dwell start of the currently open candidate, if any.
    pub fn open_since_ms(&self) -> Option<i64> {
        self.candidate.as_ref().map(|c| c.first_ms)
    }

    fn take_if_qualified(&mut self, synthetic: bool) -> Option<VisitDraft> {
        let candidate = self.candidate.take()?;
        if candidate.dwell_ms() >= self.config.stay_min_duration_secs * 1000 {
            Some(candidate.into_draft(synthetic))
        } else {
            // Too brief to be a stay; its samples belong to the route gap.
            None
        }
    }
}
