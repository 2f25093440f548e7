//! Trip detection: a state machine over a window's visits and segments.

use crate::config::TrackingConfig;
use crate::models::{PlaceVisit, RouteSegment, SegmentId, VisitId};

/// A detected trip boundary with its member records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TripDraft {
    pub start_ms: i64,
    /// `None` when the window ended while the trip was still underway.
    pub end_ms: Option<i64>,
    pub visit_ids: Vec<VisitId>,
    pub segment_ids: Vec<SegmentId>,
}

impl TripDraft {
    pub const fn is_open(&self) -> bool {
        self.end_ms.is_none()
    }
}

/// One entry in the ordered (visit, segment) timeline.
#[derive(Debug, Clone, Copy)]
enum TimelineItem<'a> {
    Visit(&'a PlaceVisit),
    Segment(&'a RouteSegment),
}

impl TimelineItem<'_> {
    const fn start_ms(&self) -> i64 {
        match self {
            Self::Visit(v) => v.arrival_ms,
            Self::Segment(s) => s.start_ms,
        }
    }
}

#[derive(Debug)]
enum State {
    Idle,
    InTrip(TripDraft),
}

/// Groups a window's visits and segments into trips.
///
/// Pure over its inputs: re-running detection on unchanged records yields
/// identical boundaries. Trips are not clipped to calendar days; a window
/// that ends mid-trip produces an open draft the next run can extend.
pub struct TripDetector {
    config: TrackingConfig,
}

impl TripDetector {
    pub const fn new(config: TrackingConfig) -> Self {
        Self { config }
    }

    /// Detect trips over the window's visits and segments (any order;
    /// they are merged into one timeline here).
    pub fn detect(&self, visits: &[PlaceVisit], segments: &[RouteSegment]) -> Vec<TripDraft> {
        let mut timeline: Vec<TimelineItem<'_>> = visits
            .iter()
            .map(TimelineItem::Visit)
            .chain(segments.iter().map(TimelineItem::Segment))
            .collect();
        timeline.sort_by_key(TimelineItem::start_ms);

        let mut trips = Vec::new();
        let mut state = State::Idle;

        for (index, item) in timeline.iter().enumerate() {
            state = match (state, item) {
                (State::Idle, TimelineItem::Segment(segment)) => {
                    if self.qualifies(segment) {
                        State::InTrip(TripDraft {
                            start_ms: segment.start_ms,
                            end_ms: None,
                            visit_ids: Vec::new(),
                            segment_ids: vec![segment.id],
                        })
                    } else {
                        State::Idle
                    }
                }
                (State::Idle, TimelineItem::Visit(_)) => State::Idle,
                (State::InTrip(mut draft), TimelineItem::Segment(segment)) => {
                    draft.segment_ids.push(segment.id);
                    State::InTrip(draft)
                }
                (State::InTrip(mut draft), TimelineItem::Visit(visit)) => {
                    draft.visit_ids.push(visit.id);
                    if self.closes_trip(visit) && !self.is_waypoint(&timeline, index) {
                        draft.end_ms = Some(visit.arrival_ms);
                        trips.push(draft);
                        State::Idle
                    } else {
                        State::InTrip(draft)
                    }
                }
            };
        }

        if let State::InTrip(draft) = state {
            trips.push(draft);
        }

        trips
    }

    fn qualifies(&self, segment: &RouteSegment) -> bool {
        segment.confidence >= self.config.trip_segment_min_confidence
            && segment.distance_m >= self.config.trip_min_distance_m
    }

    /// A visit long enough to end a trip. Ongoing visits never close a trip
    /// from inside the detector - their dwell is still unknown.
    fn closes_trip(&self, visit: &PlaceVisit) -> bool {
        visit
            .duration_ms()
            .is_some_and(|d| d >= self.config.trip_end_visit_secs * 1000)
    }

    /// A waypoint is bracketed by two short segments: a long lunch stop in
    /// the middle of a day's drive should not split the outing.
    fn is_waypoint(&self, timeline: &[TimelineItem<'_>], index: usize) -> bool {
        let short = |item: &TimelineItem<'_>| -> bool {
            match item {
                TimelineItem::Segment(s) => {
                    s.duration_ms() < self.config.waypoint_bracket_secs * 1000
                }
                TimelineItem::Visit(_) => false,
            }
        };

        let before = index.checked_sub(1).map(|i| &timeline[i]);
        let after = timeline.get(index + 1);
        matches!((before, after), (Some(b), Some(a)) if short(b) && short(a))
    }
}
