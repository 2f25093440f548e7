//! Route segment building: gap distance and transport-mode inference.

use crate::config::TrackingConfig;
use crate::geo::{hop_speed_mps, mps_to_kmh, Coordinate};
use crate::models::{LocationSample, TransportType};

/// A built segment before it becomes a `RouteSegment` record.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentDraft {
    pub start_ms: i64,
    pub end_ms: i64,
    pub start_coord: Coordinate,
    pub end_coord: Coordinate,
    pub transport: TransportType,
    pub distance_m: f64,
    pub confidence: f64,
    pub median_speed_kmh: f64,
    pub max_accel_mps2: f64,
}

/// One per-hop observation inside a gap: a speed and how long it was held.
#[derive(Debug, Clone, Copy)]
struct SpeedSpan {
    speed_kmh: f64,
    duration_ms: i64,
}

/// Builds the connective segment between two consecutive place visits from
/// the samples observed inside the gap.
pub struct RouteSegmentBuilder {
    config: TrackingConfig,
}

impl RouteSegmentBuilder {
    pub const fn new(config: TrackingConfig) -> Self {
        Self { config }
    }

    /// Build the segment for a gap bounded by `(start_coord, start_ms)` and
    /// `(end_coord, end_ms)`, with `samples` the gap's fixes in time order.
    ///
    /// A gap with no samples yields a degraded straight-line segment with
    /// `Unknown` transport and zero confidence; this is normal operation,
    /// not an error.
    pub fn build(
        &self,
        start_coord: Coordinate,
        start_ms: i64,
        end_coord: Coordinate,
        end_ms: i64,
        samples: &[LocationSample],
    ) -> SegmentDraft {
        if samples.is_empty() {
            return SegmentDraft {
                start_ms,
                end_ms,
                start_coord,
                end_coord,
                transport: TransportType::Unknown,
                distance_m: start_coord.distance_m(&end_coord),
                confidence: 0.0,
                median_speed_kmh: 0.0,
                max_accel_mps2: 0.0,
            };
        }

        let distance_m = path_distance_m(start_coord, end_coord, samples);
        let spans = speed_spans(start_coord, start_ms, samples);
        let max_accel_mps2 = max_acceleration_mps2(&spans);

        let (transport, confidence, median_speed_kmh) = if spans.is_empty() {
            (TransportType::Unknown, 0.0, 0.0)
        } else {
            self.classify(&spans)
        };

        tracing::debug!(
            ?transport,
            confidence,
            median_speed_kmh,
            max_accel_mps2,
            "route segment built"
        );

        SegmentDraft {
            start_ms,
            end_ms,
            start_coord,
            end_coord,
            transport,
            distance_m,
            confidence,
            median_speed_kmh,
            max_accel_mps2,
        }
    }

    /// Pick the speed band for the gap.
    ///
    /// The headline statistic is the median hop speed. When the median sits
    /// exactly on a band boundary (samples straddle two bands), the band
    /// holding more total *duration* wins - GPS sampling rate varies with
    /// speed, so raw sample counts would bias toward the slow band.
    fn classify(&self, spans: &[SpeedSpan]) -> (TransportType, f64, f64) {
        let median = median_speed_kmh(spans);
        let mut transport = self.band_for(median);

        let (walk_cap, bike_cap, car_cap) = self.config.speed_bands_kmh;
        for boundary in [walk_cap, bike_cap, car_cap] {
            if (median - boundary).abs() < f64::EPSILON {
                transport = self.heavier_band_at(boundary, spans);
                break;
            }
        }

        let in_band_ms: i64 = spans
            .iter()
            .filter(|s| self.band_for(s.speed_kmh) == transport)
            .map(|s| s.duration_ms)
            .sum();
        let total_ms: i64 = spans.iter().map(|s| s.duration_ms).sum();
        let confidence = if total_ms > 0 {
            in_band_ms as f64 / total_ms as f64
        } else {
            0.0
        };

        (transport, confidence, median)
    }

    /// Band lookup with half-open ranges: a boundary speed belongs to the
    /// faster band.
    fn band_for(&self, speed_kmh: f64) -> TransportType {
        let (walk_cap, bike_cap, car_cap) = self.config.speed_bands_kmh;
        if speed_kmh < walk_cap {
            TransportType::Walk
        } else if speed_kmh < bike_cap {
            TransportType::Bike
        } else if speed_kmh < car_cap {
            TransportType::CarOrTrain
        } else {
            TransportType::Plane
        }
    }

    /// Of the two bands meeting at `boundary`, the one holding more total
    /// duration across the gap.
    fn heavier_band_at(&self, boundary: f64, spans: &[SpeedSpan]) -> TransportType {
        let below = self.band_for(boundary - f64::EPSILON.max(1e-9));
        let above = self.band_for(boundary);
        let duration_in = |band: TransportType| -> i64 {
            spans
                .iter()
                .filter(|s| self.band_for(s.speed_kmh) == band)
                .map(|s| s.duration_ms)
                .sum()
        };
        if duration_in(below) > duration_in(above) {
            below
        } else {
            above
        }
    }
}

/// Total path length: start -> each sample -> end.
fn path_distance_m(start: Coordinate, end: Coordinate, samples: &[LocationSample]) -> f64 {
    let mut distance = start.distance_m(&samples[0].coordinate());
    for pair in samples.windows(2) {
        distance += pair[0].distance_m(&pair[1]);
    }
    distance += samples[samples.len() - 1].coordinate().distance_m(&end);
    distance
}

/// Per-hop speeds with the duration each speed was held.
///
/// Platform-reported speed is preferred; otherwise the speed is derived from
/// the hop's distance over its elapsed time.
fn speed_spans(start_coord: Coordinate, start_ms: i64, samples: &[LocationSample]) -> Vec<SpeedSpan> {
    let mut spans = Vec::with_capacity(samples.len());
    let mut prev_coord = start_coord;
    let mut prev_ms = start_ms;

    for sample in samples {
        let duration_ms = sample.timestamp_ms - prev_ms;
        let speed_mps = sample.speed_mps.or_else(|| {
            hop_speed_mps(
                prev_coord.distance_m(&sample.coordinate()),
                prev_ms,
                sample.timestamp_ms,
            )
        });
        if let Some(speed_mps) = speed_mps {
            if duration_ms > 0 {
                spans.push(SpeedSpan {
                    speed_kmh: mps_to_kmh(speed_mps),
                    duration_ms,
                });
            }
        }
        prev_coord = sample.coordinate();
        prev_ms = sample.timestamp_ms;
    }

    spans
}

/// Largest speed change per second across consecutive hops.
fn max_acceleration_mps2(spans: &[SpeedSpan]) -> f64 {
    spans
        .windows(2)
        .filter_map(|pair| {
            let dt_s = pair[1].duration_ms as f64 / 1000.0;
            if dt_s <= 0.0 {
                return None;
            }
            let dv_mps = (pair[1].speed_kmh - pair[0].speed_kmh) / 3.6;
            Some((dv_mps / dt_s).abs())
        })
        .fold(0.0, f64::max)
}

/// Median of the hop speeds (midpoint average for even counts).
fn median_speed_kmh(spans: &[SpeedSpan]) -> f64 {
    let mut speeds: Vec<f64> = spans.iter().map(|s| s.speed_kmh).collect();
    speeds.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = speeds.len();
    if n == 0 {
        0.0
    } else if n % 2 == 1 {
        speeds[n / 2]
    } else {
        (speeds[n / 2 - 1] + speeds[n / 2]) / 2.0
    }
}
