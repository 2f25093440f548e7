//! Inference over the accepted-sample stream: stay points, route segments,
//! and trips.

mod route;
mod stay_point;
mod trip;

pub use route::{RouteSegmentBuilder, SegmentDraft};
pub use stay_point::{StayPointDetector, VisitDraft};
pub use trip::{TripDetector, TripDraft};
