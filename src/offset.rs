//! Per-trip diagonal offset.
//!
//! Repeated trips over the same road would render as a single line. Every
//! point of trip N is shifted by `(N - 1) * TRIP_OFFSET_DEGREES` on both axes.
//! This is a display compromise: the shifted coordinates replace the raw fix
//! and every later stage works on them.

use crate::TrackPoint;

/// Roughly 8 to 10 meters at mid latitudes.
pub const TRIP_OFFSET_DEGREES: f64 = 0.00008;

/// Offset applied to points of a given trip. Trip 0 (before any movement)
/// lands one step on the negative side.
pub fn trip_offset(trip_id: u32) -> f64 {
    (f64::from(trip_id) - 1.0) * TRIP_OFFSET_DEGREES
}

/// Shift every point by its trip's offset.
pub fn apply_trip_offset(mut points: Vec<TrackPoint>) -> Vec<TrackPoint> {
    for point in &mut points {
        let offset = trip_offset(point.trip_id);
        point.lat += offset;
        point.lng += offset;
    }
    points
}
