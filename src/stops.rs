//! Dwell cluster and revisit detection.
//!
//! A stop is a run of consecutive Stopped points longer than
//! [`MIN_DWELL_SAMPLES`]. Shorter runs are treated as noise (traffic lights,
//! GPS jitter at low speed). A stop is a revisit when an earlier stop in the
//! same batch lies within [`REVISIT_RADIUS_DEGREES`] on both axes.

use serde::{Deserialize, Serialize};

use crate::TrackPoint;

/// A dwell run must have strictly more samples than this to become a stop.
pub const MIN_DWELL_SAMPLES: u32 = 5;

/// Per-axis distance under which two stops are the same place (~50 m).
pub const REVISIT_RADIUS_DEGREES: f64 = 0.0005;

/// A committed dwell cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    /// Position of the first point in the run
    pub lat: f64,
    pub lng: f64,
    pub start_time: String,
    pub end_time: String,
    pub dwell_sample_count: u32,
    /// An earlier stop lies at the same place
    pub is_revisit: bool,
    /// Index of the first point of the run in the point list
    pub first_index: usize,
    pub trip_id: u32,
}

impl Stop {
    fn open(point: &TrackPoint, index: usize) -> Self {
        Self {
            lat: point.lat,
            lng: point.lng,
            start_time: point.timestamp.clone(),
            end_time: point.timestamp.clone(),
            dwell_sample_count: 1,
            is_revisit: false,
            first_index: index,
            trip_id: point.trip_id,
        }
    }

    fn extend(&mut self, point: &TrackPoint) {
        self.end_time = point.timestamp.clone();
        self.dwell_sample_count += 1;
    }

    /// Same place as `other` within the revisit radius.
    pub fn coincides_with(&self, other: &Stop) -> bool {
        (self.lat - other.lat).abs() < REVISIT_RADIUS_DEGREES
            && (self.lng - other.lng).abs() < REVISIT_RADIUS_DEGREES
    }
}

/// Commit an accumulator if it is long enough, flagging it against the stops
/// committed before it.
fn commit(committed: &mut Vec<Stop>, mut candidate: Stop) {
    if candidate.dwell_sample_count <= MIN_DWELL_SAMPLES {
        return;
    }
    candidate.is_revisit = committed.iter().any(|prev| prev.coincides_with(&candidate));
    committed.push(candidate);
}

/// Find stops in chronological points.
pub fn detect_stops(points: &[TrackPoint]) -> Vec<Stop> {
    let mut committed: Vec<Stop> = Vec::new();
    let mut current: Option<Stop> = None;

    for (index, point) in points.iter().enumerate() {
        if point.is_moving() {
            if let Some(candidate) = current.take() {
                commit(&mut committed, candidate);
            }
        } else {
            match current.as_mut() {
                Some(stop) => stop.extend(point),
                None => current = Some(Stop::open(point, index)),
            }
        }
    }

    if let Some(candidate) = current {
        commit(&mut committed, candidate);
    }
    committed
}
