//! Chronological ordering and trip segmentation.
//!
//! Source APIs deliver position reports newest-first. Ordering is a plain
//! reversal of arrival order, not a timestamp sort: a feed that arrives
//! shuffled stays shuffled.
//!
//! A trip starts at every Stopped -> Moving transition. The state needed to
//! detect that lives in an explicit [`TripFold`] threaded through one linear
//! scan.

use crate::TrackPoint;

/// Accumulator for trip assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TripFold {
    /// Whether the vehicle is currently considered stopped
    pub stopped: bool,
    /// Number of trips started so far
    pub trip_count: u32,
}

impl Default for TripFold {
    fn default() -> Self {
        // A batch starts stopped, so a moving first point opens trip 1
        Self {
            stopped: true,
            trip_count: 0,
        }
    }
}

impl TripFold {
    /// Apply one point's speed and return the trip id it belongs to.
    pub fn step(&mut self, speed_kmh: f64) -> u32 {
        if speed_kmh > 0.0 && self.stopped {
            self.trip_count += 1;
            self.stopped = false;
        } else if speed_kmh == 0.0 {
            self.stopped = true;
        }
        self.trip_count
    }
}

/// Reverse newest-first points into chronological order and assign
/// `trip_id` and dense 1-based `sequence_id`.
pub fn assign_trips(mut newest_first: Vec<TrackPoint>) -> Vec<TrackPoint> {
    newest_first.reverse();
    let mut fold = TripFold::default();

    for (index, point) in newest_first.iter_mut().enumerate() {
        point.sequence_id = index as u32 + 1;
        point.trip_id = fold.step(point.speed_kmh);
    }
    newest_first
}
