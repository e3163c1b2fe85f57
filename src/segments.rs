//! Speed-banded polyline segments.
//!
//! The ordered point list is cut into minimal contiguous runs that share a
//! speed band and a trip id. Each new run starts with the last point of the
//! previous one so rendered polylines meet without a gap.
//!
//! ## Example
//! ```rust
//! use fleet_track::segments::{SpeedBand, SpeedThresholds};
//!
//! let thresholds = SpeedThresholds::default(); // 20 / 80 / 120 km/h
//! assert_eq!(thresholds.band_for(15.0), SpeedBand::Low);
//! assert_eq!(thresholds.band_for(80.0), SpeedBand::Over);
//! ```

use serde::{Deserialize, Serialize};

use crate::{LatLng, TrackPoint};

/// One of four speed categories used for polyline coloring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpeedBand {
    /// Below `low`
    Low,
    /// `[low, normal)`
    Normal,
    /// `[normal, over)`
    Over,
    /// `over` and above
    Critical,
}

impl SpeedBand {
    /// Hex color used by the map layer.
    pub fn color(&self) -> &'static str {
        match self {
            SpeedBand::Low => "#3b82f6",
            SpeedBand::Normal => "#22c55e",
            SpeedBand::Over => "#ef4444",
            SpeedBand::Critical => "#7f1d1d",
        }
    }
}

/// The three user-adjustable cut points, in km/h.
///
/// Ordering is the caller's responsibility; with `low >= normal` the Normal
/// band is simply empty.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedThresholds {
    pub low: f64,
    pub normal: f64,
    pub over: f64,
}

impl Default for SpeedThresholds {
    fn default() -> Self {
        Self {
            low: 20.0,
            normal: 80.0,
            over: 120.0,
        }
    }
}

impl SpeedThresholds {
    pub fn new(low: f64, normal: f64, over: f64) -> Self {
        Self { low, normal, over }
    }

    /// Band a speed falls into.
    pub fn band_for(&self, speed_kmh: f64) -> SpeedBand {
        if speed_kmh < self.low {
            SpeedBand::Low
        } else if speed_kmh < self.normal {
            SpeedBand::Normal
        } else if speed_kmh < self.over {
            SpeedBand::Over
        } else {
            SpeedBand::Critical
        }
    }

    /// True when `low <= normal <= over`.
    pub fn is_ordered(&self) -> bool {
        self.low <= self.normal && self.normal <= self.over
    }
}

/// A polyline run sharing one band and one trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub path: Vec<LatLng>,
    pub band: SpeedBand,
    pub color: String,
    pub trip_id: u32,
}

impl Segment {
    fn start(path: Vec<LatLng>, band: SpeedBand, trip_id: u32) -> Self {
        Self {
            path,
            band,
            color: band.color().to_string(),
            trip_id,
        }
    }
}

/// Partition chronological points into segments.
///
/// Returns no segments for fewer than 2 points.
pub fn build_segments(points: &[TrackPoint], thresholds: &SpeedThresholds) -> Vec<Segment> {
    if points.len() < 2 {
        return Vec::new();
    }

    let first = &points[0];
    let mut segments = Vec::new();
    let mut current = Segment::start(
        vec![first.position()],
        thresholds.band_for(first.speed_kmh),
        first.trip_id,
    );

    for pair in points.windows(2) {
        let (prev, point) = (&pair[0], &pair[1]);
        let band = thresholds.band_for(point.speed_kmh);

        if band == current.band && point.trip_id == current.trip_id {
            current.path.push(point.position());
        } else {
            let next = Segment::start(vec![prev.position(), point.position()], band, point.trip_id);
            segments.push(std::mem::replace(&mut current, next));
        }
    }
    segments.push(current);
    segments
}
