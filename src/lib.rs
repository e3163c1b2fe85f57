//! # Fleet Track
//!
//! GPS track post-processing for fleet telemetry playback and live maps.
//!
//! This library provides:
//! - Normalization of raw device position reports (varying field layouts)
//! - Chronological ordering and trip segmentation
//! - Speed-banded polyline segments and stop/revisit detection
//! - A playback clock with an optional tokio-driven ticker
//! - Timestamp-gated merging of live per-device updates
//!
//! ## Features
//!
//! - **`timer`** (default) - Enable the tokio playback ticker ([`timer::PlaybackDriver`])
//!
//! ## Quick Start
//!
//! ```rust
//! use fleet_track::{process_batch, SpeedThresholds};
//! use serde_json::json;
//!
//! // Devices report newest-first
//! let records = vec![
//!     json!({"messageIdHex": "0200", "timestamp": "2024-05-01 08:00:02", "latitude": 51.5280, "longitude": 0.0700, "speed": 35}),
//!     json!({"messageIdHex": "0200", "timestamp": "2024-05-01 08:00:01", "latitude": 51.5279, "longitude": 0.0698, "speed": 20}),
//!     json!({"messageIdHex": "0200", "timestamp": "2024-05-01 08:00:00", "latitude": 51.5278, "longitude": 0.0694, "speed": 0}),
//! ];
//!
//! let track = process_batch(&records, &SpeedThresholds::default());
//! assert_eq!(track.points.len(), 3);
//! assert_eq!(track.points[0].sequence_id, 1);
//! assert_eq!(track.points[2].trip_id, 1);
//! ```

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// Unified error handling
pub mod error;
pub use error::{Result, TrackError};

// Raw record normalization (field fallback chains, envelope flattening)
pub mod normalize;
pub use normalize::{
    flatten_response, normalize_record, normalize_records, parse_response, FieldSource,
    NormalizerConfig, SkipReason, TimeWindow, DEFAULT_NORMALIZER, POSITION_REPORT_CODE,
};

// Chronological ordering and trip assignment
pub mod trips;
pub use trips::{assign_trips, TripFold};

// Per-trip diagonal offset for overlapping paths
pub mod offset;
pub use offset::{apply_trip_offset, TRIP_OFFSET_DEGREES};

// Speed-banded polyline segments
pub mod segments;
pub use segments::{build_segments, Segment, SpeedBand, SpeedThresholds};

// Dwell clusters and revisit detection
pub mod stops;
pub use stops::{detect_stops, Stop, MIN_DWELL_SAMPLES, REVISIT_RADIUS_DEGREES};

// Per-trip statistics
pub mod summary;
pub use summary::{summarize_trips, TripSummary};

// Playback cursor and duration queries
pub mod playback;
pub use playback::{format_duration, PlaybackClock, PlaybackConfig, PlaybackState};

// Stateful playback session (processed track + clock)
pub mod session;
pub use session::{PlaybackSession, SessionStats};

// Live multi-device positions
pub mod live;
pub use live::{
    merge_live_update, merge_live_update_with, parse_live_record, LiveConfig, LiveFleet,
    LiveVehicle, MergeOutcome,
};

// Tokio ticker driving the playback clock
#[cfg(feature = "timer")]
pub mod timer;
#[cfg(feature = "timer")]
pub use timer::PlaybackDriver;

// ============================================================================
// Core Types
// ============================================================================

/// A coordinate pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// Whether the vehicle was moving when the point was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MovementStatus {
    Moving,
    Stopped,
}

impl MovementStatus {
    /// `Moving` for any strictly positive speed.
    pub fn from_speed(speed_kmh: f64) -> Self {
        if speed_kmh > 0.0 {
            MovementStatus::Moving
        } else {
            MovementStatus::Stopped
        }
    }
}

/// A canonical, processed position report.
///
/// Coordinates are stored after the per-trip offset has been applied, so they
/// are the values every downstream stage (segments, stops, playback) sees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    /// 1-based position after chronological ordering
    pub sequence_id: u32,
    /// Combined `date time` string as reported by the device
    pub timestamp: String,
    /// Parsed form of `timestamp`
    pub recorded_at: NaiveDateTime,
    pub date: String,
    pub time: String,
    pub lat: f64,
    pub lng: f64,
    /// Speed in km/h, never negative
    pub speed_kmh: f64,
    pub movement_status: MovementStatus,
    /// Odometer in km, rounded to one decimal
    pub mileage_km: f64,
    /// Odometer in km, full precision
    pub raw_mileage_km: f64,
    /// Movement episode; 0 until the first Stopped -> Moving transition
    pub trip_id: u32,
    /// Reporting device, when the record names one
    pub device_id: Option<String>,
}

impl TrackPoint {
    pub fn position(&self) -> LatLng {
        LatLng::new(self.lat, self.lng)
    }

    pub fn is_moving(&self) -> bool {
        self.movement_status == MovementStatus::Moving
    }

    /// Odometer reading as displayed, e.g. `"1523.4km"`.
    pub fn mileage_label(&self) -> String {
        format!("{:.1}km", self.mileage_km)
    }
}

/// Bounding box of a processed track.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Create bounds from track points.
    pub fn from_points(points: &[TrackPoint]) -> Option<Self> {
        Self::from_positions(points.iter().map(TrackPoint::position))
    }

    /// Create bounds from any positions. `None` when there are none.
    pub fn from_positions<I>(positions: I) -> Option<Self>
    where
        I: IntoIterator<Item = LatLng>,
    {
        let mut positions = positions.into_iter();
        let first = positions.next()?;
        let mut bounds = Self {
            min_lat: first.lat,
            max_lat: first.lat,
            min_lng: first.lng,
            max_lng: first.lng,
        };

        for p in positions {
            bounds.min_lat = bounds.min_lat.min(p.lat);
            bounds.max_lat = bounds.max_lat.max(p.lat);
            bounds.min_lng = bounds.min_lng.min(p.lng);
            bounds.max_lng = bounds.max_lng.max(p.lng);
        }
        Some(bounds)
    }

    /// Get the center point of the bounds.
    pub fn center(&self) -> LatLng {
        LatLng::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }
}

/// Output of the full processing pipeline for one batch.
///
/// Immutable once built; a new batch replaces it wholesale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessedTrack {
    /// Points in ascending chronological order
    pub points: Vec<TrackPoint>,
    /// Speed-banded polyline runs
    pub segments: Vec<Segment>,
    /// Dwell clusters longer than [`MIN_DWELL_SAMPLES`]
    pub stops: Vec<Stop>,
    /// One summary per trip id present in `points`
    pub trips: Vec<TripSummary>,
    pub bounds: Option<Bounds>,
}

impl ProcessedTrack {
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Where the map should open: the first chronological point.
    pub fn initial_center(&self) -> Option<LatLng> {
        self.points.first().map(TrackPoint::position)
    }

    /// Recompute segments after a threshold change. Points and stops are
    /// independent of thresholds and stay as they are.
    pub fn rebuild_segments(&mut self, thresholds: &SpeedThresholds) {
        self.segments = build_segments(&self.points, thresholds);
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Run the full pipeline over one newest-first batch using the default
/// normalizer.
///
/// Pure: identical input and thresholds always produce identical output.
pub fn process_batch(records: &[Value], thresholds: &SpeedThresholds) -> ProcessedTrack {
    process_batch_with(records, &DEFAULT_NORMALIZER, thresholds)
}

/// Run the full pipeline with a custom normalizer configuration.
pub fn process_batch_with(
    records: &[Value],
    normalizer: &NormalizerConfig,
    thresholds: &SpeedThresholds,
) -> ProcessedTrack {
    let normalized = normalize_records(records, normalizer);
    let ordered = assign_trips(normalized);
    let points = apply_trip_offset(ordered);

    let segments = build_segments(&points, thresholds);
    let stops = detect_stops(&points);
    let trips = summarize_trips(&points);
    let bounds = Bounds::from_points(&points);

    log::debug!(
        "[Pipeline] {} records -> {} points, {} segments, {} stops, {} trips",
        records.len(),
        points.len(),
        segments.len(),
        stops.len(),
        trips.len()
    );

    ProcessedTrack {
        points,
        segments,
        stops,
        trips,
        bounds,
    }
}

// ============================================================================
// Tests
// ============================================================================


#[cfg(test)]
mod tests {
    use super::test_support::raw_batch;
    use super::*;

    #[test]
    fn test_movement_status_from_speed() {
        assert_eq!(MovementStatus::from_speed(0.0), MovementStatus::Stopped);
        assert_eq!(MovementStatus::from_speed(0.1), MovementStatus::Moving);
    }

    #[test]
    fn test_process_batch_orders_chronologically() {
        let track = process_batch(&raw_batch(&[0.0, 10.0, 20.0]), &SpeedThresholds::default());

        assert_eq!(track.len(), 3);
        assert_eq!(track.points[0].timestamp, "2024-05-01 08:00:00");
        assert_eq!(track.points[2].timestamp, "2024-05-01 08:00:02");
        let ids: Vec<u32> = track.points.iter().map(|p| p.sequence_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_process_empty_batch() {
        let track = process_batch(&[], &SpeedThresholds::default());
        assert!(track.is_empty());
        assert!(track.segments.is_empty());
        assert!(track.stops.is_empty());
        assert!(track.bounds.is_none());
        assert!(track.initial_center().is_none());
    }

    #[test]
    fn test_rebuild_segments_on_threshold_change() {
        let mut track = process_batch(&raw_batch(&[10.0, 30.0, 50.0]), &SpeedThresholds::default());
        // 10 is low, 30 and 50 normal
        assert_eq!(track.segments.len(), 2);

        track.rebuild_segments(&SpeedThresholds::new(5.0, 40.0, 120.0));
        // 10 and 30 are normal now, 50 is over
        let bands: Vec<SpeedBand> = track.segments.iter().map(|s| s.band).collect();
        assert_eq!(bands, vec![SpeedBand::Normal, SpeedBand::Over]);
    }

    #[test]
    fn test_bounds_and_center() {
        let track = process_batch(&raw_batch(&[5.0, 5.0]), &SpeedThresholds::default());
        let bounds = track.bounds.unwrap();
        assert!(bounds.min_lat < bounds.max_lat);
        let center = bounds.center();
        assert!(center.lat > bounds.min_lat && center.lat < bounds.max_lat);
    }

    #[test]
    fn test_bounds_from_positions() {
        assert!(Bounds::from_positions(Vec::new()).is_none());

        let bounds = Bounds::from_positions(vec![
            LatLng::new(51.5, -0.2),
            LatLng::new(51.4, 0.1),
            LatLng::new(51.6, 0.0),
        ])
        .unwrap();
        assert_eq!(bounds.min_lat, 51.4);
        assert_eq!(bounds.max_lat, 51.6);
        assert_eq!(bounds.min_lng, -0.2);
        assert_eq!(bounds.max_lng, 0.1);
    }

    #[test]
    fn test_mileage_label() {
        let track = process_batch(&raw_batch(&[0.0]), &SpeedThresholds::default());
        assert_eq!(track.points[0].mileage_label(), "1200.0km");
    }
}
