//! Per-trip statistics for the trip list next to the map.

use geo::{Distance, Haversine, Point};
use serde::{Deserialize, Serialize};

use crate::TrackPoint;

/// Aggregate figures for one trip id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripSummary {
    pub trip_id: u32,
    /// Index of the first point with this trip id
    pub first_index: usize,
    /// Index of the last point with this trip id
    pub last_index: usize,
    pub start_time: String,
    pub end_time: String,
    pub sample_count: u32,
    /// Elapsed seconds between first and last sample
    pub duration_secs: i64,
    pub max_speed_kmh: f64,
    /// Haversine length of the point path in meters
    pub path_length_m: f64,
    /// Odometer delta over the trip in km
    pub odometer_km: f64,
}

/// Great-circle distance between two track points in meters.
pub fn point_distance(a: &TrackPoint, b: &TrackPoint) -> f64 {
    Haversine::distance(Point::new(a.lng, a.lat), Point::new(b.lng, b.lat))
}

/// Summarize each trip. Trip ids are contiguous runs in chronological
/// points, so one pass with a break on id change is enough.
pub fn summarize_trips(points: &[TrackPoint]) -> Vec<TripSummary> {
    let mut summaries: Vec<TripSummary> = Vec::new();
    let mut start = 0;

    while start < points.len() {
        let trip_id = points[start].trip_id;
        let end = points[start..]
            .iter()
            .position(|p| p.trip_id != trip_id)
            .map_or(points.len(), |offset| start + offset);

        summaries.push(summarize_run(&points[start..end], start));
        start = end;
    }
    summaries
}

fn summarize_run(run: &[TrackPoint], first_index: usize) -> TripSummary {
    let first = &run[0];
    let last = &run[run.len() - 1];

    let path_length_m = run.windows(2).map(|w| point_distance(&w[0], &w[1])).sum();
    let max_speed_kmh = run.iter().map(|p| p.speed_kmh).fold(0.0, f64::max);

    TripSummary {
        trip_id: first.trip_id,
        first_index,
        last_index: first_index + run.len() - 1,
        start_time: first.timestamp.clone(),
        end_time: last.timestamp.clone(),
        sample_count: run.len() as u32,
        duration_secs: (last.recorded_at - first.recorded_at).num_seconds(),
        max_speed_kmh,
        path_length_m,
        odometer_km: (last.raw_mileage_km - first.raw_mileage_km).max(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::raw_batch;
    use crate::{process_batch, SpeedThresholds};

    #[test]
    fn test_summaries_per_trip() {
        let track = process_batch(
            &raw_batch(&[0.0, 0.0, 30.0, 45.0, 0.0, 60.0, 20.0]),
            &SpeedThresholds::default(),
        );
        let ids: Vec<u32> = track.trips.iter().map(|t| t.trip_id).collect();
        assert_eq!(ids, vec![0, 1, 2]);

        let trip1 = &track.trips[1];
        assert_eq!(trip1.first_index, 2);
        assert_eq!(trip1.last_index, 4);
        assert_eq!(trip1.sample_count, 3);
        assert_eq!(trip1.duration_secs, 2);
        assert_eq!(trip1.max_speed_kmh, 45.0);
        assert!(trip1.path_length_m > 0.0);
        assert!((trip1.odometer_km - 0.1).abs() < 1e-9);

        let trip2 = &track.trips[2];
        assert_eq!(trip2.max_speed_kmh, 60.0);
        assert_eq!(trip2.last_index, 6);
    }

    #[test]
    fn test_point_distance_about_right() {
        let track = process_batch(&raw_batch(&[10.0, 10.0]), &SpeedThresholds::default());
        // 0.0001 deg on both axes near London: ~11 m north, ~7 m east
        let d = point_distance(&track.points[0], &track.points[1]);
        assert!(d > 10.0 && d < 16.0, "distance was {}", d);
    }

    #[test]
    fn test_empty() {
        assert!(summarize_trips(&[]).is_empty());
    }
}
