//! # Playback Session
//!
//! Stateful holder for one device's playback view: the processed track, the
//! speed thresholds it was colored with, and the playback clock.
//!
//! ## Architecture
//!
//! Every fetch, poll or push replaces the track wholesale. The pipeline runs
//! synchronously, the new points are handed to the clock (which rewinds and
//! stops), and segments/stops are swapped in the same call, so nothing can
//! observe a cursor pointing past the new list.

use std::sync::Arc;

use log::{debug, info};
use serde_json::Value;

use crate::error::Result;
use crate::playback::{PlaybackClock, PlaybackConfig, PlaybackState};
use crate::{
    process_batch_with, LatLng, NormalizerConfig, ProcessedTrack, Segment, SpeedThresholds, Stop,
    TrackPoint,
};

/// The processed track plus its playback clock.
#[derive(Debug, Clone)]
pub struct PlaybackSession {
    track: ProcessedTrack,
    clock: PlaybackClock,
    thresholds: SpeedThresholds,
    normalizer: NormalizerConfig,
    batches_loaded: u64,
}

impl PlaybackSession {
    /// Create an empty session with default configuration.
    pub fn new() -> Self {
        Self::with_clock(
            NormalizerConfig::default(),
            SpeedThresholds::default(),
            PlaybackClock::default(),
        )
    }

    /// Create an empty session with custom configuration. Fails on a zero
    /// tick interval.
    pub fn with_config(
        normalizer: NormalizerConfig,
        thresholds: SpeedThresholds,
        playback: PlaybackConfig,
    ) -> Result<Self> {
        let clock = PlaybackClock::new(playback)?;
        Ok(Self::with_clock(normalizer, thresholds, clock))
    }

    fn with_clock(
        normalizer: NormalizerConfig,
        thresholds: SpeedThresholds,
        clock: PlaybackClock,
    ) -> Self {
        Self {
            track: ProcessedTrack::default(),
            clock,
            thresholds,
            normalizer,
            batches_loaded: 0,
        }
    }

    // ========================================================================
    // Data Replacement
    // ========================================================================

    /// Run the pipeline over a newest-first batch and replace the track.
    /// The clock rewinds to 0 and stops.
    pub fn load_batch(&mut self, records: &[Value]) {
        let track = process_batch_with(records, &self.normalizer, &self.thresholds);
        self.replace_track(track);
    }

    /// Parse a response body, then [`Self::load_batch`]. On a parse error
    /// the current track is kept.
    pub fn load_response(&mut self, body: &str) -> Result<()> {
        let records = crate::parse_response(body)?;
        self.load_batch(&records);
        Ok(())
    }

    /// Install an already processed track.
    pub fn replace_track(&mut self, track: ProcessedTrack) {
        let points: Arc<[TrackPoint]> = Arc::from(track.points.clone());
        self.track = track;
        self.clock.load(points);
        self.batches_loaded += 1;

        info!(
            "[PlaybackSession] Loaded batch {}: {} points, {} stops",
            self.batches_loaded,
            self.track.points.len(),
            self.track.stops.len()
        );
    }

    /// Drop the track, e.g. when the selected device changes.
    pub fn clear(&mut self) {
        self.replace_track(ProcessedTrack::default());
    }

    /// Change the speed thresholds and rebuild segments only.
    pub fn set_thresholds(&mut self, thresholds: SpeedThresholds) {
        if thresholds == self.thresholds {
            return;
        }
        self.thresholds = thresholds;
        self.track.rebuild_segments(&self.thresholds);
        debug!(
            "[PlaybackSession] Thresholds {:?} -> {} segments",
            self.thresholds,
            self.track.segments.len()
        );
    }

    /// Change the normalizer (e.g. a new time window). Takes effect on the
    /// next batch.
    pub fn set_normalizer(&mut self, normalizer: NormalizerConfig) {
        self.normalizer = normalizer;
    }

    // ========================================================================
    // Playback Control
    // ========================================================================

    pub fn play(&mut self) -> PlaybackState {
        self.clock.play()
    }

    pub fn pause(&mut self) {
        self.clock.pause();
    }

    pub fn reset(&mut self) {
        self.clock.reset();
    }

    pub fn tick(&mut self) -> PlaybackState {
        self.clock.tick()
    }

    pub fn set_tick_interval_ms(&mut self, interval_ms: u64) -> Result<()> {
        self.clock.set_tick_interval_ms(interval_ms)
    }

    /// Move the cursor (scrubber drag). The state is kept.
    pub fn seek(&mut self, index: usize) {
        self.clock.seek(index);
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn track(&self) -> &ProcessedTrack {
        &self.track
    }

    pub fn points(&self) -> &[TrackPoint] {
        &self.track.points
    }

    pub fn segments(&self) -> &[Segment] {
        &self.track.segments
    }

    pub fn stops(&self) -> &[Stop] {
        &self.track.stops
    }

    pub fn thresholds(&self) -> &SpeedThresholds {
        &self.thresholds
    }

    pub fn clock(&self) -> &PlaybackClock {
        &self.clock
    }

    pub(crate) fn clock_mut(&mut self) -> &mut PlaybackClock {
        &mut self.clock
    }

    /// Current marker position, `None` when there is no data.
    pub fn current_position(&self) -> Option<LatLng> {
        self.clock.current_point().map(TrackPoint::position)
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            point_count: self.track.points.len() as u32,
            segment_count: self.track.segments.len() as u32,
            stop_count: self.track.stops.len() as u32,
            revisit_count: self.track.stops.iter().filter(|s| s.is_revisit).count() as u32,
            trip_count: self.track.trips.iter().filter(|t| t.trip_id > 0).count() as u32,
            batches_loaded: self.batches_loaded,
        }
    }
}

impl Default for PlaybackSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Session statistics for monitoring.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SessionStats {
    pub point_count: u32,
    pub segment_count: u32,
    pub stop_count: u32,
    pub revisit_count: u32,
    /// Trips with actual movement (trip id 0 is the pre-movement dwell)
    pub trip_count: u32,
    pub batches_loaded: u64,
}
