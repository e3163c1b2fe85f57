//! Playback cursor over a processed track.
//!
//! The clock owns a shared, immutable point list and a single cursor. It has
//! no timer of its own: something calls [`PlaybackClock::tick`] at the
//! configured interval (see [`crate::timer::PlaybackDriver`]).
//!
//! Every transition that must invalidate an in-flight tick bumps
//! [`PlaybackClock::generation`]. A ticker records the generation it was
//! started for and uses [`PlaybackClock::tick_for`], so a late tick can never
//! move the cursor of a replaced list.

use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackError};
use crate::{LatLng, TrackPoint};

/// Playback state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackState {
    /// Cursor fixed, no ticking
    Idle,
    /// Cursor advances once per tick
    Playing,
}

/// Configuration for playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Milliseconds between ticks.
    /// Default: 1000
    pub tick_interval_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
        }
    }
}

/// Cursor, state and tick interval for one point list.
#[derive(Debug, Clone)]
pub struct PlaybackClock {
    points: Arc<[TrackPoint]>,
    cursor: usize,
    state: PlaybackState,
    tick_interval_ms: u64,
    generation: u64,
}

impl PlaybackClock {
    /// Create an idle clock over an empty list. A zero tick interval is
    /// rejected.
    pub fn new(config: PlaybackConfig) -> Result<Self> {
        Ok(Self::idle(validate_interval(config.tick_interval_ms)?))
    }

    /// Create an idle clock over a point list.
    pub fn with_points(points: Arc<[TrackPoint]>, config: PlaybackConfig) -> Result<Self> {
        let mut clock = Self::new(config)?;
        clock.points = points;
        Ok(clock)
    }

    fn idle(tick_interval_ms: u64) -> Self {
        Self {
            points: Arc::from(Vec::<TrackPoint>::new()),
            cursor: 0,
            state: PlaybackState::Idle,
            tick_interval_ms,
            generation: 0,
        }
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Replace the point list. The cursor goes back to 0 and the clock stops.
    pub fn load(&mut self, points: Arc<[TrackPoint]>) {
        self.points = points;
        self.cursor = 0;
        self.state = PlaybackState::Idle;
        self.generation += 1;
    }

    /// Start playing. Returns the resulting state: a list with nothing left
    /// to play (empty, or cursor already on the last point) stays `Idle`.
    pub fn play(&mut self) -> PlaybackState {
        if self.state == PlaybackState::Idle && self.cursor + 1 < self.points.len() {
            self.state = PlaybackState::Playing;
            self.generation += 1;
        }
        self.state
    }

    pub fn pause(&mut self) {
        if self.state == PlaybackState::Playing {
            self.state = PlaybackState::Idle;
            self.generation += 1;
        }
    }

    /// Rewind to the first point and stop.
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.state = PlaybackState::Idle;
        self.generation += 1;
    }

    /// Change the tick interval. Zero is rejected.
    pub fn set_tick_interval_ms(&mut self, interval_ms: u64) -> Result<()> {
        let interval_ms = validate_interval(interval_ms)?;
        if interval_ms != self.tick_interval_ms {
            self.tick_interval_ms = interval_ms;
            self.generation += 1;
        }
        Ok(())
    }

    /// Advance one step while playing. Reaching the last index stops the
    /// clock; the cursor never leaves `0..len`.
    pub fn tick(&mut self) -> PlaybackState {
        if self.state != PlaybackState::Playing {
            return self.state;
        }
        let last = self.points.len().saturating_sub(1);
        if self.cursor < last {
            self.cursor += 1;
        }
        if self.cursor >= last {
            self.state = PlaybackState::Idle;
            self.generation += 1;
        }
        self.state
    }

    /// Tick only if no transition happened since `generation` was observed.
    /// Returns `None` for a stale tick.
    pub fn tick_for(&mut self, generation: u64) -> Option<PlaybackState> {
        (generation == self.generation).then(|| self.tick())
    }

    /// Jump the cursor to an index (e.g. a scrubber drag), clamped to range.
    pub fn seek(&mut self, index: usize) {
        self.cursor = index.min(self.points.len().saturating_sub(1));
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    pub fn tick_interval_ms(&self) -> u64 {
        self.tick_interval_ms
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn points(&self) -> &[TrackPoint] {
        &self.points
    }

    /// Point under the cursor, `None` for an empty list.
    pub fn current_point(&self) -> Option<&TrackPoint> {
        self.points.get(self.cursor)
    }

    /// `cursor / (len - 1)`, 0.0 for lists shorter than 2.
    pub fn progress(&self) -> f64 {
        let len = self.points.len();
        if len < 2 {
            return 0.0;
        }
        self.cursor as f64 / (len - 1) as f64
    }

    /// Elapsed time since the start of the run of points sharing the
    /// movement status and trip id of `index`. `None` when out of range.
    pub fn duration_at(&self, index: usize) -> Option<Duration> {
        duration_in_state(&self.points, index)
    }

    /// [`Self::duration_at`] rendered for display, `"0s"` when out of range.
    pub fn duration_string_at(&self, index: usize) -> String {
        self.duration_at(index)
            .map_or_else(|| "0s".to_string(), format_duration)
    }

    /// Heading in degrees from the previous point to the cursor point
    /// (0 = north, clockwise positive), 0.0 at the start of the list.
    pub fn heading(&self) -> f64 {
        if self.cursor == 0 {
            return 0.0;
        }
        match (self.points.get(self.cursor - 1), self.points.get(self.cursor)) {
            (Some(prev), Some(curr)) => bearing(prev.position(), curr.position()),
            _ => 0.0,
        }
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::idle(PlaybackConfig::default().tick_interval_ms)
    }
}

fn validate_interval(interval_ms: u64) -> Result<u64> {
    if interval_ms == 0 {
        return Err(TrackError::ConfigError {
            message: "tick interval must be at least 1 ms".to_string(),
        });
    }
    Ok(interval_ms)
}

/// Planar bearing used for marker rotation.
fn bearing(from: LatLng, to: LatLng) -> f64 {
    (to.lng - from.lng).atan2(to.lat - from.lat).to_degrees()
}

/// See [`PlaybackClock::duration_at`].
pub fn duration_in_state(points: &[TrackPoint], index: usize) -> Option<Duration> {
    let current = points.get(index)?;
    let run_start = points[..index]
        .iter()
        .rposition(|p| {
            p.movement_status != current.movement_status || p.trip_id != current.trip_id
        })
        .map_or(0, |breaker| breaker + 1);

    let elapsed = current.recorded_at - points[run_start].recorded_at;
    Some(if elapsed < Duration::zero() { -elapsed } else { elapsed })
}

/// Whole hours, minutes and seconds: `"1h 0m 5s"`, `"2m 3s"`, `"7s"`.
///
/// Hours are omitted when zero; minutes appear when nonzero or when hours do.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.num_seconds().abs();
    let h = total / 3600;
    let m = (total % 3600) / 60;
    let s = total % 60;

    let mut out = String::new();
    if h > 0 {
        out.push_str(&format!("{}h ", h));
    }
    if m > 0 || h > 0 {
        out.push_str(&format!("{}m ", m));
    }
    out.push_str(&format!("{}s", s));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::raw_batch;
    use crate::{process_batch, SpeedThresholds};

    fn clock_for(speeds: &[f64]) -> PlaybackClock {
        let track = process_batch(&raw_batch(speeds), &SpeedThresholds::default());
        PlaybackClock::with_points(Arc::from(track.points), PlaybackConfig::default()).unwrap()
    }

    #[test]
    fn test_ticks_stop_at_last_index() {
        let mut clock = clock_for(&[10.0; 5]);
        assert_eq!(clock.play(), PlaybackState::Playing);

        for _ in 0..10 {
            clock.tick();
        }
        assert_eq!(clock.cursor(), 4);
        assert_eq!(clock.state(), PlaybackState::Idle);
        assert_eq!(clock.progress(), 1.0);
    }

    #[test]
    fn test_tick_while_idle_is_noop() {
        let mut clock = clock_for(&[10.0; 3]);
        clock.tick();
        assert_eq!(clock.cursor(), 0);
    }

    #[test]
    fn test_play_empty_or_finished_stays_idle() {
        let mut empty = PlaybackClock::default();
        assert_eq!(empty.play(), PlaybackState::Idle);
        assert!(empty.current_point().is_none());
        assert_eq!(empty.progress(), 0.0);

        let mut single = clock_for(&[10.0]);
        assert_eq!(single.play(), PlaybackState::Idle);
    }

    #[test]
    fn test_pause_and_resume() {
        let mut clock = clock_for(&[10.0; 5]);
        clock.play();
        clock.tick();
        clock.pause();
        clock.tick();
        assert_eq!(clock.cursor(), 1);

        clock.play();
        clock.tick();
        assert_eq!(clock.cursor(), 2);
        assert!((clock.progress() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_reset_forces_idle() {
        let mut clock = clock_for(&[10.0; 5]);
        clock.play();
        clock.tick();
        clock.tick();
        clock.reset();
        assert_eq!(clock.cursor(), 0);
        assert_eq!(clock.state(), PlaybackState::Idle);
    }

    #[test]
    fn test_load_resets_cursor_and_state() {
        let mut clock = clock_for(&[10.0; 5]);
        clock.play();
        clock.tick();
        clock.tick();
        clock.tick();

        let shorter = process_batch(&raw_batch(&[10.0; 2]), &SpeedThresholds::default());
        clock.load(Arc::from(shorter.points));
        assert_eq!(clock.cursor(), 0);
        assert!(!clock.is_playing());
        assert_eq!(clock.points().len(), 2);
    }

    #[test]
    fn test_stale_tick_is_ignored() {
        let mut clock = clock_for(&[10.0; 5]);
        clock.play();
        let observed = clock.generation();

        assert_eq!(clock.tick_for(observed), Some(PlaybackState::Playing));
        clock.pause();
        clock.play();
        assert_eq!(clock.tick_for(observed), None);
        assert_eq!(clock.cursor(), 1);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut clock = PlaybackClock::default();
        assert!(clock.set_tick_interval_ms(0).is_err());
        assert_eq!(clock.tick_interval_ms(), 1000);
        assert!(clock.set_tick_interval_ms(250).is_ok());
        assert_eq!(clock.tick_interval_ms(), 250);
    }

    #[test]
    fn test_zero_interval_rejected_at_construction() {
        let config = PlaybackConfig { tick_interval_ms: 0 };
        assert!(matches!(
            PlaybackClock::new(config),
            Err(TrackError::ConfigError { .. })
        ));
        assert!(PlaybackClock::with_points(Arc::from(Vec::<TrackPoint>::new()), config).is_err());

        let clock = PlaybackClock::new(PlaybackConfig { tick_interval_ms: 40 }).unwrap();
        assert_eq!(clock.tick_interval_ms(), 40);
    }

    #[test]
    fn test_seek_clamps() {
        let mut clock = clock_for(&[10.0; 3]);
        clock.seek(99);
        assert_eq!(clock.cursor(), 2);
    }

    #[test]
    fn test_duration_in_current_state() {
        // stopped x3, moving x4 (trip 1)
        let clock = clock_for(&[0.0, 0.0, 0.0, 10.0, 10.0, 10.0, 10.0]);
        assert_eq!(clock.duration_at(2), Some(Duration::seconds(2)));
        assert_eq!(clock.duration_at(3), Some(Duration::zero()));
        assert_eq!(clock.duration_at(6), Some(Duration::seconds(3)));
        assert_eq!(clock.duration_at(7), None);
        assert_eq!(clock.duration_string_at(6), "3s");
        assert_eq!(clock.duration_string_at(42), "0s");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::seconds(7)), "7s");
        assert_eq!(format_duration(Duration::seconds(123)), "2m 3s");
        assert_eq!(format_duration(Duration::seconds(3605)), "1h 0m 5s");
        assert_eq!(format_duration(Duration::seconds(0)), "0s");
    }

    #[test]
    fn test_heading() {
        let mut clock = clock_for(&[10.0; 3]);
        assert_eq!(clock.heading(), 0.0);
        clock.seek(1);
        // fixture walks equally north and east
        assert!((clock.heading() - 45.0).abs() < 1e-4);
    }
}
