//! Tokio ticker for the playback clock.
//!
//! [`PlaybackDriver`] owns the shared session and at most one ticker task.
//! The task is aborted on pause, reset, data replacement, interval change and
//! when the driver is dropped. Each task also carries the clock generation it
//! was started for, so a tick already past its `await` when the task is
//! aborted is rejected by [`crate::PlaybackClock::tick_for`].

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, warn};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::error::{Result, TrackError};
use crate::playback::PlaybackState;
use crate::session::PlaybackSession;

/// Owns a playback session and the task that ticks it.
pub struct PlaybackDriver {
    session: Arc<Mutex<PlaybackSession>>,
    ticker: Option<JoinHandle<()>>,
}

impl PlaybackDriver {
    pub fn new(session: PlaybackSession) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
            ticker: None,
        }
    }

    /// Shared handle for readers (renderers polling the cursor).
    pub fn session(&self) -> Arc<Mutex<PlaybackSession>> {
        Arc::clone(&self.session)
    }

    /// Run a closure against the locked session.
    pub fn with_session<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut PlaybackSession) -> R,
    {
        let mut session = lock(&self.session);
        f(&mut session)
    }

    /// Start playback and its ticker. Must be called inside a tokio runtime.
    pub fn play(&mut self) -> Result<PlaybackState> {
        let state = self.with_session(|s| s.play());
        if state == PlaybackState::Playing {
            if let Err(e) = self.restart_ticker() {
                self.with_session(|s| s.pause());
                return Err(e);
            }
        }
        Ok(state)
    }

    pub fn pause(&mut self) {
        self.cancel_ticker();
        self.with_session(|s| s.pause());
    }

    /// Rewind to the first point. Playback stops.
    pub fn reset(&mut self) {
        self.cancel_ticker();
        self.with_session(|s| s.reset());
    }

    /// Change the tick interval; a running ticker restarts with the new one.
    pub fn set_tick_interval_ms(&mut self, interval_ms: u64) -> Result<()> {
        let playing = self.with_session(|s| {
            s.set_tick_interval_ms(interval_ms)?;
            Ok::<_, TrackError>(s.clock().is_playing())
        })?;
        if playing {
            self.restart_ticker()?;
        } else {
            self.cancel_ticker();
        }
        Ok(())
    }

    /// Replace the track from a new batch. The ticker is cancelled first.
    pub fn load_batch(&mut self, records: &[Value]) {
        self.cancel_ticker();
        self.with_session(|s| s.load_batch(records));
    }

    /// True while a ticker task exists and has not finished.
    pub fn ticker_active(&self) -> bool {
        self.ticker
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    fn cancel_ticker(&mut self) {
        if let Some(handle) = self.ticker.take() {
            handle.abort();
            debug!("[PlaybackDriver] Ticker cancelled");
        }
    }

    fn restart_ticker(&mut self) -> Result<()> {
        self.cancel_ticker();

        let runtime = Handle::try_current().map_err(|e| {
            warn!("[PlaybackDriver] Cannot start ticker: {}", e);
            TrackError::NoRuntime {
                message: e.to_string(),
            }
        })?;
        let (generation, interval_ms) = self.with_session(|s| {
            (s.clock().generation(), s.clock().tick_interval_ms())
        });
        let session = Arc::clone(&self.session);

        self.ticker = Some(runtime.spawn(run_ticker(session, generation, interval_ms)));
        debug!(
            "[PlaybackDriver] Ticker started (generation {}, every {}ms)",
            generation, interval_ms
        );
        Ok(())
    }
}

impl Drop for PlaybackDriver {
    fn drop(&mut self) {
        self.cancel_ticker();
    }
}

async fn run_ticker(session: Arc<Mutex<PlaybackSession>>, generation: u64, interval_ms: u64) {
    let period = Duration::from_millis(interval_ms);
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        let mut guard = lock(&session);
        let clock = guard.clock_mut();
        match clock.tick_for(generation) {
            Some(PlaybackState::Playing) => {}
            Some(PlaybackState::Idle) => {
                debug!("[PlaybackDriver] Reached end at index {}", clock.cursor());
                break;
            }
            None => {
                debug!("[PlaybackDriver] Stale ticker (generation {}) exiting", generation);
                break;
            }
        }
    }
}

fn lock(session: &Mutex<PlaybackSession>) -> MutexGuard<'_, PlaybackSession> {
    session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
