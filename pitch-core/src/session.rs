//! # Session Module
//!
//! Owns the shared state of one sing-along session and the capture thread
//! that feeds it.
//!
//! ## Features
//! - One `Mutex`-guarded [`SessionState`] shared by the capture thread and the renderer
//! - Phase tracking: idle, calibrating, loading, playing
//! - Status messages mirrored to an optional sink and the log
//! - Per-frame snapshots for a renderer ([`RenderFrame`])
//! - Bounded shutdown that never blocks on a stuck device
//!
//! Playback itself lives outside this crate. The session only needs a
//! [`PlaybackClock`] to timestamp live readings and look up the song pitch.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::Mode;
use crate::audio::InputSource;
use crate::config::Config;
use crate::energy::CalibrationProfile;
use crate::error::{Error, Result};
use crate::history::{PitchHistory, PitchSample};
use crate::live::{CaptureHandle, CaptureSettings, spawn_capture};
use crate::song::LoadedSong;
use crate::track::PitchTrack;
use crate::tuning::{NoteName, is_pitch_match, note_for_frequency};

/// How much of the history a [`RenderFrame`] carries.
pub const VISIBLE_TRAIL_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Idle,
    /// Measuring background noise.
    Calibrating,
    /// Separating and analyzing the song.
    Loading,
    /// Live readings are analyzed and recorded.
    Playing,
}

/// State shared between the capture thread and the renderer.
#[derive(Debug, Default)]
pub struct SessionState {
    pub phase: Phase,
    pub mode: Option<Mode>,
    /// Latest smoothed live pitch, `0.0` for silence.
    pub live_pitch: f32,
    pub history: PitchHistory,
    pub track: Option<Arc<PitchTrack>>,
    pub calibration: Option<CalibrationProfile>,
    /// User-facing status line; empty when there is nothing to say.
    pub message: String,
    /// Set by the capture thread while it holds the device.
    pub capture_active: bool,
    /// Id of the capture run allowed to write here. Bumped on every start
    /// and stop; a thread holding an older id only releases its device.
    pub generation: u64,
}

pub type SharedState = Arc<Mutex<SessionState>>;

/// Locks the session state, recovering it if a holder panicked.
pub fn lock(state: &SharedState) -> MutexGuard<'_, SessionState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Locks the session state only while `generation` is still current.
pub fn lock_current(state: &SharedState, generation: u64) -> Option<MutexGuard<'_, SessionState>> {
    let guard = lock(state);
    (guard.generation == generation).then_some(guard)
}

/// Current playback position of the song.
pub trait PlaybackClock: Send + Sync {
    /// Position in milliseconds, `None` while nothing is playing.
    fn position_ms(&self) -> Option<u64>;
}

/// Wall-time playback clock for sessions without a real player.
#[derive(Debug, Default)]
pub struct WallClock {
    inner: Mutex<ClockState>,
}

#[derive(Debug, Default)]
struct ClockState {
    started: Option<Instant>,
    offset_ms: u64,
}

impl ClockState {
    fn position_ms(&self) -> Option<u64> {
        self.started
            .map(|started| self.offset_ms + started.elapsed().as_millis() as u64)
    }
}

impl WallClock {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ClockState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn play(&self) {
        let mut s = self.state();
        if s.started.is_none() {
            s.started = Some(Instant::now());
        }
    }

    pub fn pause(&self) {
        let mut s = self.state();
        if let Some(position) = s.position_ms() {
            s.offset_ms = position;
            s.started = None;
        }
    }

    /// Jumps to `position_ms`, keeping the play/pause state.
    pub fn seek(&self, position_ms: u64) {
        let mut s = self.state();
        s.offset_ms = position_ms;
        if s.started.is_some() {
            s.started = Some(Instant::now());
        }
    }

    pub fn is_playing(&self) -> bool {
        self.state().started.is_some()
    }
}

impl PlaybackClock for WallClock {
    fn position_ms(&self) -> Option<u64> {
        self.state().position_ms()
    }
}

/// Everything a renderer needs for one frame, copied out of the session.
#[derive(Debug, Clone, Default)]
pub struct RenderFrame {
    pub phase: Phase,
    pub mode: Option<Mode>,
    pub message: String,
    pub position_ms: Option<u64>,
    pub live_pitch: f32,
    /// Song pitch at `position_ms`, `0.0` without a track.
    pub song_pitch: f32,
    /// Live and song pitch agree within the configured tolerance.
    pub matched: bool,
    /// History entries inside the visible window, oldest first.
    pub trail: Vec<PitchSample>,
    pub calibration: Option<CalibrationProfile>,
}

impl RenderFrame {
    pub fn user_note(&self) -> Option<NoteName> {
        note_for_frequency(self.live_pitch)
    }

    pub fn song_note(&self) -> Option<NoteName> {
        note_for_frequency(self.song_pitch)
    }

    pub fn is_match(&self, tolerance: f32) -> bool {
        is_pitch_match(self.live_pitch, self.song_pitch, tolerance)
    }
}

pub type StatusSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Publishes status messages; cheap to clone onto worker threads.
#[derive(Clone)]
pub struct StatusReporter {
    state: SharedState,
    sink: Option<StatusSink>,
}

impl StatusReporter {
    pub fn set(&self, message: &str) {
        lock(&self.state).message = message.to_string();
        log::info!("{message}");
        if let Some(sink) = &self.sink {
            sink(message);
        }
    }
}

/// A running sing-along session.
///
/// The session is stopped when dropped.
pub struct Session {
    config: Config,
    state: SharedState,
    clock: Arc<dyn PlaybackClock>,
    capture: Option<CaptureHandle>,
    sink: Option<StatusSink>,
}

impl Session {
    pub fn new(config: Config, clock: Arc<dyn PlaybackClock>) -> Self {
        let history = PitchHistory::new(config.analysis.history_retention_ms);
        Self {
            config,
            state: Arc::new(Mutex::new(SessionState {
                history,
                ..SessionState::default()
            })),
            clock,
            capture: None,
            sink: None,
        }
    }

    /// Also sends every status message to `sink`.
    pub fn with_status_sink(mut self, sink: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.sink = Some(Arc::new(sink));
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> SharedState {
        Arc::clone(&self.state)
    }

    pub fn status_reporter(&self) -> StatusReporter {
        StatusReporter {
            state: Arc::clone(&self.state),
            sink: self.sink.clone(),
        }
    }

    pub fn set_status(&self, message: &str) {
        self.status_reporter().set(message);
    }

    pub fn phase(&self) -> Phase {
        lock(&self.state).phase
    }

    /// Starts a session in `mode`, replacing any running one.
    ///
    /// Blocks until the capture thread has opened the device through
    /// `opener` (with retries). Calibration then runs in the background;
    /// see [`Session::wait_for_calibration`].
    pub fn start<S, F>(&mut self, mode: Mode, opener: F) -> Result<()>
    where
        S: InputSource + 'static,
        F: FnMut() -> Result<S> + Send + 'static,
    {
        self.stop();

        let generation = {
            let mut s = lock(&self.state);
            let generation = s.generation.wrapping_add(1);
            *s = SessionState {
                phase: Phase::Calibrating,
                mode: Some(mode),
                history: PitchHistory::new(self.config.analysis.history_retention_ms),
                generation,
                ..SessionState::default()
            };
            generation
        };
        log::debug!("Starting session in {mode} mode");
        self.set_status("Calibrating background noise...");

        let settings = CaptureSettings::new(mode, &self.config);
        match spawn_capture(
            opener,
            settings,
            Arc::clone(&self.state),
            generation,
            Arc::clone(&self.clock),
        ) {
            Ok(handle) => {
                self.capture = Some(handle);
                Ok(())
            }
            Err(e) => {
                log::error!("{e}");
                {
                    let mut s = lock(&self.state);
                    s.phase = Phase::Idle;
                    s.mode = None;
                }
                self.set_status("Error: Failed to start microphone");
                Err(e)
            }
        }
    }

    /// Waits until live calibration has produced a profile.
    pub fn wait_for_calibration(&self, timeout: Duration) -> Result<CalibrationProfile> {
        if let Some(profile) = lock(&self.state).calibration {
            return Ok(profile);
        }
        let handle = self.capture.as_ref().ok_or(Error::CaptureThread)?;
        match handle.wait_for_calibration(timeout) {
            Ok(profile) => Ok(profile),
            // The profile may have been taken by an earlier waiter.
            Err(e) => lock(&self.state).calibration.ok_or(e),
        }
    }

    /// Installs an analyzed song and starts recording live readings.
    ///
    /// Returns `false` (and discards the song) when the session was stopped
    /// while the song was loading.
    pub fn install_song(&self, song: LoadedSong) -> bool {
        let mut s = lock(&self.state);
        if s.phase == Phase::Idle {
            log::warn!("Discarding {}: session is not running", song.source.display());
            return false;
        }
        log::info!(
            "Installed {} ({:.1} s, {:.0}% voiced)",
            song.source.display(),
            song.track.duration_secs(),
            song.track.voiced_ratio() * 100.0
        );
        s.track = Some(Arc::new(song.track));
        s.phase = Phase::Playing;
        s.message.clear();
        true
    }

    /// Starts recording live readings without a song.
    pub fn begin_practice(&self) -> bool {
        let mut s = lock(&self.state);
        if s.phase == Phase::Idle {
            return false;
        }
        s.track = None;
        s.phase = Phase::Playing;
        s.message.clear();
        true
    }

    /// Shows a failed load. Nothing from the failed attempt is installed.
    pub fn report_error(&self, err: &dyn std::fmt::Display) {
        log::error!("{err}");
        self.set_status(&format!("Error: {err}"));
    }

    /// Copies what the renderer needs for the current frame.
    ///
    /// Also notices a capture thread that died on its own (device lost) and
    /// returns the session to [`Phase::Idle`].
    pub fn snapshot(&self) -> RenderFrame {
        let position_ms = self.clock.position_ms();
        let capture_died = self
            .capture
            .as_ref()
            .is_some_and(|h| h.is_finished() && !h.is_cancelled());

        let mut s = lock(&self.state);
        if capture_died && s.phase != Phase::Idle {
            log::warn!("Capture thread exited, session is idle");
            s.phase = Phase::Idle;
            if s.message.is_empty() {
                s.message = "Error: Microphone stopped".into();
            }
        }

        let to = position_ms.or_else(|| s.history.last().map(|e| e.timestamp_ms));
        let trail = to
            .map(|to| s.history.window(to.saturating_sub(VISIBLE_TRAIL_MS), to))
            .unwrap_or_default();
        let song_pitch = match (&s.track, position_ms) {
            (Some(track), Some(ms)) => track.frequency_at(ms as f64 / 1000.0),
            _ => 0.0,
        };

        RenderFrame {
            phase: s.phase,
            mode: s.mode,
            message: s.message.clone(),
            position_ms,
            live_pitch: s.live_pitch,
            song_pitch,
            matched: is_pitch_match(s.live_pitch, song_pitch, self.config.analysis.match_tolerance),
            trail,
            calibration: s.calibration,
        }
    }

    /// Stops the capture thread and clears the session.
    ///
    /// Waits at most the configured grace period plus one block for the
    /// thread, then proceeds regardless.
    pub fn stop(&mut self) {
        if let Some(handle) = self.capture.take() {
            let audio = &self.config.audio;
            let block = Duration::from_secs_f64(
                audio.block_size as f64 / f64::from(audio.sample_rate.max(1)),
            );
            let grace = Duration::from_millis(audio.stop_grace_ms) + block;
            if handle.stop(grace) {
                log::debug!("Capture thread stopped");
            }
        }

        let mut s = lock(&self.state);
        s.generation = s.generation.wrapping_add(1);
        s.phase = Phase::Idle;
        s.mode = None;
        s.track = None;
        s.live_pitch = 0.0;
        s.history.clear();
        s.message.clear();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}
