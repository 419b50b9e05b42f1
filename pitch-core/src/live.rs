//! # Live Capture Module
//!
//! Turns microphone blocks into a smoothed live pitch and a history trail.
//!
//! ## Features
//! - Energy gate, detector and smoother chained per block ([`LivePipeline`])
//! - A dedicated, named capture thread that owns the input device
//! - Cooperative cancellation and a bounded, join-free shutdown
//!
//! The capture thread is the only place the device is opened, read and
//! dropped. Device reads happen outside the session lock; only the publish
//! step takes it, and only while the thread's generation is current. A
//! thread detached by a stop therefore never touches the next session.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::Mode;
use crate::audio::{InputSource, open_with_retry};
use crate::config::Config;
use crate::energy::{CalibrationProfile, calibrate_from_input};
use crate::error::{Error, Result};
use crate::pitch::{FrequencyRange, detect_pitch};
use crate::session::{Phase, PlaybackClock, SharedState, lock_current};
use crate::smoother::Smoother;

/// Shared flag asking the capture thread to finish.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-block live analysis: gate, detect, smooth.
#[derive(Debug, Clone)]
pub struct LivePipeline {
    profile: CalibrationProfile,
    sample_rate: u32,
    smoother: Smoother,
}

impl LivePipeline {
    pub fn new(profile: CalibrationProfile, sample_rate: u32, smoothing_window: usize) -> Self {
        Self {
            profile,
            sample_rate,
            smoother: Smoother::new(smoothing_window),
        }
    }

    pub fn profile(&self) -> &CalibrationProfile {
        &self.profile
    }

    /// Analyzes one block and returns the smoothed pitch.
    ///
    /// A block under the gate threshold skips detection entirely and
    /// clears the smoother, so the result is `0.0`.
    pub fn process_block(&mut self, block: &[f32]) -> f32 {
        if !self.profile.is_voiced(block) {
            return self.smoother.smooth(0.0);
        }
        let raw = detect_pitch(block, self.sample_rate, self.profile.range);
        self.smoother.smooth(raw)
    }
}

/// Reads and analyzes blocks until cancelled, retired or the device fails.
///
/// Blocks are only analyzed while the session is [`Phase::Playing`]; in any
/// other phase they are read and dropped so the device buffer keeps draining.
/// When the clock reports a playback position the smoothed value is
/// appended to the history under that timestamp. Once the session moves
/// past `generation` the loop returns without publishing anything.
pub fn run_capture_loop<S: InputSource + ?Sized>(
    source: &mut S,
    pipeline: &mut LivePipeline,
    block: &mut [f32],
    state: &SharedState,
    generation: u64,
    clock: &dyn PlaybackClock,
    cancel: &CancelToken,
) -> Result<()> {
    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }

        source.read_block(block)?;

        match lock_current(state, generation) {
            None => return Ok(()),
            Some(s) if s.phase != Phase::Playing => continue,
            Some(_) => {}
        }

        let pitch = pipeline.process_block(block);
        let position = clock.position_ms();

        let Some(mut s) = lock_current(state, generation) else {
            return Ok(());
        };
        if let Some(position) = position {
            s.history.push(position, pitch);
            s.history.prune(position);
        }
        s.live_pitch = pitch;
    }
}

/// Everything the capture thread needs, resolved from [`Config`] up front.
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub block_size: usize,
    pub calibration: Duration,
    pub live_margin: f32,
    pub range: FrequencyRange,
    pub smoothing_window: usize,
    pub open_attempts: u32,
    pub open_backoff: Duration,
}

impl CaptureSettings {
    pub fn new(mode: Mode, config: &Config) -> Self {
        let analysis = &config.analysis;
        Self {
            block_size: config.audio.block_size.max(1),
            calibration: analysis.calibration_duration(),
            live_margin: analysis.live_margin,
            range: FrequencyRange::for_mode(mode, analysis),
            smoothing_window: analysis.smoothing_window,
            open_attempts: config.audio.open_attempts,
            open_backoff: Duration::from_millis(config.audio.open_backoff_ms),
        }
    }
}

/// Control side of a running capture thread.
///
/// Dropping the handle does not stop the thread; call [`CaptureHandle::stop`].
#[derive(Debug)]
pub struct CaptureHandle {
    cancel: CancelToken,
    calibrated: Receiver<CalibrationProfile>,
    /// Never carries a message; disconnects when the thread exits.
    done: Receiver<()>,
}

impl CaptureHandle {
    pub fn is_finished(&self) -> bool {
        matches!(self.done.try_recv(), Err(TryRecvError::Disconnected))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Waits for the live calibration result.
    ///
    /// The profile is delivered once; later calls report the thread state.
    pub fn wait_for_calibration(&self, timeout: Duration) -> Result<CalibrationProfile> {
        match self.calibrated.recv_timeout(timeout) {
            Ok(profile) => Ok(profile),
            Err(RecvTimeoutError::Timeout) => Err(Error::CalibrationTimeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(Error::CaptureThread),
        }
    }

    /// Asks the thread to finish and waits at most `grace` for it.
    ///
    /// Returns whether the thread exited in time. It is never joined; a
    /// thread stuck in a device read finishes on its own once the read
    /// returns.
    pub fn stop(self, grace: Duration) -> bool {
        self.cancel.cancel();
        match self.done.recv_timeout(grace) {
            Err(RecvTimeoutError::Timeout) => {
                log::warn!("Capture thread still running after {grace:?}, detaching");
                false
            }
            _ => true,
        }
    }
}

/// Starts the capture thread and waits until the device is open.
///
/// `opener` runs on the new thread (device handles need not be `Send`) and
/// is retried with backoff per `settings`. On success the thread calibrates
/// against background noise, publishes the profile, moves the session from
/// `Calibrating` to `Loading` and enters the capture loop. Every write to
/// `state` is skipped once the session has moved past `generation`.
///
/// # Returns
/// * `Ok(handle)` - The device is open and the thread is running
/// * `Err(_)` - The device never opened or the thread could not start
pub fn spawn_capture<S, F>(
    mut opener: F,
    settings: CaptureSettings,
    state: SharedState,
    generation: u64,
    clock: Arc<dyn PlaybackClock>,
) -> Result<CaptureHandle>
where
    S: InputSource + 'static,
    F: FnMut() -> Result<S> + Send + 'static,
{
    let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<()>>(1);
    let (calibrated_tx, calibrated_rx) = crossbeam_channel::bounded(1);
    let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(0);
    let cancel = CancelToken::new();
    let thread_cancel = cancel.clone();

    thread::Builder::new()
        .name("pitch-capture".into())
        .spawn(move || {
            let _done = done_tx;

            let mut source =
                match open_with_retry(&mut opener, settings.open_attempts, settings.open_backoff) {
                    Ok(source) => source,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
            if let Some(mut s) = lock_current(&state, generation) {
                s.capture_active = true;
            }
            let _ = ready_tx.send(Ok(()));

            let result = capture_session(
                &mut source,
                &settings,
                &state,
                generation,
                clock.as_ref(),
                &thread_cancel,
                &calibrated_tx,
            );

            drop(source);
            let Some(mut s) = lock_current(&state, generation) else {
                log::debug!("Retired capture thread released its device");
                return;
            };
            s.capture_active = false;
            s.live_pitch = 0.0;
            match result {
                Ok(()) => log::debug!("Capture thread finished"),
                Err(e) => {
                    log::error!("Live capture stopped: {e}");
                    if !thread_cancel.is_cancelled() {
                        s.message = format!("Error: {e}");
                    }
                }
            }
        })
        .map_err(|source| Error::Thread {
            name: "capture",
            source,
        })?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(CaptureHandle {
            cancel,
            calibrated: calibrated_rx,
            done: done_rx,
        }),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(Error::CaptureThread),
    }
}

fn capture_session<S: InputSource + ?Sized>(
    source: &mut S,
    settings: &CaptureSettings,
    state: &SharedState,
    generation: u64,
    clock: &dyn PlaybackClock,
    cancel: &CancelToken,
    calibrated: &Sender<CalibrationProfile>,
) -> Result<()> {
    let mut block = vec![0.0f32; settings.block_size];

    let profile = calibrate_from_input(
        source,
        &mut block,
        settings.calibration,
        settings.live_margin,
        settings.range,
        cancel,
    );
    {
        let Some(mut s) = lock_current(state, generation) else {
            return Ok(());
        };
        s.calibration = Some(profile);
        if s.phase == Phase::Calibrating {
            s.phase = Phase::Loading;
        }
    }
    let _ = calibrated.try_send(profile);

    let mut pipeline = LivePipeline::new(profile, source.sample_rate(), settings.smoothing_window);
    run_capture_loop(source, &mut pipeline, &mut block, state, generation, clock, cancel)
}
