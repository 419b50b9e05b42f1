use std::f32::consts::PI;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use pitch_core::audio::InputSource;
use pitch_core::session::{Phase, PlaybackClock, Session, lock};
use pitch_core::song::LoadedSong;
use pitch_core::track::{PitchTrack, TrackAnalyzer};
use pitch_core::tuning::note_for_frequency;
use pitch_core::{Config, Error, Mode, Result};

const SR: u32 = 44_100;

fn sine(freq: f32, amplitude: f32, len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| amplitude * (2.0 * PI * freq * i as f32 / SR as f32).sin())
        .collect()
}

#[test]
fn sung_a3_is_tracked_as_a3() {
    let mut song = vec![0.0; SR as usize / 5];
    song.extend(sine(220.0, 0.8, SR as usize));

    let track = TrackAnalyzer::default().analyze(&song, SR, Mode::Singing);

    assert_eq!(track.len(), 120);
    let voiced: Vec<f32> = track.frames().iter().copied().filter(|&f| f > 0.0).collect();
    assert!(voiced.len() >= 90, "only {} voiced frames", voiced.len());
    for freq in voiced {
        assert_eq!(note_for_frequency(freq).map(|n| n.to_string()).as_deref(), Some("A3"), "{freq}");
    }
    // The silent lead-in stays silent.
    assert!(track.frames()[..20].iter().all(|&f| f == 0.0));
}

/// Playback position advanced by one block per microphone read.
#[derive(Default)]
struct BlockClock(AtomicU64);

impl PlaybackClock for BlockClock {
    fn position_ms(&self) -> Option<u64> {
        Some(self.0.load(Ordering::SeqCst))
    }
}

/// A microphone that sings 220 Hz forever, or until `fail_after` reads.
struct FakeMic {
    clock: Arc<BlockClock>,
    phase: usize,
    reads: usize,
    fail_after: Option<usize>,
}

impl FakeMic {
    fn new(clock: Arc<BlockClock>, fail_after: Option<usize>) -> Self {
        Self {
            clock,
            phase: 0,
            reads: 0,
            fail_after,
        }
    }
}

impl InputSource for FakeMic {
    fn sample_rate(&self) -> u32 {
        SR
    }

    fn read_block(&mut self, block: &mut [f32]) -> Result<()> {
        if self.fail_after == Some(self.reads) {
            return Err(Error::StreamClosed);
        }
        self.reads += 1;
        thread::sleep(Duration::from_millis(1));
        for (i, sample) in block.iter_mut().enumerate() {
            let n = (self.phase + i) as f32;
            *sample = 0.8 * (2.0 * PI * 220.0 * n / SR as f32).sin();
        }
        self.phase = (self.phase + block.len()) % SR as usize;
        let block_ms = (block.len() as u64 * 1000) / u64::from(SR);
        self.clock.0.fetch_add(block_ms, Ordering::SeqCst);
        Ok(())
    }
}

fn quick_config() -> Config {
    let mut config = Config::default();
    config.analysis.calibration_secs = 0.0;
    config.audio.open_attempts = 2;
    config.audio.open_backoff_ms = 1;
    config
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

#[test]
fn live_session_records_history() {
    let clock = Arc::new(BlockClock::default());
    let mic_clock = Arc::clone(&clock);
    let mut session = Session::new(quick_config(), clock);

    session
        .start(Mode::Singing, move || Ok(FakeMic::new(Arc::clone(&mic_clock), None)))
        .unwrap();
    let profile = session.wait_for_calibration(Duration::from_secs(2)).unwrap();
    assert_eq!(profile.threshold, 0.0);

    assert!(session.install_song(LoadedSong {
        track: PitchTrack::new(vec![220.0; 100_000]),
        sample_rate: SR,
        source: PathBuf::from("song.wav"),
    }));
    assert_eq!(session.phase(), Phase::Playing);

    let state = session.state();
    assert!(wait_until(Duration::from_secs(5), || lock(&state).history.len() >= 5));

    {
        let s = lock(&state);
        let entries = s.history.entries();
        assert!(entries.windows(2).all(|w| w[0].timestamp_ms < w[1].timestamp_ms));
        for entry in entries {
            assert!((entry.frequency - 220.0).abs() < 220.0 * 0.06, "{entry:?}");
        }
    }

    let frame = session.snapshot();
    assert_eq!(frame.song_note().map(|n| n.to_string()).as_deref(), Some("A3"));
    assert!(frame.is_match(0.7));
    assert!(!frame.trail.is_empty());

    let started = Instant::now();
    session.stop();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(session.phase(), Phase::Idle);
    assert!(wait_until(Duration::from_secs(1), || !lock(&state).capture_active));
}

#[test]
fn failed_device_leaves_session_idle() {
    let mut session = Session::new(quick_config(), Arc::new(BlockClock::default()));

    let err = session
        .start(Mode::FullMix, || Err::<FakeMic, _>(Error::Device("no input device".into())))
        .unwrap_err();

    assert!(matches!(err, Error::DeviceOpen { attempts: 2, .. }), "{err}");
    let frame = session.snapshot();
    assert_eq!(frame.phase, Phase::Idle);
    assert_eq!(frame.message, "Error: Failed to start microphone");
}

#[test]
fn lost_device_returns_session_to_idle() {
    let clock = Arc::new(BlockClock::default());
    let mic_clock = Arc::clone(&clock);
    let mut session = Session::new(quick_config(), clock);

    session
        .start(Mode::Singing, move || Ok(FakeMic::new(Arc::clone(&mic_clock), Some(10))))
        .unwrap();

    assert!(wait_until(Duration::from_secs(5), || session.snapshot().phase == Phase::Idle));
    let frame = session.snapshot();
    assert!(frame.message.starts_with("Error:"), "{}", frame.message);
    assert_eq!(frame.live_pitch, 0.0);
}

/// A microphone whose every read blocks for `delay`.
struct SlowMic {
    amplitude: f32,
    delay: Duration,
}

impl InputSource for SlowMic {
    fn sample_rate(&self) -> u32 {
        SR
    }

    fn read_block(&mut self, block: &mut [f32]) -> Result<()> {
        thread::sleep(self.delay);
        block.copy_from_slice(&sine(220.0, self.amplitude, block.len()));
        Ok(())
    }
}

#[test]
fn stop_does_not_wait_for_a_stuck_device() {
    let clock = Arc::new(BlockClock::default());
    let mut session = Session::new(quick_config(), Arc::clone(&clock) as Arc<dyn PlaybackClock>);

    session
        .start(Mode::Singing, || {
            Ok(SlowMic {
                amplitude: 0.8,
                delay: Duration::from_millis(500),
            })
        })
        .unwrap();
    session.wait_for_calibration(Duration::from_secs(2)).unwrap();
    assert!(session.begin_practice());
    thread::sleep(Duration::from_millis(50));

    let started = Instant::now();
    session.stop();
    assert!(started.elapsed() < Duration::from_millis(200), "{:?}", started.elapsed());
    assert_eq!(session.phase(), Phase::Idle);

    let mic_clock = Arc::clone(&clock);
    session
        .start(Mode::Singing, move || Ok(FakeMic::new(Arc::clone(&mic_clock), None)))
        .unwrap();
    session.wait_for_calibration(Duration::from_secs(2)).unwrap();
    assert!(session.begin_practice());

    // Outlive the stuck read so the old thread gets its chance to write.
    thread::sleep(Duration::from_millis(600));
    let state = session.state();
    {
        let s = lock(&state);
        assert_eq!(s.phase, Phase::Playing);
        assert!(s.capture_active);
        assert!(!s.history.is_empty());
        assert!(s.history.entries().windows(2).all(|w| w[0].timestamp_ms < w[1].timestamp_ms));
    }
    session.stop();
}

#[test]
fn restart_ignores_the_detached_capture_thread() {
    let mut config = quick_config();
    config.analysis.calibration_secs = 10.0;
    let mut session = Session::new(config, Arc::new(BlockClock::default()));

    session
        .start(Mode::Singing, || {
            Ok(SlowMic {
                amplitude: 0.8,
                delay: Duration::from_millis(400),
            })
        })
        .unwrap();
    thread::sleep(Duration::from_millis(50));

    session
        .start(Mode::Singing, || {
            Ok(SlowMic {
                amplitude: 0.01,
                delay: Duration::from_millis(1),
            })
        })
        .unwrap();

    // The loud session's read returns well inside this window.
    thread::sleep(Duration::from_millis(800));
    let frame = session.snapshot();
    assert_eq!(frame.phase, Phase::Calibrating);
    assert_eq!(frame.calibration, None);
    assert!(lock(&session.state()).capture_active);
    assert!(
        session.wait_for_calibration(Duration::from_millis(10)).is_err(),
        "calibration from the replaced session leaked through"
    );

    let started = Instant::now();
    session.stop();
    assert!(started.elapsed() < Duration::from_millis(200));
}
