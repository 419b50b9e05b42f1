//! # singalong - Sing-Along Pitch Trainer
//!
//! Command-line front end for the `pitch-core` engine.
//!
//! ## Architecture
//! - **Main Thread**: HUD loop sampling the session ~10 times per second
//! - **Capture Thread**: Owned by the session; microphone calibration and live analysis
//! - **Loader Thread**: Separation, decoding and song analysis
//! - **Communication**: The loader hands its result back over a crossbeam channel

mod cli;
mod ui;
mod wav;

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::TryRecvError;
use pitch_core::audio::{CpalInput, list_input_devices};
use pitch_core::session::{Phase, Session, WallClock};
use pitch_core::song::{CommandSeparator, PcmDecoder, SongPaths, load_song};
use pitch_core::track::{PitchTrack, TrackAnalyzer};
use pitch_core::tuning::{NoteName, note_for_frequency};
use pitch_core::{Config, Mode};

use cli::{Cli, Command};
use ui::hud::hud_line;
use wav::WavDecoder;

/// HUD refresh interval.
const FRAME_INTERVAL: Duration = Duration::from_millis(100);

/// Config file picked up from the working directory when `--config` is absent.
const LOCAL_CONFIG: &str = "singalong.json";

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Analyze { path, mode, output } => analyze(&config, &path, mode, output.as_deref()),
        Command::Live { song_dir, mode, seconds } => {
            live(config, song_dir, mode, Duration::from_secs(seconds))
        }
        Command::Devices => devices(),
    }
}

fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let local = PathBuf::from(LOCAL_CONFIG);
            if !local.exists() {
                return Ok(Config::default());
            }
            local
        }
    };
    let config = Config::load(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    log::info!("Loaded config from {}", path.display());
    Ok(config)
}

fn analyze(config: &Config, path: &Path, mode: Mode, output: Option<&Path>) -> Result<()> {
    let track = if path.is_dir() {
        let separator = CommandSeparator::new(config.separation.clone());
        load_song(
            &SongPaths::new(path),
            mode,
            &WavDecoder,
            &separator,
            &config.analysis,
            &|m: &str| log::info!("{m}"),
        )
        .with_context(|| format!("Failed to load song from {}", path.display()))?
        .track
    } else {
        let pcm = WavDecoder.decode(path)?;
        TrackAnalyzer::new(config.analysis.clone()).analyze(&pcm.channel(0), pcm.sample_rate, mode)
    };

    print_summary(&track);

    if let Some(output) = output {
        track
            .save_json(output)
            .with_context(|| format!("Failed to write {}", output.display()))?;
        println!("Track written to {}", output.display());
    }
    Ok(())
}

fn print_summary(track: &PitchTrack) {
    println!("Duration:      {:.2} s ({} frames)", track.duration_secs(), track.len());
    println!("Voiced:        {:.1} %", track.voiced_ratio() * 100.0);

    let voiced = track.frames().iter().copied().filter(|&f| f > 0.0);
    let (low, high) = voiced.fold((f32::INFINITY, 0.0f32), |(lo, hi), f| (lo.min(f), hi.max(f)));
    if high > 0.0 {
        println!("Range:         {low:.1} - {high:.1} Hz");
    }

    let mut counts: BTreeMap<i32, (NoteName, usize)> = BTreeMap::new();
    for note in track.frames().iter().filter_map(|&f| note_for_frequency(f)) {
        counts.entry(note.midi).or_insert((note, 0)).1 += 1;
    }
    if let Some((note, n)) = counts.values().max_by_key(|(_, n)| *n) {
        println!("Most frequent: {note} ({n} frames)");
    }
}

fn live(config: Config, song_dir: Option<PathBuf>, mode: Mode, length: Duration) -> Result<()> {
    let clock = Arc::new(WallClock::new());
    let mut session = Session::new(config.clone(), clock.clone()).with_status_sink(|m| {
        // Status lines go above the HUD line.
        println!("\r{m}");
    });

    let audio = config.audio.clone();
    session
        .start(mode, move || {
            CpalInput::open(
                audio.block_size,
                audio.sample_rate,
                Duration::from_millis(audio.read_timeout_ms),
            )
        })
        .context("Failed to start microphone")?;

    let calibration = config.analysis.calibration_duration();
    let profile = session
        .wait_for_calibration(calibration.saturating_add(Duration::from_secs(5)))
        .context("Microphone calibration did not finish")?;
    log::debug!("Live gate threshold {:.6}", profile.threshold);

    let loader = match song_dir {
        Some(dir) if mode.plays_audio() => {
            let (tx, rx) = crossbeam_channel::bounded(1);
            let status = session.status_reporter();
            let analysis = config.analysis.clone();
            let separator = CommandSeparator::new(config.separation.clone());
            thread::Builder::new()
                .name("song-loader".into())
                .spawn(move || {
                    let result = load_song(
                        &SongPaths::new(dir),
                        mode,
                        &WavDecoder,
                        &separator,
                        &analysis,
                        &|m: &str| status.set(m),
                    );
                    let _ = tx.send(result);
                })
                .context("Failed to spawn song loader")?;
            Some(rx)
        }
        _ => {
            session.begin_practice();
            clock.play();
            None
        }
    };

    let mut song_len = None;
    let deadline = Instant::now() + length;
    let mut stdout = std::io::stdout();

    while Instant::now() < deadline {
        if let Some(rx) = &loader {
            match rx.try_recv() {
                Ok(Ok(song)) => {
                    song_len = Some(song.track.duration_secs());
                    if session.install_song(song) {
                        clock.play();
                    }
                }
                Ok(Err(e)) => {
                    session.report_error(&e);
                    break;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {}
            }
        }

        let frame = session.snapshot();
        print!("\r{:<100}", hud_line(&frame));
        stdout.flush().ok();

        if frame.phase == Phase::Idle {
            break;
        }
        let finished = match (song_len, frame.position_ms) {
            (Some(len), Some(ms)) => ms as f64 / 1000.0 >= len,
            _ => false,
        };
        if finished {
            break;
        }
        thread::sleep(FRAME_INTERVAL);
    }
    println!();

    let message = session.snapshot().message;
    session.stop();
    if message.starts_with("Error") {
        anyhow::bail!(message);
    }
    Ok(())
}

fn devices() -> Result<()> {
    let devices = list_input_devices().context("Failed to enumerate input devices")?;
    if devices.is_empty() {
        println!("No input devices found");
    }
    for name in devices {
        println!("  {name}");
    }
    Ok(())
}
