//! # Configuration Module
//!
//! Tunable parameters for capture, analysis and the external separation step.
//! Every field has a default, so a config file only needs the values it
//! overrides. Files are JSON, matching the other persisted data in the crate.
//!
//! The analysis constants (calibration margins, energy floors, gap limit,
//! match tolerance) are empirical. Change them only on the back of a
//! calibration study.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::pitch::FrequencyRange;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub analysis: AnalysisConfig,
    pub separation: SeparationConfig,
}

/// Microphone capture settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Preferred capture rate in Hz.
    pub sample_rate: u32,
    /// Samples per live analysis block (~46 ms at 44.1 kHz).
    pub block_size: usize,
    /// Device open attempts before giving up.
    pub open_attempts: u32,
    /// Base backoff between open attempts; doubles per attempt.
    pub open_backoff_ms: u64,
    /// A read that waits longer than this is treated as a dead device.
    pub read_timeout_ms: u64,
    /// How long `Session::stop` waits for the capture thread.
    pub stop_grace_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            block_size: 2048,
            open_attempts: 3,
            open_backoff_ms: 100,
            read_timeout_ms: 1000,
            stop_grace_ms: 50,
        }
    }
}

/// Pitch analysis parameters shared by the batch and live pipelines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Live calibration length in seconds.
    pub calibration_secs: f32,
    /// Live threshold = loudest calibration block * this.
    pub live_margin: f32,
    /// Batch threshold = 10th percentile block energy * this.
    pub batch_margin: f32,
    /// Blocks sampled from the start of a song for batch calibration.
    pub batch_calibration_blocks: usize,
    /// Minimum batch threshold in vocal-only mode.
    pub vocal_energy_floor: f32,
    /// Minimum batch threshold in every other mode.
    pub energy_floor: f32,
    /// Moving average window of the live smoother.
    pub smoothing_window: usize,
    /// Longest run of silent 10 ms blocks that gap-fill bridges.
    pub max_gap_blocks: usize,
    /// How far back the live pitch history reaches.
    pub history_retention_ms: u64,
    /// Largest MIDI distance (semitones) still counted as a match.
    pub match_tolerance: f32,
    /// Detector bounds in vocal-only mode.
    pub vocal_range: FrequencyRange,
    /// Detector bounds in every other mode.
    pub full_range: FrequencyRange,
    /// Song pitches outside this band are dropped in vocal-only mode.
    pub vocal_filter: FrequencyRange,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            calibration_secs: 2.0,
            live_margin: 1.5,
            batch_margin: 3.0,
            batch_calibration_blocks: 500,
            vocal_energy_floor: 0.005,
            energy_floor: 0.001,
            smoothing_window: 5,
            max_gap_blocks: 20,
            history_retention_ms: 30_000,
            match_tolerance: 0.7,
            vocal_range: FrequencyRange::new(100.0, 1200.0),
            full_range: FrequencyRange::new(40.0, 2000.0),
            vocal_filter: FrequencyRange::new(80.0, 1000.0),
        }
    }
}

impl AnalysisConfig {
    /// Live calibration length. Negative or NaN means none; values past
    /// what a `Duration` holds saturate.
    pub fn calibration_duration(&self) -> Duration {
        Duration::try_from_secs_f32(self.calibration_secs.max(0.0)).unwrap_or(Duration::MAX)
    }
}

/// External vocal separation tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeparationConfig {
    /// Interpreter used when no virtualenv is configured.
    pub python: String,
    /// Script invoked as `<python> <script> <song_file> <song_dir>`.
    pub script: String,
    /// File holding the path of a virtualenv to prefer over `python`.
    pub venv_file: String,
}

impl Default for SeparationConfig {
    fn default() -> Self {
        Self {
            python: "python3".into(),
            script: "separate.py".into(),
            venv_file: "venv_path.txt".into(),
        }
    }
}

impl Config {
    /// Reads a JSON config file. Missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| Error::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
