//! Energy gate and calibration.
//!
//! A block is voiced when its mean squared amplitude reaches the threshold of
//! the session's [`CalibrationProfile`]. Unvoiced blocks never reach the
//! detector.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::Mode;
use crate::audio::InputSource;
use crate::config::AnalysisConfig;
use crate::live::CancelToken;
use crate::pitch::FrequencyRange;

/// Gate threshold plus the detector bounds in force for a session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationProfile {
    /// Minimum block energy considered voiced.
    pub threshold: f32,
    pub range: FrequencyRange,
}

impl CalibrationProfile {
    pub fn is_voiced(&self, block: &[f32]) -> bool {
        calculate_energy(block) >= self.threshold
    }
}

/// Mean of the squared samples. An empty block has no energy.
pub fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| s as f64 * s as f64).sum();
    (sum / samples.len() as f64) as f32
}

/// Energy floor applied to batch thresholds for `mode`.
pub fn energy_floor(mode: Mode, config: &AnalysisConfig) -> f32 {
    if mode.is_vocal() {
        config.vocal_energy_floor
    } else {
        config.energy_floor
    }
}

/// Derives a silence threshold from the opening blocks of a song.
///
/// Samples up to `batch_calibration_blocks` whole blocks from the start of
/// the buffer, takes the 10th-percentile energy as the noise floor and scales
/// it by `batch_margin`. The result never drops below the mode's floor, and a
/// buffer shorter than one block yields the floor itself.
pub fn calibrate_from_pcm(
    samples: &[f32],
    block_len: usize,
    mode: Mode,
    config: &AnalysisConfig,
) -> CalibrationProfile {
    let range = FrequencyRange::for_mode(mode, config);
    let floor = energy_floor(mode, config);

    let mut energies: Vec<f32> = if block_len == 0 {
        Vec::new()
    } else {
        samples
            .chunks_exact(block_len)
            .take(config.batch_calibration_blocks)
            .map(calculate_energy)
            .collect()
    };

    if energies.is_empty() {
        return CalibrationProfile { threshold: floor, range };
    }

    let index = energies.len() / 10;
    let (_, percentile10, _) = energies.select_nth_unstable_by(index, f32::total_cmp);
    let threshold = (*percentile10 * config.batch_margin).max(floor);

    CalibrationProfile { threshold, range }
}

/// Measures background noise on a live input for `duration`.
///
/// The threshold is the loudest block seen times `margin`. Reading stops
/// early on a device error or cancellation; with no blocks read the
/// threshold is zero.
pub fn calibrate_from_input<S: InputSource + ?Sized>(
    source: &mut S,
    block: &mut [f32],
    duration: Duration,
    margin: f32,
    range: FrequencyRange,
    cancel: &CancelToken,
) -> CalibrationProfile {
    let start = Instant::now();
    let mut max_energy = 0.0f32;
    let mut blocks = 0usize;

    while start.elapsed() < duration && !cancel.is_cancelled() {
        if let Err(e) = source.read_block(block) {
            log::warn!("Calibration read failed after {blocks} blocks: {e}");
            break;
        }
        max_energy = max_energy.max(calculate_energy(block));
        blocks += 1;
    }

    if blocks == 0 {
        log::warn!("Calibration captured no audio; gate is open");
    }

    let threshold = max_energy * margin;
    log::info!("Calibrated noise threshold {threshold:.6} from {blocks} blocks");
    CalibrationProfile { threshold, range }
}
