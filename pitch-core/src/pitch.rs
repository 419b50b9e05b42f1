//! # Pitch Detection Module
//!
//! This module implements the fundamental-frequency estimator shared by the
//! song analyzer and the live microphone pipeline.
//!
//! ## Features
//! - Time-domain autocorrelation over a bounded lag range
//! - Every other sample is correlated, halving the cost per lag
//! - Mode-specific frequency bounds
//! - "No pitch" is reported as `0.0`, never as an error

use serde::{Deserialize, Serialize};

use crate::Mode;
use crate::config::AnalysisConfig;

/// Inclusive frequency bounds in Hz.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrequencyRange {
    pub min: f32,
    pub max: f32,
}

impl FrequencyRange {
    pub const fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    /// Detector bounds for the given mode.
    ///
    /// Vocal-only material gets a narrower band; everything else covers
    /// bass instruments up to high leads.
    pub fn for_mode(mode: Mode, config: &AnalysisConfig) -> Self {
        if mode.is_vocal() {
            config.vocal_range
        } else {
            config.full_range
        }
    }

    pub fn contains(&self, freq: f32) -> bool {
        freq >= self.min && freq <= self.max
    }

    /// Converts the bounds to a lag search range in samples.
    ///
    /// The range is clamped to `[2, block_len - 1]`; `None` means no lag can
    /// be searched (block too short or bounds outside the block).
    fn lag_range(&self, sample_rate: u32, block_len: usize) -> Option<(usize, usize)> {
        if block_len < 3 || self.min <= 0.0 || self.max <= 0.0 {
            return None;
        }
        let sr = sample_rate as f32;
        let min_period = ((sr / self.max).round() as usize).max(2);
        let max_period = ((sr / self.min).round() as usize).min(block_len - 1);
        (min_period <= max_period).then_some((min_period, max_period))
    }
}

/// Estimates the fundamental frequency of a block using autocorrelation.
///
/// For every candidate lag τ the unnormalized correlation
/// `Σ signal[i] * signal[i + τ]` is accumulated over even `i`, and the lag
/// with the largest positive correlation wins.
///
/// # Arguments
/// * `signal` - Audio samples normalized to [-1, 1]
/// * `sample_rate` - Sample rate in Hz
/// * `range` - Frequency bounds to search
///
/// # Returns
/// * `sample_rate / best_lag` in Hz
/// * `0.0` - Empty block, no searchable lag, or no positive correlation
pub fn detect_pitch(signal: &[f32], sample_rate: u32, range: FrequencyRange) -> f32 {
    let Some((min_period, max_period)) = range.lag_range(sample_rate, signal.len()) else {
        return 0.0;
    };

    let mut best_period = 0;
    let mut best_correlation = 0.0f64;

    for tau in min_period..=max_period {
        let correlation: f64 = signal[..signal.len() - tau]
            .iter()
            .zip(&signal[tau..])
            .step_by(2)
            .map(|(&a, &b)| a as f64 * b as f64)
            .sum();

        if correlation > best_correlation {
            best_correlation = correlation;
            best_period = tau;
        }
    }

    if best_period == 0 {
        0.0
    } else {
        sample_rate as f32 / best_period as f32
    }
}
