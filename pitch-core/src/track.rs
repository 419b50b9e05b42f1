//! Batch pitch analysis of a whole song.
//!
//! The song is cut into 10 ms blocks, gated against a threshold calibrated
//! from its own opening seconds, and each voiced block goes through the
//! detector. Instrumental material then has its short dropouts bridged.

use std::path::Path;
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::Mode;
use crate::config::AnalysisConfig;
use crate::energy::calibrate_from_pcm;
use crate::error::{Error, Result};
use crate::pitch::detect_pitch;

/// Track cadence: one value every 10 ms.
pub const FRAMES_PER_SECOND: u32 = 100;

/// A song's pitch contour at a fixed 10 ms cadence; `0.0` is silence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PitchTrack {
    frames: Vec<f32>,
}

impl PitchTrack {
    pub fn new(frames: Vec<f32>) -> Self {
        Self { frames }
    }

    pub fn frames(&self) -> &[f32] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<f32> {
        self.frames.get(index).copied()
    }

    /// Song pitch at a playback time, `0.0` outside the track.
    pub fn frequency_at(&self, seconds: f64) -> f32 {
        if seconds.is_nan() || seconds < 0.0 {
            return 0.0;
        }
        let index = (seconds * FRAMES_PER_SECOND as f64).floor() as usize;
        self.get(index).unwrap_or(0.0)
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames.len() as f64 / FRAMES_PER_SECOND as f64
    }

    /// Fraction of frames carrying a pitch.
    pub fn voiced_ratio(&self) -> f32 {
        if self.frames.is_empty() {
            return 0.0;
        }
        self.frames.iter().filter(|&&f| f > 0.0).count() as f32 / self.frames.len() as f32
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string(self)?;
        std::fs::write(path, json).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Samples in one 10 ms analysis block.
pub fn block_len(sample_rate: u32) -> usize {
    (sample_rate as f64 * 0.01).round() as usize
}

/// Produces the pitch track of a mono song buffer.
#[derive(Debug, Clone, Default)]
pub struct TrackAnalyzer {
    config: AnalysisConfig,
}

impl TrackAnalyzer {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    /// Analyzes `samples` (one channel) recorded at `sample_rate`.
    ///
    /// Only whole 10 ms blocks are analyzed; a trailing partial block is
    /// dropped. Runs synchronously, so call it off the render thread.
    pub fn analyze(&self, samples: &[f32], sample_rate: u32, mode: Mode) -> PitchTrack {
        let start = Instant::now();
        let block = block_len(sample_rate);
        if block == 0 {
            return PitchTrack::default();
        }

        log::info!("Starting pitch analysis ({} blocks, {mode})", samples.len() / block);

        let profile = calibrate_from_pcm(samples, block, mode, &self.config);
        log::info!("Calibrated silence threshold: {:.6}", profile.threshold);

        let vocal_filter = mode.is_vocal().then_some(self.config.vocal_filter);

        let mut frames: Vec<f32> = samples
            .par_chunks_exact(block)
            .map(|chunk| {
                if !profile.is_voiced(chunk) {
                    return 0.0;
                }
                let freq = detect_pitch(chunk, sample_rate, profile.range);
                match vocal_filter {
                    Some(band) if !band.contains(freq) => 0.0,
                    _ => freq,
                }
            })
            .collect();

        if mode.fills_gaps() {
            fill_short_gaps(&mut frames, self.config.max_gap_blocks);
        }

        log::info!("Analysis done in {:?}", start.elapsed());
        PitchTrack::new(frames)
    }
}

/// Bridges short runs of silence with a straight line.
///
/// A run of zeros no longer than `max_gap` with a pitch on both sides is
/// replaced by values interpolated between those two pitches. Longer runs
/// and runs touching either end of the track are real silence and stay.
pub fn fill_short_gaps(pitches: &mut [f32], max_gap: usize) {
    let mut i = 0;
    while i < pitches.len() {
        if pitches[i] > 0.0 {
            i += 1;
            continue;
        }

        let gap_start = i;
        while i < pitches.len() && pitches[i] <= 0.0 {
            i += 1;
        }
        let gap_end = i;
        let gap_len = gap_end - gap_start;

        if gap_len > max_gap || gap_start == 0 || gap_end == pitches.len() {
            continue;
        }

        let from = pitches[gap_start - 1];
        let to = pitches[gap_end];
        for j in gap_start..gap_end {
            let t = (j - gap_start + 1) as f32 / (gap_len + 1) as f32;
            pitches[j] = from + t * (to - from);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn fills_bounded_short_gap() {
        let mut p = vec![5.0, 5.0, 0.0, 0.0, 0.0, 8.0, 8.0];
        fill_short_gaps(&mut p, 3);
        assert_relative_eq!(p[2], 5.75);
        assert_relative_eq!(p[3], 6.5);
        assert_relative_eq!(p[4], 7.25);
        assert_eq!(&p[..2], &[5.0, 5.0]);
        assert_eq!(&p[5..], &[8.0, 8.0]);
    }

    #[test]
    fn leaves_long_gap() {
        let original = vec![5.0, 0.0, 0.0, 0.0, 0.0, 0.0, 8.0];
        let mut p = original.clone();
        fill_short_gaps(&mut p, 3);
        assert_eq!(p, original);
    }

    #[test]
    fn leaves_edge_runs() {
        let original = vec![0.0, 0.0, 5.0, 6.0, 0.0];
        let mut p = original.clone();
        fill_short_gaps(&mut p, 20);
        assert_eq!(p, original);
    }

    #[test]
    fn gap_exactly_at_limit_is_filled() {
        let mut p = vec![100.0, 0.0, 0.0, 200.0, 0.0, 0.0, 0.0, 300.0];
        fill_short_gaps(&mut p, 2);
        assert_relative_eq!(p[1], 133.333_33, max_relative = 1e-5);
        assert_relative_eq!(p[2], 166.666_67, max_relative = 1e-5);
        assert_eq!(&p[4..7], &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn block_is_ten_milliseconds() {
        assert_eq!(block_len(44_100), 441);
        assert_eq!(block_len(48_000), 480);
        assert_eq!(block_len(22_050), 221);
    }

    #[test]
    fn track_lookup_by_time() {
        let track = PitchTrack::new(vec![0.0, 110.0, 220.0]);
        assert_eq!(track.frequency_at(0.015), 110.0);
        assert_eq!(track.frequency_at(0.029), 220.0);
        assert_eq!(track.frequency_at(0.035), 0.0);
        assert_eq!(track.frequency_at(-1.0), 0.0);
        assert_eq!(track.frequency_at(f64::NAN), 0.0);
        assert_relative_eq!(track.duration_secs(), 0.03);
        assert_relative_eq!(track.voiced_ratio(), 2.0 / 3.0);
    }

    #[test]
    fn silent_song_is_all_zero() {
        let analyzer = TrackAnalyzer::default();
        let track = analyzer.analyze(&vec![0.0; 44_100], 44_100, Mode::FullMix);
        assert_eq!(track.len(), 100);
        assert!(track.frames().iter().all(|&f| f == 0.0));
    }

    #[test]
    fn partial_trailing_block_is_dropped() {
        let analyzer = TrackAnalyzer::default();
        let track = analyzer.analyze(&vec![0.0; 441 * 3 + 100], 44_100, Mode::Singing);
        assert_eq!(track.len(), 3);
    }

    const SR: u32 = 44_100;
    const BLOCK: usize = 441;

    /// `blocks` whole 10 ms blocks of a sine, phase continuing from `block_offset`.
    fn tone(freq: f32, block_offset: usize, blocks: usize) -> Vec<f32> {
        (block_offset * BLOCK..(block_offset + blocks) * BLOCK)
            .map(|i| 0.8 * (2.0 * std::f32::consts::PI * freq * i as f32 / SR as f32).sin())
            .collect()
    }

    /// 200 ms of silence first, so calibration lands on the energy floor.
    fn with_lead_in(body: &[f32]) -> Vec<f32> {
        let mut song = vec![0.0; 20 * BLOCK];
        song.extend_from_slice(body);
        song
    }

    #[test]
    fn vocal_band_drops_high_pitches_only_in_singing() {
        let song = with_lead_in(&tone(1100.0, 0, 30));
        let analyzer = TrackAnalyzer::default();

        let singing = analyzer.analyze(&song, SR, Mode::Singing);
        assert_eq!(singing.len(), 50);
        assert!(singing.frames().iter().all(|&f| f == 0.0), "{:?}", singing.frames());

        let mixed = analyzer.analyze(&song, SR, Mode::FullMix);
        for &f in &mixed.frames()[20..] {
            assert!((f - 1100.0).abs() < 1100.0 * 0.06, "{f}");
        }
    }

    #[test]
    fn dropouts_are_bridged_only_in_mixed_modes() {
        let mut body = tone(440.0, 0, 40);
        body.extend(vec![0.0; 3 * BLOCK]);
        body.extend(tone(440.0, 43, 40));
        let song = with_lead_in(&body);
        let analyzer = TrackAnalyzer::default();
        let dropout = 60..63;

        let singing = analyzer.analyze(&song, SR, Mode::Singing);
        assert!(singing.frames()[dropout.clone()].iter().all(|&f| f == 0.0));
        assert!(singing.get(59).is_some_and(|f| f > 0.0));
        assert!(singing.get(63).is_some_and(|f| f > 0.0));

        for mode in [Mode::FullMix, Mode::Instrumental] {
            let track = analyzer.analyze(&song, SR, mode);
            for &f in &track.frames()[dropout.clone()] {
                assert!((f - 440.0).abs() < 440.0 * 0.06, "{mode}: {f}");
            }
            // The silent lead-in touches the start and stays silent.
            assert!(track.frames()[..20].iter().all(|&f| f == 0.0));
        }
    }

    #[test]
    fn json_round_trip() {
        let path = std::env::temp_dir().join(format!("singalong-track-{}.json", std::process::id()));
        let track = PitchTrack::new(vec![0.0, 220.5, 221.0]);
        track.save_json(&path).unwrap();
        let loaded = PitchTrack::load_json(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, track);
    }
}
