//! # Musical Tuning Module
//!
//! Maps frequencies onto the equal-tempered MIDI scale (A4 = MIDI 69 =
//! 440 Hz) so that song and voice pitches can be named and compared.
//!
//! ## Features
//! - Frequency <-> MIDI number conversions
//! - Note name and octave for any positive frequency
//! - Cent deviation calculations
//! - Semitone-tolerance matching of a sung pitch against the song

use std::fmt;

use once_cell::sync::Lazy;

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// The full MIDI range, C-1 (0) to G9 (127), computed once on first use.
static NOTES: Lazy<Vec<NoteName>> = Lazy::new(|| (0..128).map(NoteName::from_midi).collect());

/// Pitches at or below this are treated as "nothing to compare".
const MIN_COMPARABLE_HZ: f32 = 10.0;

/// A named note in scientific pitch notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteName {
    /// Nearest integer MIDI number.
    pub midi: i32,
    /// Pitch class, e.g. "C#".
    pub name: &'static str,
    pub octave: i32,
}

impl NoteName {
    pub fn from_midi(midi: i32) -> Self {
        Self {
            midi,
            name: NOTE_NAMES[midi.rem_euclid(12) as usize],
            octave: midi.div_euclid(12) - 1,
        }
    }

    /// Equal-tempered frequency of this note.
    pub fn frequency(&self) -> f32 {
        midi_to_freq(self.midi as f32)
    }
}

impl fmt::Display for NoteName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.octave)
    }
}

/// Continuous MIDI number of a frequency: `69 + 12 * log2(freq / 440)`.
pub fn freq_to_midi(freq: f32) -> f32 {
    69.0 + 12.0 * (freq / 440.0).log2()
}

pub fn midi_to_freq(midi: f32) -> f32 {
    440.0 * 2.0_f32.powf((midi - 69.0) / 12.0)
}

/// Names the note nearest to `freq`.
///
/// # Returns
/// * `Some(note)` - For any positive frequency
/// * `None` - Silence (`freq <= 0`)
pub fn note_for_frequency(freq: f32) -> Option<NoteName> {
    if freq <= 0.0 || !freq.is_finite() {
        return None;
    }
    let midi = freq_to_midi(freq).round() as i32;
    let note = usize::try_from(midi)
        .ok()
        .and_then(|i| NOTES.get(i).copied())
        .unwrap_or_else(|| NoteName::from_midi(midi));
    Some(note)
}

/// Looks a note up by its display name, e.g. `"C#4"`.
pub fn note_by_name(name: &str) -> Option<NoteName> {
    NOTES.iter().find(|n| n.to_string() == name).copied()
}

/// Calculates the deviation from a target frequency in cents.
///
/// 100 cents = 1 semitone; positive values are sharp, negative flat.
pub fn calculate_cents_deviation(freq: f32, target_freq: f32) -> f32 {
    1200.0 * (freq / target_freq).log2()
}

/// Whether a sung pitch matches the song pitch within `tolerance` semitones.
///
/// Both pitches have to be audible (above 10 Hz) to count.
pub fn is_pitch_match(user_freq: f32, song_freq: f32, tolerance: f32) -> bool {
    if user_freq <= MIN_COMPARABLE_HZ || song_freq <= MIN_COMPARABLE_HZ {
        return false;
    }
    (freq_to_midi(user_freq) - freq_to_midi(song_freq)).abs() < tolerance
}
