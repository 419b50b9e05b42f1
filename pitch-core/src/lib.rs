// pitch-core/src/lib.rs

//! The analysis engine for singalong.
//! This crate extracts pitch contours from a song buffer and from a live
//! microphone, gates silence, smooths the live readings and keeps the
//! bounded history a renderer draws from. It is completely headless
//! and contains no playback or drawing code.

pub mod audio;
pub mod config;
pub mod energy;
pub mod error;
pub mod history;
pub mod live;
pub mod pitch;
pub mod session;
pub mod smoother;
pub mod song;
pub mod track;
pub mod tuning;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use config::Config;
pub use error::{Error, Result};

/// Which audio a session plays and analyzes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    /// Separated vocals only; the narrow vocal analysis settings apply.
    Singing,
    /// Separated accompaniment.
    Instrumental,
    /// The original mix.
    FullMix,
    /// Practice without a song: only the live pitch is shown.
    NoAudio,
}

impl Mode {
    pub const ALL: [Mode; 4] = [Mode::Singing, Mode::Instrumental, Mode::FullMix, Mode::NoAudio];

    /// Vocal-only material gets narrower bounds and a higher energy floor.
    pub fn is_vocal(self) -> bool {
        self == Mode::Singing
    }

    /// Whether short dropouts in the song track are interpolated.
    pub fn fills_gaps(self) -> bool {
        matches!(self, Mode::Instrumental | Mode::FullMix)
    }

    pub fn plays_audio(self) -> bool {
        self != Mode::NoAudio
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Singing => "singing",
            Mode::Instrumental => "instrumental",
            Mode::FullMix => "full-mix",
            Mode::NoAudio => "no-audio",
        })
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "singing" | "vocal" | "vocals" => Ok(Mode::Singing),
            "instrumental" | "accompaniment" => Ok(Mode::Instrumental),
            "full-mix" | "full" | "mix" => Ok(Mode::FullMix),
            "no-audio" | "practice" => Ok(Mode::NoAudio),
            other => Err(format!(
                "unknown mode '{other}' (expected singing, instrumental, full-mix or no-audio)"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_round_trips_through_display() {
        for mode in Mode::ALL {
            assert_eq!(mode.to_string().parse::<Mode>(), Ok(mode));
        }
        assert_eq!("Vocals".parse::<Mode>(), Ok(Mode::Singing));
        assert!("karaoke".parse::<Mode>().is_err());
    }

    #[test]
    fn only_mixed_material_is_gap_filled() {
        assert!(!Mode::Singing.fills_gaps());
        assert!(Mode::Instrumental.fills_gaps());
        assert!(Mode::FullMix.fills_gaps());
        assert!(!Mode::NoAudio.fills_gaps());
    }
}
