//! # HUD Line
//!
//! Renders one status line per frame: playback time, the song note, the
//! sung note and a text cent meter.
//!
//! ## Features
//! - Cent meter with a needle that marks the accuracy zone
//! - Match indicator
//! - Status messages replace the pitch readout while not playing

use pitch_core::session::{Phase, RenderFrame};
use pitch_core::tuning::{calculate_cents_deviation, note_for_frequency};

/// The meter shows deviations from -50 to +50 cents.
const METER_RANGE: f32 = 50.0;

/// Cells on each side of the meter's center mark.
const METER_HALF_WIDTH: usize = 10;

/// Draws a cent meter such as `[-----|---#------]`.
///
/// The needle is `#` within 5 cents, `+` within 20 and `x` beyond. Without
/// a reading the meter is empty.
pub fn cent_meter(cents: Option<f32>) -> String {
    let width = METER_HALF_WIDTH * 2 + 1;
    let mut cells = vec!['-'; width];
    cells[METER_HALF_WIDTH] = '|';

    if let Some(c) = cents.filter(|c| c.is_finite()) {
        let clamped = c.clamp(-METER_RANGE, METER_RANGE);
        let pos = ((clamped + METER_RANGE) / (2.0 * METER_RANGE) * (width - 1) as f32).round() as usize;
        cells[pos.min(width - 1)] = if c.abs() < 5.0 {
            '#'
        } else if c.abs() < 20.0 {
            '+'
        } else {
            'x'
        };
    }

    format!("[{}]", cells.into_iter().collect::<String>())
}

fn format_time(ms: u64) -> String {
    format!("{:02}:{:02}.{}", ms / 60_000, (ms / 1000) % 60, (ms / 100) % 10)
}

fn describe(freq: f32) -> String {
    match note_for_frequency(freq) {
        Some(note) => format!("{:<3} {freq:6.1} Hz", note.to_string()),
        None => format!("{:<3} {:>6} Hz", "-", "-"),
    }
}

/// Formats the HUD line for one frame.
pub fn hud_line(frame: &RenderFrame) -> String {
    if frame.phase != Phase::Playing || !frame.message.is_empty() {
        return format!("[{:?}] {}", frame.phase, frame.message);
    }

    // Cents against the song note when there is one, else against the
    // nearest note to the voice.
    let target = frame
        .song_note()
        .or_else(|| frame.user_note())
        .map(|n| n.frequency());
    let cents = match target {
        Some(t) if frame.live_pitch > 0.0 => Some(calculate_cents_deviation(frame.live_pitch, t)),
        _ => None,
    };

    let verdict = if frame.matched { "MATCH" } else { "" };

    format!(
        "{}  song {}  you {}  {} {verdict}",
        format_time(frame.position_ms.unwrap_or(0)),
        describe(frame.song_pitch),
        describe(frame.live_pitch),
        cent_meter(cents),
    )
}
