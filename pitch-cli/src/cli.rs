use clap::{Parser, Subcommand};
use pitch_core::Mode;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "singalong", about = "Sing along to a song and see how close your pitch is")]
pub struct Cli {
    /// JSON config file (defaults to ./singalong.json when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Extract the pitch track of a song folder or a single WAV file
    Analyze {
        /// Song folder (song.wav, vocals.wav, accompaniment.wav) or WAV file
        path: PathBuf,

        /// singing, instrumental, full-mix or no-audio
        #[arg(short, long, default_value = "full-mix")]
        mode: Mode,

        /// Write the track as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run a live session against the microphone
    Live {
        /// Song folder; omit to practice without a song
        song_dir: Option<PathBuf>,

        /// singing, instrumental, full-mix or no-audio
        #[arg(short, long, default_value = "singing")]
        mode: Mode,

        /// Session length in seconds
        #[arg(short, long, default_value_t = 60)]
        seconds: u64,
    },

    /// List audio input devices
    Devices,
}
