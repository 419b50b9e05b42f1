//! Song loading: pick the file for the mode, separate it if needed, decode
//! it and analyze its pitch.
//!
//! Decoding and separation are collaborator seams ([`PcmDecoder`],
//! [`Separator`]); the binary plugs in a WAV decoder and the Python
//! separation script.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::Mode;
use crate::config::{AnalysisConfig, SeparationConfig};
use crate::error::{Error, Result};
use crate::track::{PitchTrack, TrackAnalyzer};

/// The files of one song folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SongPaths {
    pub dir: PathBuf,
    /// The original mix.
    pub song: PathBuf,
    pub vocals: PathBuf,
    pub accompaniment: PathBuf,
}

impl SongPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            song: dir.join("song.wav"),
            vocals: dir.join("vocals.wav"),
            accompaniment: dir.join("accompaniment.wav"),
            dir,
        }
    }

    /// The file played and analyzed in `mode`.
    pub fn for_mode(&self, mode: Mode) -> &Path {
        match mode {
            Mode::Singing => &self.vocals,
            Mode::Instrumental => &self.accompaniment,
            Mode::FullMix | Mode::NoAudio => &self.song,
        }
    }

    /// Whether `mode` needs a separated stem that does not exist yet.
    pub fn needs_separation(&self, mode: Mode) -> bool {
        matches!(mode, Mode::Singing | Mode::Instrumental) && !self.for_mode(mode).exists()
    }
}

/// Splits a song into `vocals.wav` and `accompaniment.wav` inside `out_dir`.
pub trait Separator {
    fn separate(&self, song: &Path, out_dir: &Path) -> Result<()>;
}

/// Runs the external separation script.
#[derive(Debug, Clone)]
pub struct CommandSeparator {
    config: SeparationConfig,
    working_dir: PathBuf,
}

impl CommandSeparator {
    pub fn new(config: SeparationConfig) -> Self {
        Self {
            config,
            working_dir: std::env::current_dir().unwrap_or_default(),
        }
    }

    /// Resolves the script, the venv file and relative venv paths against `dir`.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// The interpreter to run the script with.
    ///
    /// A non-empty venv file naming a virtualenv with `bin/python` wins;
    /// otherwise the configured interpreter is used.
    pub fn python(&self) -> PathBuf {
        let venv_file = self.working_dir.join(&self.config.venv_file);
        if let Ok(content) = fs::read_to_string(&venv_file) {
            let venv = content.trim();
            if !venv.is_empty() {
                let python = self.working_dir.join(venv).join("bin").join("python");
                if python.exists() {
                    log::info!("Using venv Python: {}", python.display());
                    return python;
                }
                log::warn!(
                    "{} names {venv}, which has no bin/python; falling back to {}",
                    venv_file.display(),
                    self.config.python
                );
            }
        }
        PathBuf::from(&self.config.python)
    }
}

impl Separator for CommandSeparator {
    fn separate(&self, song: &Path, out_dir: &Path) -> Result<()> {
        let python = self.python();
        let script = self.working_dir.join(&self.config.script);
        log::info!("Running audio separation on {}", song.display());

        let output = Command::new(&python)
            .arg(&script)
            .arg(song)
            .arg(out_dir)
            .current_dir(&self.working_dir)
            .output()
            .map_err(|source| Error::Io {
                path: python.clone(),
                source,
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        log::debug!("Separator output: {combined}");

        if !output.status.success() {
            return Err(Error::Separation {
                status: output.status.to_string(),
                output: combined,
            });
        }
        Ok(())
    }
}

/// Decoded PCM, interleaved and normalized to [-1, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct SongPcm {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl SongPcm {
    /// De-interleaves one channel.
    pub fn channel(&self, index: usize) -> Vec<f32> {
        let channels = usize::from(self.channels.max(1));
        self.samples
            .iter()
            .skip(index)
            .step_by(channels)
            .copied()
            .collect()
    }

    pub fn duration_secs(&self) -> f64 {
        let frames = self.samples.len() / usize::from(self.channels.max(1));
        frames as f64 / f64::from(self.sample_rate.max(1))
    }
}

pub trait PcmDecoder {
    fn decode(&self, path: &Path) -> Result<SongPcm>;
}

/// An analyzed song, ready to install into a session.
#[derive(Debug, Clone)]
pub struct LoadedSong {
    pub track: PitchTrack,
    pub sample_rate: u32,
    /// The file that was decoded.
    pub source: PathBuf,
}

/// Loads and analyzes the song in `paths` for `mode`.
///
/// Runs separation first when the mode's stem is missing, reporting each
/// stage through `status`. Any failure is returned as is; nothing partial
/// is produced.
pub fn load_song(
    paths: &SongPaths,
    mode: Mode,
    decoder: &dyn PcmDecoder,
    separator: &dyn Separator,
    config: &AnalysisConfig,
    status: &dyn Fn(&str),
) -> Result<LoadedSong> {
    if paths.needs_separation(mode) {
        status("Separating audio (may take a minute)...");
        separator.separate(&paths.song, &paths.dir)?;
    }

    status("Loading song...");
    let source = paths.for_mode(mode);
    log::info!("Using {} for {mode} mode", source.display());
    let pcm = decoder.decode(source)?;
    if pcm.sample_rate == 0 {
        return Err(Error::Decode {
            path: source.to_path_buf(),
            message: "sample rate is zero".into(),
        });
    }
    log::debug!(
        "Decoded {:.1} s at {} Hz, {} channel(s)",
        pcm.duration_secs(),
        pcm.sample_rate,
        pcm.channels
    );

    let track = TrackAnalyzer::new(config.clone()).analyze(&pcm.channel(0), pcm.sample_rate, mode);

    Ok(LoadedSong {
        track,
        sample_rate: pcm.sample_rate,
        source: source.to_path_buf(),
    })
}
