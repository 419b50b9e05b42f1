//! Error type shared by every fallible operation in the crate.
//!
//! Detection and gating never fail (no pitch is the value `0.0`), so the
//! variants here only cover devices, files and external tools.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The audio backend refused a request (no device, unsupported config, ...).
    #[error("audio device: {0}")]
    Device(String),

    /// Opening the input device kept failing after all retries.
    #[error("failed to start microphone after {attempts} attempts: {last}")]
    DeviceOpen { attempts: u32, last: String },

    /// The input stream was closed underneath the reader.
    #[error("input stream closed")]
    StreamClosed,

    /// No full block arrived within the read timeout.
    #[error("no audio received within {0:?}")]
    ReadTimeout(Duration),

    #[error("capture thread exited before reporting the device state")]
    CaptureThread,

    #[error("failed to spawn {name} thread: {source}")]
    Thread {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode {}: {message}", path.display())]
    Decode { path: PathBuf, message: String },

    #[error("separation failed: {status}\nOutput: {output}")]
    Separation { status: String, output: String },

    #[error("invalid config {}: {source}", path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("calibration did not finish within {0:?}")]
    CalibrationTimeout(Duration),
}

pub type Result<T> = std::result::Result<T, Error>;
