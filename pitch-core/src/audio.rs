//! # Audio Capture Module
//!
//! This module handles live microphone input using CPAL (Cross-Platform Audio Library).
//! The analysis side pulls fixed-size blocks from an [`InputSource`]; the CPAL
//! implementation bridges the device callback to that blocking pull model
//! through a bounded channel.
//!
//! ## Features
//! - Default input device selection with a 32-bit float config near 44.1 kHz
//! - Multi-channel devices are reduced to their first channel
//! - Blocking block reads with a timeout, so a dead device cannot hang the reader
//! - Device open retries with exponential backoff

use std::thread;
use std::time::Duration;

use cpal::SupportedStreamConfigRange;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::error::{Error, Result};

/// Blocks buffered between the device callback and the reader.
///
/// When the reader falls this far behind, new blocks are dropped.
const CHANNEL_BLOCKS: usize = 16;

/// A live source of fixed-size sample blocks.
pub trait InputSource {
    fn sample_rate(&self) -> u32;

    /// Blocks until `block` has been filled with the next samples.
    fn read_block(&mut self, block: &mut [f32]) -> Result<()>;
}

impl<S: InputSource + ?Sized> InputSource for Box<S> {
    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }

    fn read_block(&mut self, block: &mut [f32]) -> Result<()> {
        (**self).read_block(block)
    }
}

/// Microphone input from the default CPAL device.
///
/// The stream is paused and released when this value is dropped.
pub struct CpalInput {
    stream: cpal::Stream,
    receiver: Receiver<Vec<f32>>,
    sample_rate: u32,
    read_timeout: Duration,
}

impl CpalInput {
    /// Opens the default input device and starts capturing.
    ///
    /// # Arguments
    /// * `block_size` - Samples per block handed to the reader
    /// * `target_rate` - Preferred sample rate in Hz
    /// * `read_timeout` - Longest `read_block` waits before reporting a stalled device
    pub fn open(block_size: usize, target_rate: u32, read_timeout: Duration) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Device("No input device available".into()))?;

        let device_name = device.name().unwrap_or_else(|_| "<unnamed>".into());
        log::info!("Using audio input device: {device_name}");

        let configs = device
            .supported_input_configs()
            .map_err(|e| Error::Device(e.to_string()))?
            .collect::<Vec<_>>();
        let supported = find_supported_config(configs, target_rate)
            .ok_or_else(|| Error::Device("No suitable f32 input format found".into()))?;

        let rate = target_rate.clamp(supported.min_sample_rate().0, supported.max_sample_rate().0);
        let config: cpal::StreamConfig = supported.with_sample_rate(cpal::SampleRate(rate)).into();
        let channels = usize::from(config.channels.max(1));
        log::info!("Selected sample rate: {rate} Hz, {channels} channel(s)");

        let (sender, receiver) = crossbeam_channel::bounded::<Vec<f32>>(CHANNEL_BLOCKS);
        let block_size = block_size.max(1);

        // Accumulates first-channel samples until a whole block is ready.
        let mut pending = Vec::with_capacity(block_size * 2);

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    pending.extend(data.iter().step_by(channels));
                    while pending.len() >= block_size {
                        let block = pending[..block_size].to_vec();
                        // A full channel means the reader is behind; drop the block.
                        let _ = sender.try_send(block);
                        pending.drain(..block_size);
                    }
                },
                |err| log::error!("An error occurred on the audio stream: {err}"),
                None,
            )
            .map_err(|e| Error::Device(e.to_string()))?;

        stream.play().map_err(|e| Error::Device(e.to_string()))?;

        Ok(Self {
            stream,
            receiver,
            sample_rate: rate,
            read_timeout,
        })
    }
}

impl InputSource for CpalInput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read_block(&mut self, block: &mut [f32]) -> Result<()> {
        let frame = match self.receiver.recv_timeout(self.read_timeout) {
            Ok(frame) => frame,
            Err(RecvTimeoutError::Timeout) => return Err(Error::ReadTimeout(self.read_timeout)),
            Err(RecvTimeoutError::Disconnected) => return Err(Error::StreamClosed),
        };
        let n = frame.len().min(block.len());
        block[..n].copy_from_slice(&frame[..n]);
        block[n..].fill(0.0);
        Ok(())
    }
}

impl Drop for CpalInput {
    fn drop(&mut self) {
        if let Err(e) = self.stream.pause() {
            log::warn!("Error pausing input stream: {e}");
        }
    }
}

/// Finds the best supported configuration for the target sample rate.
///
/// Only 32-bit float formats qualify. Mono beats multi-channel, then the
/// range closest to `target_rate` wins.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
        .min_by_key(|c| {
            let rate = target_rate.clamp(c.min_sample_rate().0, c.max_sample_rate().0);
            (c.channels() != 1, rate.abs_diff(target_rate), c.channels())
        })
}

/// Names of the input devices on the default host.
pub fn list_input_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| Error::Device(e.to_string()))?;
    Ok(devices
        .map(|d| d.name().unwrap_or_else(|_| "<unnamed>".into()))
        .collect())
}

/// Calls `open` until it succeeds, at most `attempts` times.
///
/// Before retry `n` (1-based) the thread sleeps `base_backoff * 2^n`. The
/// terminal error carries the attempt count and the last failure.
pub fn open_with_retry<S, F>(mut open: F, attempts: u32, base_backoff: Duration) -> Result<S>
where
    F: FnMut() -> Result<S>,
{
    let mut last = None;
    for attempt in 0..attempts {
        if attempt > 0 {
            thread::sleep(base_backoff * (1u32 << attempt.min(16)));
        }
        match open() {
            Ok(source) => return Ok(source),
            Err(e) => {
                log::warn!("Opening input device failed (attempt {}/{attempts}): {e}", attempt + 1);
                last = Some(e);
            }
        }
    }
    Err(Error::DeviceOpen {
        attempts,
        last: last.map_or_else(|| "no attempt was made".into(), |e| e.to_string()),
    })
}
