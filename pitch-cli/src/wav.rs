//! WAV decoding for song folders.

use std::path::Path;

use hound::{SampleFormat, WavReader};
use pitch_core::song::{PcmDecoder, SongPcm};
use pitch_core::{Error, Result};

/// Decodes PCM and float WAV files to normalized interleaved samples.
pub struct WavDecoder;

impl PcmDecoder for WavDecoder {
    fn decode(&self, path: &Path) -> Result<SongPcm> {
        let decode_err = |e: hound::Error| Error::Decode {
            path: path.to_path_buf(),
            message: e.to_string(),
        };

        let mut reader = WavReader::open(path).map_err(decode_err)?;
        let spec = reader.spec();

        let samples: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<std::result::Result<_, _>>()
                .map_err(decode_err)?,
            SampleFormat::Int => {
                let scale = (1i64 << spec.bits_per_sample.saturating_sub(1).min(31)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|s| s as f32 / scale))
                    .collect::<std::result::Result<_, _>>()
                    .map_err(decode_err)?
            }
        };

        Ok(SongPcm {
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{WavSpec, WavWriter};

    #[test]
    fn reads_sixteen_bit_stereo() {
        let path = std::env::temp_dir().join(format!("singalong-wav-{}.wav", std::process::id()));
        let spec = WavSpec {
            channels: 2,
            sample_rate: 44_100,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for s in [16_384i16, -16_384, 0, 32_767] {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();

        let pcm = WavDecoder.decode(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(pcm.sample_rate, 44_100);
        assert_eq!(pcm.channels, 2);
        assert_eq!(pcm.channel(0), vec![0.5, 0.0]);
        assert_eq!(pcm.channel(1)[0], -0.5);
    }

    #[test]
    fn missing_file_is_a_decode_error() {
        let err = WavDecoder.decode(Path::new("/nonexistent/song.wav")).unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
    }
}
