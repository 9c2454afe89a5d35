//! Clip encoder interface and the WAV implementation.
//!
//! The recorder feeds captured PCM to an [`Encoder`] on every polling tick and
//! keeps the returned chunks in order; on stop the chunks are concatenated into
//! the clip buffer, which is opaque to everything but the playback device.

use std::io::Cursor;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use tracing::warn;

use crate::error::{RecorderError, Result};

/// Streaming encoder: chunks on data-available, a trailing chunk on stop.
///
/// Container formats whose header depends on the total length may return
/// empty chunks and emit everything from [`Encoder::finish`].
pub trait Encoder: Send {
    /// MIME-like tag stored on the clip.
    fn mime_type(&self) -> String;

    /// Begin a new stream, discarding any previous state.
    fn start(&mut self, sample_rate: u32);

    /// Encode a block of mono samples into a data-available chunk.
    fn encode(&mut self, samples: &[f32]) -> Vec<u8>;

    /// Stop notification; returns any trailing bytes. Empty when nothing was
    /// encoded.
    fn finish(&mut self) -> Vec<u8>;
}

/// Mono 32-bit float WAV, written in memory once the recording stops.
#[derive(Debug, Clone)]
pub struct WavEncoder {
    spec: WavSpec,
    samples: Vec<f32>,
}

impl WavEncoder {
    pub fn new() -> Self {
        let spec = WavSpec { channels: 1, sample_rate: 16000, bits_per_sample: 32, sample_format: SampleFormat::Float };
        Self { spec, samples: Vec::new() }
    }

    fn write_wav(&self) -> std::result::Result<Vec<u8>, hound::Error> {
        let mut buffer = Vec::new();
        {
            let mut writer = WavWriter::new(Cursor::new(&mut buffer), self.spec)?;
            for &sample in &self.samples {
                writer.write_sample(sample)?;
            }
            // Finalize patches the header lengths
            writer.finalize()?;
        }
        Ok(buffer)
    }
}

impl Default for WavEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder for WavEncoder {
    fn mime_type(&self) -> String {
        "audio/wav".to_string()
    }

    fn start(&mut self, sample_rate: u32) {
        self.spec.sample_rate = sample_rate;
        self.samples.clear();
    }

    fn encode(&mut self, samples: &[f32]) -> Vec<u8> {
        self.samples.extend_from_slice(samples);
        Vec::new()
    }

    fn finish(&mut self) -> Vec<u8> {
        if self.samples.is_empty() {
            return Vec::new();
        }

        let encoded = self.write_wav();
        self.samples.clear();
        match encoded {
            Ok(data) => data,
            Err(e) => {
                warn!("Failed to write WAV: {}", e);
                Vec::new()
            }
        }
    }
}

/// Decode a WAV buffer to mono f32 samples and its sample rate.
///
/// Multi-channel files keep only the first channel.
///
/// # Errors
/// `EncodingFailed` if the buffer is not a readable WAV file.
pub fn decode_wav(data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let reader = WavReader::new(data).map_err(|e| {
        warn!("Failed to open WAV data: {}", e);
        RecorderError::EncodingFailed
    })?;

    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let samples: std::result::Result<Vec<f32>, _> = match spec.sample_format {
        SampleFormat::Float => reader.into_samples::<f32>().collect(),
        SampleFormat::Int => {
            let max_value = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader.into_samples::<i32>().map(|s| s.map(|v| v as f32 / max_value)).collect()
        }
    };
    let samples = samples.map_err(|e| {
        warn!("Failed to read WAV samples: {}", e);
        RecorderError::EncodingFailed
    })?;

    Ok((samples.into_iter().step_by(channels).collect(), spec.sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_type() {
        assert_eq!(WavEncoder::new().mime_type(), "audio/wav");
    }

    #[test]
    fn test_chunks_are_held_until_finish() {
        let mut encoder = WavEncoder::new();
        encoder.start(48000);
        assert!(encoder.encode(&[0.5; 480]).is_empty());
        assert!(encoder.encode(&[-0.25; 480]).is_empty());

        let data = encoder.finish();
        assert_eq!(&data[..4], b"RIFF");
        let (samples, rate) = decode_wav(&data).unwrap();
        assert_eq!(rate, 48000);
        assert_eq!(samples.len(), 960);
        assert_eq!(samples[0], 0.5);
        assert_eq!(samples[959], -0.25);
    }

    #[test]
    fn test_finish_without_samples_is_empty() {
        let mut encoder = WavEncoder::new();
        encoder.start(16000);
        assert!(encoder.finish().is_empty());
    }

    #[test]
    fn test_restart_discards_previous_take() {
        let mut encoder = WavEncoder::new();
        encoder.start(16000);
        encoder.encode(&[0.1; 100]);
        encoder.start(16000);
        encoder.encode(&[0.2; 10]);

        let (samples, _) = decode_wav(&encoder.finish()).unwrap();
        assert_eq!(samples.len(), 10);
    }

    #[test]
    fn test_decode_int_wav_scales_to_unit_range() {
        let spec = WavSpec { channels: 2, sample_rate: 8000, bits_per_sample: 16, sample_format: SampleFormat::Int };
        let mut buffer = Vec::new();
        {
            let mut writer = WavWriter::new(Cursor::new(&mut buffer), spec).unwrap();
            for value in [16384i16, 0, -16384, 0] {
                writer.write_sample(value).unwrap();
            }
            writer.finalize().unwrap();
        }

        let (samples, rate) = decode_wav(&buffer).unwrap();
        assert_eq!(rate, 8000);
        assert_eq!(samples, vec![0.5, -0.5]);
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert_eq!(decode_wav(&[0, 1, 2, 3]), Err(RecorderError::EncodingFailed));
    }
}
