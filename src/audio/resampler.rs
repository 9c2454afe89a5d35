//! Sample-rate conversion with rubato's FFT resampler.
//!
//! Capture uses [`StreamResampler`] inside the input callback so the clip is
//! always at the configured rate; playback converts a whole clip up front with
//! [`resample`] to match the output device.

use anyhow::{Context, Result};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{Fft, FixedSync, Resampler};
use tracing::warn;

/// Input frames consumed per resampler call.
const CHUNK_SIZE: usize = 1024;

/// Sub-chunks for FFT processing (higher = better quality, more CPU).
const SUB_CHUNKS: usize = 2;

fn build(from_rate: u32, to_rate: u32) -> Result<Fft<f32>> {
    Fft::<f32>::new(from_rate as usize, to_rate as usize, CHUNK_SIZE, SUB_CHUNKS, 1, FixedSync::Input).context("Failed to create resampler")
}

/// Streaming mono resampler fed with arbitrarily sized callback buffers.
pub struct StreamResampler {
    resampler: Fft<f32>,
    pending: Vec<f32>, // Input accumulated until a full chunk is available
    output: Vec<f32>,
    output_frames_max: usize,
    failures: u64,     // Chunks dropped on adapter or resampler errors
}

impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self> {
        let resampler = build(from_rate, to_rate)?;
        let output_frames_max = resampler.output_frames_max();
        Ok(Self { resampler, pending: Vec::with_capacity(CHUNK_SIZE * 2), output: vec![0.0; output_frames_max], output_frames_max, failures: 0 })
    }

    /// Accept samples; returns converted audio for every complete chunk.
    ///
    /// Runs on the audio thread: a failing chunk is dropped and counted.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        self.pending.extend_from_slice(samples);

        let mut converted = Vec::new();
        while self.pending.len() >= CHUNK_SIZE {
            let chunk: Vec<f32> = self.pending.drain(..CHUNK_SIZE).collect();
            let input = match InterleavedSlice::new(&chunk, 1, CHUNK_SIZE) {
                Ok(input) => input,
                Err(e) => {
                    self.record_failure("input adapter", &e);
                    continue;
                }
            };
            let mut output = match InterleavedSlice::new_mut(&mut self.output, 1, self.output_frames_max) {
                Ok(output) => output,
                Err(e) => {
                    self.record_failure("output adapter", &e);
                    continue;
                }
            };
            match self.resampler.process_into_buffer(&input, &mut output, None) {
                Ok((_, written)) => converted.extend_from_slice(&self.output[..written]),
                Err(e) => self.record_failure("resampling", &e),
            }
        }
        converted
    }

    /// Chunks dropped since creation.
    pub fn failures(&self) -> u64 {
        self.failures
    }

    fn record_failure(&mut self, stage: &str, err: &dyn std::fmt::Display) {
        self.failures += 1;
        if self.failures % 100 == 1 {
            warn!("Resampler {} failed ({} chunks dropped): {}", stage, self.failures, err);
        }
    }
}

/// Convert a whole buffer from `from_rate` to `to_rate`.
///
/// The last chunk is zero-padded and the result trimmed to the expected length.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler = build(from_rate, to_rate)?;
    let output_frames_max = resampler.output_frames_max();
    let mut buffer = vec![0.0f32; output_frames_max];

    let expected_len = (samples.len() as f64 * to_rate as f64 / from_rate as f64) as usize;
    let mut output = Vec::with_capacity(expected_len + CHUNK_SIZE);

    for chunk in samples.chunks(CHUNK_SIZE) {
        let mut padded = chunk.to_vec();
        padded.resize(CHUNK_SIZE, 0.0);

        let input = InterleavedSlice::new(&padded, 1, CHUNK_SIZE).context("Failed to create input adapter")?;
        let mut out = InterleavedSlice::new_mut(&mut buffer, 1, output_frames_max).context("Failed to create output adapter")?;
        let (_, written) = resampler.process_into_buffer(&input, &mut out, None).map_err(|e| anyhow::anyhow!("Resampling error: {}", e))?;
        output.extend_from_slice(&buffer[..written]);
    }

    output.resize(expected_len, 0.0);
    Ok(output)
}
