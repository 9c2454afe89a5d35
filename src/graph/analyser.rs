//! Frequency analysis node feeding the waveform.
//!
//! Keeps the most recent `fft_size` samples of whatever source is connected and
//! turns them into byte-scaled magnitudes, the same shape a browser analyser
//! node reports: Blackman window, exponential smoothing over time, decibels
//! mapped linearly from `[min_db, max_db]` onto `0..=255`.

use std::f32::consts::PI;
use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

/// Small FFT: the waveform only shows a handful of bars.
pub const DEFAULT_FFT_SIZE: usize = 32;

/// Weight of the previous frame when smoothing magnitudes.
pub const DEFAULT_SMOOTHING: f32 = 0.8;

pub const DEFAULT_MIN_DB: f32 = -100.0;
pub const DEFAULT_MAX_DB: f32 = -30.0;

/// Analysis node with a sliding time-domain window.
pub struct Analyser {
    fft_size: usize,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,     // Blackman coefficients
    history: Vec<f32>,    // Circular buffer of the latest samples
    write_pos: usize,     // Next write index in `history`
    smoothed: Vec<f32>,   // Smoothed linear magnitudes, one per bin
    buffer: Vec<Complex<f32>>,
    smoothing: f32,
    min_db: f32,
    max_db: f32,
}

impl Analyser {
    /// Create an analyser. `fft_size` is rounded up to a power of two (minimum 4).
    pub fn new(fft_size: usize) -> Self {
        let fft_size = fft_size.max(4).next_power_of_two();
        let fft = FftPlanner::<f32>::new().plan_fft_forward(fft_size);

        Self {
            fft_size,
            fft,
            window: blackman_window(fft_size),
            history: vec![0.0; fft_size],
            write_pos: 0,
            smoothed: vec![0.0; fft_size / 2],
            buffer: vec![Complex::new(0.0, 0.0); fft_size],
            smoothing: DEFAULT_SMOOTHING,
            min_db: DEFAULT_MIN_DB,
            max_db: DEFAULT_MAX_DB,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Number of magnitudes produced per frame (half the FFT size).
    pub fn frequency_bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Append samples to the sliding window.
    pub fn push_samples(&mut self, samples: &[f32]) {
        // Only the tail can survive in the window.
        let skip = samples.len().saturating_sub(self.fft_size);
        for &sample in &samples[skip..] {
            self.history[self.write_pos] = sample;
            self.write_pos = (self.write_pos + 1) % self.fft_size;
        }
    }

    /// Compute the current frame into `out` (length [`Analyser::frequency_bin_count`]).
    pub fn byte_frequency_data(&mut self, out: &mut [u8]) {
        for (i, slot) in self.buffer.iter_mut().enumerate() {
            // Oldest sample first.
            let sample = self.history[(self.write_pos + i) % self.fft_size];
            *slot = Complex::new(sample * self.window[i], 0.0);
        }

        self.fft.process(&mut self.buffer);

        let scale = 1.0 / self.fft_size as f32;
        let range = self.max_db - self.min_db;
        for (bin, value) in out.iter_mut().take(self.smoothed.len()).enumerate() {
            let magnitude = self.buffer[bin].norm() * scale;
            let smoothed = self.smoothing * self.smoothed[bin] + (1.0 - self.smoothing) * magnitude;
            self.smoothed[bin] = smoothed;

            let db = if smoothed > 0.0 { 20.0 * smoothed.log10() } else { f32::NEG_INFINITY };
            let scaled = 255.0 / range * (db - self.min_db);
            *value = scaled.clamp(0.0, 255.0) as u8;
        }
    }

    /// Forget previous input and smoothing state.
    pub fn reset(&mut self) {
        self.history.fill(0.0);
        self.smoothed.fill(0.0);
        self.write_pos = 0;
    }
}

fn blackman_window(size: usize) -> Vec<f32> {
    const ALPHA: f32 = 0.16;
    let a0 = (1.0 - ALPHA) / 2.0;
    let a1 = 0.5;
    let a2 = ALPHA / 2.0;

    (0..size)
        .map(|n| {
            let x = n as f32 / size as f32;
            a0 - a1 * (2.0 * PI * x).cos() + a2 * (4.0 * PI * x).cos()
        })
        .collect()
}
