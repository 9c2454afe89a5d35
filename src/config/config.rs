//! Application configuration and CLI argument parsing.

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::audio::StreamConstraints;

/// Longest clip the recorder will produce, in seconds.
pub const MAX_CLIP_SECONDS: f64 = 30.0;

/// Runtime settings of the recorder core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderSettings {
    pub sample_rate: u32,             // Clip PCM rate
    pub max_duration_secs: f64,       // Recording auto-stops here
    pub poll_interval_ms: u64,        // Elapsed/position polling cadence
    pub waveform_interval_ms: u64,    // Waveform refresh cadence
    pub waveform_bars: usize,         // Bars per waveform frame
    pub input_device: Option<String>, // Input device name substring
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self { sample_rate: 16000, max_duration_secs: MAX_CLIP_SECONDS, poll_interval_ms: 100, waveform_interval_ms: 50, waveform_bars: 8, input_device: None }
    }
}

impl RecorderSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn waveform_interval(&self) -> Duration {
        Duration::from_millis(self.waveform_interval_ms)
    }

    /// Capture constraints requested from the microphone.
    pub fn stream_constraints(&self) -> StreamConstraints {
        StreamConstraints { sample_rate: self.sample_rate, device_name: self.input_device.clone() }
    }
}

/// Voice memo recorder configuration.
#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(name = "voice-memo")]
#[command(author, version, about = "Record and play back short voice memos", long_about = None)]
pub struct AppConfig {
    /// Clip sample rate in Hz (capture is resampled when the device differs)
    #[arg(long, default_value = "16000")]
    pub sample_rate: u32,

    /// Maximum recording length in seconds
    #[arg(long, default_value = "30", value_parser = parse_max_duration)]
    pub max_duration: f64,

    /// Elapsed-time and playback-position polling interval in milliseconds
    #[arg(long, default_value = "100")]
    pub poll_interval_ms: u64,

    /// Waveform refresh interval in milliseconds
    #[arg(long, default_value = "50")]
    pub waveform_interval_ms: u64,

    /// Number of bars in the waveform display
    #[arg(long, default_value = "8")]
    pub waveform_bars: usize,

    /// Screen tick resolution in milliseconds
    #[arg(long, default_value = "10")]
    pub tick_ms: u64,

    /// Input device name (substring match, default device if not set)
    #[arg(long, env = "VOICE_MEMO_INPUT_DEVICE")]
    pub input_device: Option<String>,

    /// Output device name (substring match, default device if not set)
    #[arg(long, env = "VOICE_MEMO_OUTPUT_DEVICE")]
    pub output_device: Option<String>,

    /// Print snapshots as JSON lines instead of a status line
    #[arg(long)]
    pub json: bool,

    /// Enable verbose logging
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

impl AppConfig {
    /// Parse configuration from command line arguments.
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Settings handed to the recorder core.
    pub fn recorder_settings(&self) -> RecorderSettings {
        RecorderSettings {
            sample_rate: self.sample_rate,
            max_duration_secs: self.max_duration,
            poll_interval_ms: self.poll_interval_ms,
            waveform_interval_ms: self.waveform_interval_ms,
            waveform_bars: self.waveform_bars,
            input_device: self.input_device.clone(),
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if !(8000..=96000).contains(&self.sample_rate) {
            anyhow::bail!("Sample rate must be between 8000 and 96000 Hz, got {}", self.sample_rate);
        }

        if self.waveform_bars == 0 {
            anyhow::bail!("Waveform needs at least one bar");
        }

        if self.tick_ms == 0 || self.poll_interval_ms == 0 || self.waveform_interval_ms == 0 {
            anyhow::bail!("Tick, poll and waveform intervals must be positive");
        }

        // Timers are only checked on ticks, so a coarser tick would stretch them.
        if self.tick_ms > self.poll_interval_ms.min(self.waveform_interval_ms) {
            anyhow::bail!("Tick interval ({}ms) must not exceed the poll and waveform intervals", self.tick_ms);
        }

        Ok(())
    }

    /// Log the current configuration.
    pub fn log_config(&self) {
        info!("Configuration:");
        info!("  Sample rate: {} Hz", self.sample_rate);
        info!("  Max duration: {}s", self.max_duration);
        info!("  Poll interval: {}ms", self.poll_interval_ms);
        info!("  Waveform: {} bars every {}ms", self.waveform_bars, self.waveform_interval_ms);
        info!("  Tick: {}ms", self.tick_ms);
        if let Some(ref device) = self.input_device {
            info!("  Input device: {}", device);
        }
        if let Some(ref device) = self.output_device {
            info!("  Output device: {}", device);
        }
    }
}

/// Parse and validate the maximum duration (0 < d <= 30).
fn parse_max_duration(s: &str) -> Result<f64, String> {
    let value: f64 = s.parse().map_err(|_| format!("'{}' is not a valid number", s))?;
    if value > 0.0 && value <= MAX_CLIP_SECONDS {
        Ok(value)
    } else {
        Err(format!("max duration must be in (0, {}], got {}", MAX_CLIP_SECONDS, value))
    }
}
