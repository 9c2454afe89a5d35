//! Waveform bars for the recorder screen.
//!
//! While a controller is active the sampler refreshes a fixed number of bars
//! on its own timer from the shared analyser. Without live analysis data it
//! falls back to a deterministic animated pattern so the display still moves.

use std::time::{Duration, Instant};

use serde::Serialize;

use super::clock::PollTimer;
use super::facade::ActiveMode;
use crate::graph::{AudioGraphManager, SourceKind};

/// Height of every bar when nothing is active.
pub const BASELINE_BAR: u8 = 10;

/// Bar range while recording.
const RECORDING_RANGE: (u8, u8) = (15, 100);

/// Bar range while playing.
const PLAYBACK_RANGE: (u8, u8) = (12, 90);

/// One frame of bar heights (percent of the display height).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct WaveformFrame {
    bars: Vec<u8>,
}

impl WaveformFrame {
    /// The flat frame shown while idle.
    pub fn baseline(bars: usize) -> Self {
        Self { bars: vec![BASELINE_BAR; bars] }
    }

    pub fn bars(&self) -> &[u8] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn is_baseline(&self) -> bool {
        self.bars.iter().all(|&bar| bar == BASELINE_BAR)
    }
}

/// Periodic producer of [`WaveformFrame`]s.
pub struct WaveformSampler {
    bars: usize,
    timer: PollTimer,
    frame: WaveformFrame,
    activated_at: Option<Instant>, // Phase origin of the simulated pattern
}

impl WaveformSampler {
    pub fn new(bars: usize, interval: Duration) -> Self {
        Self { bars, timer: PollTimer::new(interval), frame: WaveformFrame::baseline(bars), activated_at: None }
    }

    /// Start refreshing. Keeps the current schedule if already active.
    pub fn activate(&mut self, now: Instant) {
        if !self.timer.is_armed() {
            self.timer.arm(now);
        }
        self.activated_at.get_or_insert(now);
    }

    /// Stop refreshing and flatten the display.
    pub fn deactivate(&mut self) {
        self.timer.cancel();
        self.activated_at = None;
        self.frame = WaveformFrame::baseline(self.bars);
    }

    pub fn is_active(&self) -> bool {
        self.timer.is_armed()
    }

    pub fn frame(&self) -> &WaveformFrame {
        &self.frame
    }

    /// Refresh the frame when the timer is due.
    ///
    /// # Returns
    /// `true` if the frame was regenerated.
    pub fn tick(&mut self, now: Instant, mode: ActiveMode, graph: &mut AudioGraphManager) -> bool {
        if mode == ActiveMode::None {
            if self.is_active() {
                self.deactivate();
            }
            return false;
        }
        if !self.timer.fire(now) {
            return false;
        }
        self.frame = self.sample(mode, graph, now);
        true
    }

    /// Produce a frame for `mode` from the current analyser output.
    pub fn sample(&self, mode: ActiveMode, graph: &mut AudioGraphManager, now: Instant) -> WaveformFrame {
        let (range, source) = match mode {
            ActiveMode::None => return WaveformFrame::baseline(self.bars),
            ActiveMode::Recording => (RECORDING_RANGE, SourceKind::Microphone),
            ActiveMode::Playing => (PLAYBACK_RANGE, SourceKind::Playback),
        };

        graph.pump();
        if graph.source_kind() == Some(source)
            && let Some(data) = graph.frequency_data()
        {
            return WaveformFrame { bars: bars_from_spectrum(data, self.bars, range) };
        }

        let t = self.activated_at.map_or(0.0, |origin| now.saturating_duration_since(origin).as_secs_f64() * 1000.0);
        WaveformFrame { bars: simulated_bars(mode, self.bars, t) }
    }
}

/// Average frequency bins onto `count` bars and scale into `range`.
fn bars_from_spectrum(data: &[u8], count: usize, (low, high): (u8, u8)) -> Vec<u8> {
    let len = data.len();
    if len == 0 {
        return vec![low; count];
    }

    (0..count)
        .map(|bar| {
            let start = (bar * len / count).min(len - 1);
            let end = ((bar + 1) * len / count).clamp(start + 1, len);
            let group = &data[start..end];
            let level = group.iter().map(|&v| v as u32).sum::<u32>() / group.len() as u32;
            (low as u32 + level * (high - low) as u32 / 255) as u8
        })
        .collect()
}

/// Animated pattern used when no analysis data is flowing. `t` is in ms.
fn simulated_bars(mode: ActiveMode, count: usize, t: f64) -> Vec<u8> {
    (0..count)
        .map(|bar| {
            let phase = bar as f64;
            let noise = jitter(bar, t);
            let height = match mode {
                ActiveMode::Playing => 25.0 + noise * 40.0 + (t / 180.0 + phase).cos() * 20.0,
                _ => 30.0 + noise * 50.0 + (t / 150.0 + phase).sin() * 25.0,
            };
            let (low, high) = if mode == ActiveMode::Playing { PLAYBACK_RANGE } else { RECORDING_RANGE };
            height.clamp(low as f64, high as f64).round() as u8
        })
        .collect()
}

/// Repeatable pseudo-random value in [0, 1) per bar and instant.
fn jitter(bar: usize, t: f64) -> f64 {
    ((bar as f64 * 12.9898 + t * 0.078233).sin() * 43758.5453).fract().abs()
}
