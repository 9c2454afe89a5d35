//! Clip playback using cpal.
//!
//! A clip is decoded and resampled to the output device rate once, when the
//! handle is opened. The output callback reads from a shared cursor, so seek,
//! pause and position queries never touch the audio thread's data directly.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::clip::Clip;
use super::device::{PlaybackDevice, PlaybackHandle, SourceTap, TAP_CAPACITY, TapWriter};
use super::resampler::resample;
use super::util::{classify_device_error, find_best_config, find_output_device, get_device_name};
use crate::error::{RecorderError, Result};

/// Mono frames the output callback can hand to the tap without reallocating.
const PLAYED_CAPACITY: usize = 8192;

/// cpal-backed speaker.
#[derive(Debug, Clone, Default)]
pub struct CpalPlaybackDevice {
    device_name: Option<String>,
}

impl CpalPlaybackDevice {
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }
}

impl PlaybackDevice for CpalPlaybackDevice {
    type Handle = CpalPlaybackHandle;

    fn open(&self, clip: &Clip) -> Result<CpalPlaybackHandle> {
        CpalPlaybackHandle::open(clip, self.device_name.as_deref())
    }
}

/// Play head shared with the output callback.
struct Cursor {
    samples: Vec<f32>,   // Mono PCM at the device rate
    frame: AtomicUsize,  // Next frame to output
    playing: AtomicBool, // Callback outputs silence while false
}

impl Cursor {
    fn at_end(&self) -> bool {
        self.frame.load(Ordering::Acquire) >= self.samples.len()
    }

    /// Fill an interleaved output buffer from the play head and advance it.
    /// `played` is overwritten with the mono samples actually output.
    fn render(&self, data: &mut [f32], channels: usize, played: &mut Vec<f32>) {
        let start = self.frame.load(Ordering::Acquire);
        let mut position = start;
        played.clear();

        for frame in data.chunks_mut(channels.max(1)) {
            let sample = self.samples.get(position).copied().unwrap_or(0.0);
            if position < self.samples.len() {
                position += 1;
                played.push(sample);
            }
            frame.fill(sample);
        }

        // A concurrent seek wins over our advance.
        let _ = self.frame.compare_exchange(start, position, Ordering::AcqRel, Ordering::Acquire);
    }
}

/// A playable clip on the output device.
pub struct CpalPlaybackHandle {
    stream: Stream,                          // Kept alive for the handle's lifetime
    cursor: Arc<Cursor>,
    device_sample_rate: u32,
    duration: f64,
    tap_slot: Arc<Mutex<Option<TapWriter>>>, // Played samples for the analyser
}

impl CpalPlaybackHandle {
    /// Decode `clip` and build a paused output stream positioned at 0.
    ///
    /// # Errors
    /// `DeviceUnavailable` if no output device or stream can be opened.
    pub fn open(clip: &Clip, device_name: Option<&str>) -> Result<Self> {
        let host = cpal::default_host();
        let device = find_output_device(&host, device_name).map_err(|e| RecorderError::DeviceUnavailable(e.to_string()))?;

        info!("Using output device: {}", get_device_name(&device));

        let preferred_rate = match device.default_output_config() {
            Ok(config) => config.sample_rate(),
            Err(_) => clip.sample_rate(),
        };
        let supported = device.supported_output_configs().map_err(|e| classify_device_error(&e.to_string()))?;
        let config = find_best_config(supported, preferred_rate).map_err(|e| RecorderError::DeviceUnavailable(e.to_string()))?;
        let device_sample_rate = config.sample_rate();
        let channels = config.channels() as usize;

        let pcm = clip.decode_pcm()?;
        let samples = resample(&pcm, clip.sample_rate(), device_sample_rate).map_err(|e| RecorderError::DeviceUnavailable(e.to_string()))?;
        if clip.sample_rate() != device_sample_rate {
            debug!("Resampled clip {} Hz -> {} Hz ({} -> {} samples)", clip.sample_rate(), device_sample_rate, pcm.len(), samples.len());
        }

        let cursor = Arc::new(Cursor { samples, frame: AtomicUsize::new(0), playing: AtomicBool::new(false) });
        let tap_slot: Arc<Mutex<Option<TapWriter>>> = Arc::new(Mutex::new(None));

        let callback_cursor = cursor.clone();
        let callback_tap = tap_slot.clone();
        let mut played: Vec<f32> = Vec::with_capacity(PLAYED_CAPACITY);
        let stream_config: StreamConfig = config.config();

        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let cursor = &callback_cursor;
                    if !cursor.playing.load(Ordering::Acquire) {
                        data.fill(0.0);
                        return;
                    }

                    cursor.render(data, channels, &mut played);

                    if let Some(mut slot) = callback_tap.try_lock()
                        && let Some(writer) = slot.as_mut()
                    {
                        writer.push(&played);
                    }
                },
                |err| {
                    tracing::error!("Audio playback error: {}", err);
                },
                None,
            )
            .map_err(|e| classify_device_error(&e.to_string()))?;

        info!("🔊 Playback ready: {:.1}s at {} Hz", clip.duration_seconds(), device_sample_rate);

        Ok(Self { stream, cursor, device_sample_rate, duration: clip.duration_seconds(), tap_slot })
    }
}

impl PlaybackHandle for CpalPlaybackHandle {
    fn play(&mut self) -> Result<()> {
        if self.cursor.at_end() {
            self.cursor.frame.store(0, Ordering::Release);
        }
        self.cursor.playing.store(true, Ordering::Release);
        self.stream.play().map_err(|e| RecorderError::DeviceUnavailable(e.to_string()))
    }

    fn pause(&mut self) {
        self.cursor.playing.store(false, Ordering::Release);
        if let Err(e) = self.stream.pause() {
            warn!("Failed to pause output stream: {}", e);
        }
    }

    fn seek(&mut self, seconds: f64) {
        let frame = (seconds.max(0.0) * self.device_sample_rate as f64) as usize;
        self.cursor.frame.store(frame.min(self.cursor.samples.len()), Ordering::Release);
    }

    fn position(&self) -> f64 {
        let seconds = self.cursor.frame.load(Ordering::Acquire) as f64 / self.device_sample_rate as f64;
        seconds.min(self.duration)
    }

    fn duration(&self) -> f64 {
        self.duration
    }

    fn has_ended(&self) -> bool {
        self.cursor.at_end()
    }

    fn open_tap(&mut self) -> Option<SourceTap> {
        let (writer, tap) = SourceTap::channel(TAP_CAPACITY);
        *self.tap_slot.lock() = Some(writer);
        Some(tap)
    }
}

impl Drop for CpalPlaybackHandle {
    fn drop(&mut self) {
        self.cursor.playing.store(false, Ordering::Release);
        let _ = self.stream.pause();
    }
}
