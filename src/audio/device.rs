//! Collaborator interfaces for audio devices.
//!
//! The recorder core only talks to hardware through these traits. The cpal
//! implementations live in `capture` and `playback`; tests script their own.

use std::future::Future;

use ringbuf::HeapRb;
use ringbuf::traits::{Consumer, Observer, Producer, Split};

use super::clip::Clip;
use crate::error::Result;

/// Capacity of an analysis tap in samples (~0.5s at 48kHz).
pub const TAP_CAPACITY: usize = 24_000;

/// Requested capture format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConstraints {
    pub sample_rate: u32,              // Desired output rate (resampled if the device differs)
    pub device_name: Option<String>,   // Substring match on the input device name
}

impl Default for StreamConstraints {
    fn default() -> Self {
        Self { sample_rate: 16000, device_name: None }
    }
}

/// Producing end of an analysis tap. Lives on the audio callback side.
pub struct TapWriter {
    producer: ringbuf::HeapProd<f32>,
}

impl TapWriter {
    /// Push samples, dropping whatever does not fit.
    ///
    /// The analyser only needs the most recent window, so overflow is harmless.
    pub fn push(&mut self, samples: &[f32]) -> usize {
        self.producer.push_slice(samples)
    }
}

/// Consuming end of an analysis tap: the graph's source node.
pub struct SourceTap {
    consumer: ringbuf::HeapCons<f32>,
}

impl SourceTap {
    /// Create a connected writer/tap pair.
    pub fn channel(capacity: usize) -> (TapWriter, SourceTap) {
        let (producer, consumer) = HeapRb::<f32>::new(capacity).split();
        (TapWriter { producer }, SourceTap { consumer })
    }

    /// Pop up to `out.len()` samples, returning how many were read.
    pub fn drain(&mut self, out: &mut [f32]) -> usize {
        self.consumer.pop_slice(out)
    }

    pub fn pending(&self) -> usize {
        self.consumer.occupied_len()
    }
}

/// A live microphone stream with its tracks.
pub trait InputStream {
    /// Sample rate of the PCM returned by [`InputStream::read_into`].
    fn sample_rate(&self) -> u32;

    /// Append all captured mono PCM since the last call to `out`.
    fn read_into(&mut self, out: &mut Vec<f32>) -> usize;

    /// Open a fresh analysis tap, replacing any previous one.
    fn open_tap(&mut self) -> Option<SourceTap>;

    /// Track-ended notification: the device went away mid-capture.
    fn has_ended(&self) -> bool;

    /// Stop the device and release its tracks. Must be idempotent.
    fn stop(&mut self);
}

/// Source of microphone streams.
pub trait CaptureDevice {
    type Stream: InputStream;

    /// Acquire an input stream. This is the only suspension point of a recording.
    ///
    /// # Errors
    /// `PermissionDenied` or `DeviceUnavailable`.
    fn request_input_stream(&self, constraints: &StreamConstraints) -> impl Future<Output = Result<Self::Stream>>;
}

/// A playable handle built from one clip.
pub trait PlaybackHandle {
    fn play(&mut self) -> Result<()>;
    fn pause(&mut self);
    /// Move the play head, clamped to the clip.
    fn seek(&mut self, seconds: f64);
    /// Current play-head position in seconds.
    fn position(&self) -> f64;
    fn duration(&self) -> f64;
    /// "ended" notification: the play head reached the end of the buffer.
    fn has_ended(&self) -> bool;
    /// Open a fresh tap of the samples being played, replacing any previous one.
    fn open_tap(&mut self) -> Option<SourceTap>;
}

/// Factory for playback handles.
pub trait PlaybackDevice {
    type Handle: PlaybackHandle;

    fn open(&self, clip: &Clip) -> Result<Self::Handle>;
}
