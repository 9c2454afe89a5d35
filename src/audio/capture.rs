//! Microphone capture using cpal.
//!
//! The input callback downmixes to mono, resamples to the requested rate and
//! pushes into two lock-free ring buffers: one drained by the recorder for the
//! clip, one feeding the analysis tap. Nothing in the callback blocks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use parking_lot::Mutex;
use ringbuf::HeapRb;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use tracing::{debug, info, warn};

use super::device::{CaptureDevice, InputStream, SourceTap, StreamConstraints, TAP_CAPACITY, TapWriter};
use super::resampler::StreamResampler;
use super::util::{classify_device_error, convert_to_mono, find_best_config, find_input_device, get_device_name, is_device_lost};
use crate::error::Result;
use crate::graph::ContextHealth;

/// Capture ring size in samples (~8 seconds at 16kHz, drained every poll).
const CAPTURE_RING_SIZE: usize = 131072;

/// cpal-backed microphone.
#[derive(Debug, Clone)]
pub struct CpalCaptureDevice {
    health: ContextHealth,
}

impl CpalCaptureDevice {
    pub fn new(health: ContextHealth) -> Self {
        Self { health }
    }
}

impl CaptureDevice for CpalCaptureDevice {
    type Stream = CpalInputStream;

    async fn request_input_stream(&self, constraints: &StreamConstraints) -> Result<CpalInputStream> {
        CpalInputStream::open(constraints, self.health.clone())
    }
}

/// A running cpal input stream.
pub struct CpalInputStream {
    stream: Option<Stream>,                    // Dropping the stream releases the device
    sample_rate: u32,                          // Output rate after resampling
    consumer: ringbuf::HeapCons<f32>,          // Clip samples
    tap_slot: Arc<Mutex<Option<TapWriter>>>,   // Analysis tap, swapped by open_tap
    ended: Arc<AtomicBool>,                    // Track-ended notification
}

impl CpalInputStream {
    /// Open the configured input device and start capturing.
    ///
    /// # Errors
    /// `PermissionDenied` when the backend refuses the microphone,
    /// `DeviceUnavailable` for every other acquisition failure.
    pub fn open(constraints: &StreamConstraints, health: ContextHealth) -> Result<Self> {
        let host = cpal::default_host();
        let device = find_input_device(&host, constraints.device_name.as_deref()).map_err(|e| classify_device_error(&e.to_string()))?;

        info!("Using input device: {}", get_device_name(&device));

        let supported = device.supported_input_configs().map_err(|e| classify_device_error(&e.to_string()))?;
        let config = find_best_config(supported, constraints.sample_rate).map_err(|e| classify_device_error(&e.to_string()))?;
        let device_sample_rate = config.sample_rate();
        let channels = config.channels() as usize;

        let mut resampler = if device_sample_rate != constraints.sample_rate {
            info!("Device sample rate {} Hz differs from target {} Hz - resampling will be applied", device_sample_rate, constraints.sample_rate);
            Some(StreamResampler::new(device_sample_rate, constraints.sample_rate).map_err(|e| classify_device_error(&e.to_string()))?)
        } else {
            None
        };

        debug!("Audio capture config: {} Hz, {} channels, {:?}", device_sample_rate, channels, config.sample_format());

        let (mut producer, consumer) = HeapRb::<f32>::new(CAPTURE_RING_SIZE).split();
        let tap_slot: Arc<Mutex<Option<TapWriter>>> = Arc::new(Mutex::new(None));
        let ended = Arc::new(AtomicBool::new(false));

        let callback_tap = tap_slot.clone();
        let err_ended = ended.clone();
        let stream_config: StreamConfig = config.config();

        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let mono = convert_to_mono(data, channels);
                    let samples = match resampler.as_mut() {
                        Some(resampler) => resampler.process(&mono),
                        None => mono,
                    };
                    if samples.is_empty() {
                        return;
                    }

                    let written = producer.push_slice(&samples);
                    if written < samples.len() {
                        static DROP_COUNT: AtomicU64 = AtomicU64::new(0);
                        let count = DROP_COUNT.fetch_add(1, Ordering::Relaxed);
                        if count.is_multiple_of(100) {
                            warn!("Capture buffer full, dropped {} chunks", count + 1);
                        }
                    }

                    // Never wait on the tap: skip this block if open_tap holds the lock.
                    if let Some(mut slot) = callback_tap.try_lock()
                        && let Some(writer) = slot.as_mut()
                    {
                        writer.push(&samples);
                    }
                },
                move |err| {
                    let message = err.to_string();
                    warn!("Audio capture error: {}", message);
                    if is_device_lost(&message) {
                        err_ended.store(true, Ordering::SeqCst);
                        health.mark_closed();
                    }
                },
                None,
            )
            .map_err(|e| classify_device_error(&e.to_string()))?;

        stream.play().map_err(|e| classify_device_error(&e.to_string()))?;

        info!("🎙️ Microphone open: device {} Hz -> clip {} Hz", device_sample_rate, constraints.sample_rate);

        Ok(Self { stream: Some(stream), sample_rate: constraints.sample_rate, consumer, tap_slot, ended })
    }
}

impl InputStream for CpalInputStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read_into(&mut self, out: &mut Vec<f32>) -> usize {
        let available = self.consumer.occupied_len();
        if available == 0 {
            return 0;
        }
        let start = out.len();
        out.resize(start + available, 0.0);
        let read = self.consumer.pop_slice(&mut out[start..]);
        out.truncate(start + read);
        read
    }

    fn open_tap(&mut self) -> Option<SourceTap> {
        let (writer, tap) = SourceTap::channel(TAP_CAPACITY);
        *self.tap_slot.lock() = Some(writer);
        Some(tap)
    }

    fn has_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    fn stop(&mut self) {
        let Some(stream) = self.stream.take() else {
            return;
        };
        if let Err(e) = stream.pause() {
            debug!("Pausing input stream failed: {}", e);
        }
        drop(stream);
        self.tap_slot.lock().take();
        info!("Microphone released");
    }
}

impl Drop for CpalInputStream {
    fn drop(&mut self) {
        self.stop();
    }
}
