//! The captured clip: an opaque encoded buffer plus its duration.

use std::sync::atomic::{AtomicU64, Ordering};

use super::encoder::decode_wav;
use crate::error::Result;

static NEXT_CLIP_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one recording result. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClipId(u64);

impl ClipId {
    fn next() -> Self {
        Self(NEXT_CLIP_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Immutable buffer produced by one completed recording session.
#[derive(Debug)]
pub struct Clip {
    id: ClipId,
    data: Vec<u8>,         // Concatenated encoder chunks
    mime_type: String,     // e.g. "audio/wav"
    sample_rate: u32,      // PCM rate the encoder was started with
    duration_seconds: f64, // Wall-clock length of the session
}

impl Clip {
    pub fn new(data: Vec<u8>, mime_type: impl Into<String>, sample_rate: u32, duration_seconds: f64) -> Self {
        Self { id: ClipId::next(), data, mime_type: mime_type.into(), sample_rate, duration_seconds: duration_seconds.max(0.0) }
    }

    pub fn id(&self) -> ClipId {
        self.id
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration_seconds(&self) -> f64 {
        self.duration_seconds
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Decode the buffer back to mono f32 PCM at [`Clip::sample_rate`].
    ///
    /// # Errors
    /// `EncodingFailed` if the buffer is not a WAV file.
    pub fn decode_pcm(&self) -> Result<Vec<f32>> {
        decode_wav(&self.data).map(|(samples, _)| samples)
    }
}
