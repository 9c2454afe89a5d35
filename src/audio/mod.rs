//! Audio I/O: device interfaces, the clip format, and cpal implementations.
//!
//! The recorder core depends only on the traits in `device` and on `Clip`;
//! `capture`, `playback` and `context` provide the cpal-backed collaborators
//! used by the binary.

mod capture;
mod clip;
mod context;
mod device;
pub mod encoder;
mod playback;
pub mod resampler;
pub mod util;

pub use capture::{CpalCaptureDevice, CpalInputStream};
pub use clip::{Clip, ClipId};
pub use context::CpalContextFactory;
pub use device::{CaptureDevice, InputStream, PlaybackDevice, PlaybackHandle, SourceTap, StreamConstraints, TAP_CAPACITY, TapWriter};
pub use encoder::{Encoder, WavEncoder};
pub use playback::{CpalPlaybackDevice, CpalPlaybackHandle};
