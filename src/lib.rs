//! Voice Memo - record, visualize and play back short voice clips.
//!
//! The core is a pair of state machines (recording and playback) sharing one
//! audio analysis graph, coordinated by the [`Recorder`] screen façade. Audio
//! hardware is reached through the traits in [`audio`]; the cpal-backed
//! implementations are what the `voice-memo` binary uses.

pub mod audio;
pub mod config;
pub mod error;
pub mod graph;
pub mod recorder;

#[cfg(test)]
mod testing;

pub use config::{AppConfig, RecorderSettings};
pub use error::{RecorderError, Result};
pub use recorder::{ActiveMode, Command, Recorder, Snapshot};
