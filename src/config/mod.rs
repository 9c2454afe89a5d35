//! Configuration module for the recorder.
//!
//! Provides CLI argument parsing and the recorder core's settings.

#[allow(clippy::module_inception)]
mod config;

pub use config::{AppConfig, MAX_CLIP_SECONDS, RecorderSettings};
