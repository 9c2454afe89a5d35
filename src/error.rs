//! Error taxonomy for the recorder core.

use thiserror::Error;

/// Errors surfaced by the recording/playback controllers.
///
/// Only start-up failures and empty recordings reach the caller. Playback
/// problems are absorbed by the controllers and never escalate past the façade.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecorderError {
    #[error("Microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Audio processing graph unavailable: {0}")]
    GraphUnavailable(String),

    #[error("Recording produced no audio")]
    EncodingFailed,
}

impl RecorderError {
    /// Short message suitable for showing to the user.
    pub fn user_message(&self) -> &'static str {
        match self {
            RecorderError::PermissionDenied(_) => "Microphone access was denied",
            RecorderError::DeviceUnavailable(_) => "No microphone is available",
            RecorderError::GraphUnavailable(_) => "Audio is not supported in this environment",
            RecorderError::EncodingFailed => "Nothing was recorded",
        }
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, RecorderError>;
