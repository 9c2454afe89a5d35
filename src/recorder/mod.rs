//! Recording and playback state machines and the screen façade.

mod clock;
mod facade;
mod playback;
mod recording;
mod waveform;

pub use clock::{Clock, ManualClock, PollTimer, SharedClock, SystemClock};
pub use facade::{ActiveMode, Command, Recorder, Snapshot, format_time};
pub use playback::{PlaybackController, PlaybackStatus};
pub use recording::{RecordingController, RecordingStatus};
pub use waveform::{BASELINE_BAR, WaveformFrame, WaveformSampler};
