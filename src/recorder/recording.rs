//! Microphone capture lifecycle.
//!
//! `Idle → Requesting → Recording → Stopped → Idle`. The controller acquires
//! an input stream, feeds its PCM to the encoder every polling tick and turns
//! the collected chunks into a [`Clip`] on stop. Elapsed time is measured on
//! the injected clock and clamped to the maximum duration.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use super::clock::{PollTimer, SharedClock};
use crate::audio::{CaptureDevice, Clip, Encoder, InputStream, StreamConstraints};
use crate::error::{RecorderError, Result};
use crate::graph::{SharedGraph, SourceKind};

/// Recording session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingStatus {
    Idle,
    Requesting,
    Recording,
    Stopped,
}

/// Owns one microphone session at a time.
pub struct RecordingController<D: CaptureDevice> {
    device: D,
    encoder: Box<dyn Encoder>,
    graph: SharedGraph,
    clock: SharedClock,
    constraints: StreamConstraints,
    max_duration: f64,              // Seconds
    status: RecordingStatus,
    elapsed: f64,                   // Seconds, clamped to max_duration
    started_at: Option<Instant>,
    stream: Option<D::Stream>,      // Held only while Recording
    timer: PollTimer,
    chunks: Vec<Vec<u8>>,           // Data-available chunks, in order
    pcm: Vec<f32>,                  // Scratch buffer for each drain
    sample_rate: u32,
    captured_frames: usize,
}

impl<D: CaptureDevice> RecordingController<D> {
    pub fn new(device: D, encoder: Box<dyn Encoder>, graph: SharedGraph, clock: SharedClock, constraints: StreamConstraints, max_duration: f64, poll_interval: Duration) -> Self {
        let sample_rate = constraints.sample_rate;
        Self {
            device,
            encoder,
            graph,
            clock,
            constraints,
            max_duration: max_duration.max(0.0),
            status: RecordingStatus::Idle,
            elapsed: 0.0,
            started_at: None,
            stream: None,
            timer: PollTimer::new(poll_interval),
            chunks: Vec::new(),
            pcm: Vec::new(),
            sample_rate,
            captured_frames: 0,
        }
    }

    /// Begin a new recording.
    ///
    /// A recording already in progress is stopped first and its clip dropped.
    /// The only suspension point is the device acquisition.
    ///
    /// # Errors
    /// `PermissionDenied` or `DeviceUnavailable` from the device,
    /// `GraphUnavailable` if the analysis graph cannot be built. The
    /// controller is back to `Idle` and holds no device in every case.
    pub async fn start(&mut self) -> Result<()> {
        if self.status == RecordingStatus::Recording {
            info!("Recording restarted, discarding current take");
            if let Err(e) = self.stop() {
                debug!("Discarded take was empty: {}", e);
            }
        }

        self.reset();
        self.status = RecordingStatus::Requesting;
        debug!("Requesting microphone ({} Hz)", self.constraints.sample_rate);

        let mut stream = match self.device.request_input_stream(&self.constraints).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Microphone request failed: {}", e);
                self.status = RecordingStatus::Idle;
                return Err(e);
            }
        };

        let attached = {
            let mut graph = self.graph.lock();
            match stream.open_tap() {
                Some(tap) => graph.attach_input_source(SourceKind::Microphone, tap),
                None => graph.ensure_graph().map(|_| ()),
            }
        };
        if let Err(e) = attached {
            warn!("Audio graph unavailable, releasing microphone: {}", e);
            stream.stop();
            self.status = RecordingStatus::Idle;
            return Err(e);
        }

        let now = self.clock.now();
        self.sample_rate = stream.sample_rate();
        self.encoder.start(self.sample_rate);
        self.stream = Some(stream);
        self.started_at = Some(now);
        self.timer.arm(now);
        self.status = RecordingStatus::Recording;

        info!("🎙️ Recording started (max {:.0}s, {})", self.max_duration, self.encoder.mime_type());
        Ok(())
    }

    /// Poll the session: drain audio, advance `elapsed`, auto-stop when due.
    ///
    /// # Returns
    /// The finished clip when this tick stopped the recording.
    pub fn tick(&mut self, now: Instant) -> Result<Option<Clip>> {
        if self.status != RecordingStatus::Recording || !self.timer.fire(now) {
            return Ok(None);
        }

        if let Some(mut stream) = self.stream.take() {
            self.drain(&mut stream);
            self.stream = Some(stream);
        }
        self.update_elapsed(now);

        if self.elapsed >= self.max_duration {
            info!("⏱️ Maximum duration reached ({:.1}s)", self.max_duration);
            return self.stop();
        }

        if self.stream.as_ref().is_some_and(|stream| stream.has_ended()) {
            warn!("Input track ended, stopping recording");
            return self.stop();
        }

        Ok(None)
    }

    /// Finish the recording and build the clip.
    ///
    /// No-op returning `Ok(None)` unless Recording.
    ///
    /// # Errors
    /// `EncodingFailed` when nothing was captured. The status is still
    /// `Stopped` and no clip is produced.
    pub fn stop(&mut self) -> Result<Option<Clip>> {
        if self.status != RecordingStatus::Recording {
            return Ok(None);
        }

        self.timer.cancel();
        self.update_elapsed(self.clock.now());

        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            // Samples captured before the device halted are still queued.
            self.drain(&mut stream);
        }
        self.detach_microphone();

        let trailing = self.encoder.finish();
        if !trailing.is_empty() {
            self.chunks.push(trailing);
        }
        self.status = RecordingStatus::Stopped;

        let data = std::mem::take(&mut self.chunks).concat();
        if data.is_empty() {
            warn!("Recording stopped with no audio");
            return Err(RecorderError::EncodingFailed);
        }

        let clip = Clip::new(data, self.encoder.mime_type(), self.sample_rate, self.elapsed);
        info!("⏹️ Recording stopped: {:.1}s, {} bytes", clip.duration_seconds(), clip.len());
        Ok(Some(clip))
    }

    /// Drop the session and any buffered audio; release the device if held.
    pub fn reset(&mut self) {
        self.timer.cancel();
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            self.detach_microphone();
            debug!("Recording discarded");
        }
        self.chunks.clear();
        self.pcm.clear();
        self.elapsed = 0.0;
        self.started_at = None;
        self.captured_frames = 0;
        self.status = RecordingStatus::Idle;
    }

    pub fn status(&self) -> RecordingStatus {
        self.status
    }

    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    pub fn max_duration(&self) -> f64 {
        self.max_duration
    }

    pub fn is_recording(&self) -> bool {
        self.status == RecordingStatus::Recording
    }

    /// Requesting or Recording.
    pub fn is_active(&self) -> bool {
        matches!(self.status, RecordingStatus::Requesting | RecordingStatus::Recording)
    }

    pub fn timer_armed(&self) -> bool {
        self.timer.is_armed()
    }

    pub fn holds_device(&self) -> bool {
        self.stream.is_some()
    }

    fn update_elapsed(&mut self, now: Instant) {
        if let Some(started) = self.started_at {
            let measured = now.saturating_duration_since(started).as_secs_f64().min(self.max_duration);
            self.elapsed = self.elapsed.max(measured);
        }
    }

    /// Move captured PCM into the encoder, never past the maximum duration.
    fn drain(&mut self, stream: &mut D::Stream) {
        self.pcm.clear();
        stream.read_into(&mut self.pcm);

        let max_frames = (self.max_duration * self.sample_rate as f64).round() as usize;
        let take = self.pcm.len().min(max_frames.saturating_sub(self.captured_frames));
        if take == 0 {
            return;
        }

        let chunk = self.encoder.encode(&self.pcm[..take]);
        self.captured_frames += take;
        if !chunk.is_empty() {
            debug!("Encoded chunk: {} samples -> {} bytes", take, chunk.len());
            self.chunks.push(chunk);
        }
    }

    fn detach_microphone(&self) {
        let mut graph = self.graph.lock();
        if graph.source_kind() == Some(SourceKind::Microphone) {
            graph.detach_input_source();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::audio::WavEncoder;
    use crate::graph::AudioGraphManager;
    use crate::recorder::{Clock, ManualClock};
    use crate::testing::{FakeContextFactory, FakeMic};

    const POLL: Duration = Duration::from_millis(100);

    fn controller(mic: FakeMic, clock: &ManualClock, factory: FakeContextFactory) -> (RecordingController<FakeMic>, SharedGraph) {
        let graph = AudioGraphManager::new(Box::new(factory)).shared();
        let controller = RecordingController::new(mic, Box::new(WavEncoder::new()), graph.clone(), Arc::new(clock.clone()), StreamConstraints::default(), 30.0, POLL);
        (controller, graph)
    }

    /// Advance in poll-sized steps, returning the clip if one was produced.
    fn run_for(controller: &mut RecordingController<FakeMic>, clock: &ManualClock, duration: Duration) -> Option<Clip> {
        let steps = duration.as_millis() / POLL.as_millis();
        for _ in 0..steps {
            clock.advance(POLL);
            if let Some(clip) = controller.tick(clock.now()).unwrap() {
                return Some(clip);
            }
        }
        None
    }

    #[tokio::test]
    async fn test_start_acquires_and_attaches() {
        let clock = ManualClock::new();
        let mic = FakeMic::clocked(clock.clone());
        let (mut controller, graph) = controller(mic.clone(), &clock, FakeContextFactory::new());

        controller.start().await.unwrap();
        assert_eq!(controller.status(), RecordingStatus::Recording);
        assert!(controller.timer_armed());
        assert_eq!(mic.acquisitions(), 1);
        assert_eq!(graph.lock().source_kind(), Some(SourceKind::Microphone));
    }

    #[tokio::test]
    async fn test_auto_stop_at_max_duration() {
        let clock = ManualClock::new();
        let mic = FakeMic::clocked(clock.clone());
        let (mut controller, graph) = controller(mic.clone(), &clock, FakeContextFactory::new());
        controller.start().await.unwrap();

        let clip = run_for(&mut controller, &clock, Duration::from_millis(30_500)).expect("clip at max duration");
        assert_eq!(clip.duration_seconds(), 30.0);
        assert_eq!(clock.elapsed(), Duration::from_secs(30));
        assert_eq!(clip.decode_pcm().unwrap().len(), 30 * 16000);
        assert_eq!(controller.status(), RecordingStatus::Stopped);
        assert_eq!(controller.elapsed(), 30.0);
        assert!(!controller.timer_armed());
        assert_eq!(mic.live(), 0);
        assert!(!graph.lock().has_source());

        // Further ticks do nothing.
        clock.advance(POLL);
        assert!(controller.tick(clock.now()).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_elapsed_is_monotonic_and_clamped() {
        let clock = ManualClock::new();
        let (mut controller, _graph) = controller(FakeMic::clocked(clock.clone()), &clock, FakeContextFactory::new());
        controller.start().await.unwrap();

        let mut last = 0.0;
        for step in [50, 100, 30, 400, 100, 250] {
            clock.advance(Duration::from_millis(step));
            controller.tick(clock.now()).unwrap();
            assert!(controller.elapsed() >= last);
            last = controller.elapsed();
        }
        assert!(last <= controller.max_duration());

        controller.reset();
        assert_eq!(controller.elapsed(), 0.0);
        assert_eq!(controller.status(), RecordingStatus::Idle);
    }

    #[tokio::test]
    async fn test_restart_is_stop_then_start() {
        let clock = ManualClock::new();
        let mic = FakeMic::clocked(clock.clone());
        let (mut controller, _graph) = controller(mic.clone(), &clock, FakeContextFactory::new());

        controller.start().await.unwrap();
        run_for(&mut controller, &clock, Duration::from_secs(2));
        controller.start().await.unwrap();

        assert_eq!(mic.acquisitions(), 2);
        assert_eq!(mic.live(), 1);
        assert_eq!(controller.status(), RecordingStatus::Recording);
        assert_eq!(controller.elapsed(), 0.0);
    }

    #[tokio::test]
    async fn test_stop_when_not_recording_is_noop() {
        let clock = ManualClock::new();
        let mic = FakeMic::clocked(clock.clone());
        let (mut controller, _graph) = controller(mic.clone(), &clock, FakeContextFactory::new());

        assert!(controller.stop().unwrap().is_none());
        assert_eq!(controller.status(), RecordingStatus::Idle);

        controller.start().await.unwrap();
        run_for(&mut controller, &clock, Duration::from_secs(1));
        assert!(controller.stop().unwrap().is_some());

        let elapsed = controller.elapsed();
        assert!(controller.stop().unwrap().is_none());
        assert_eq!(controller.status(), RecordingStatus::Stopped);
        assert_eq!(controller.elapsed(), elapsed);
        assert_eq!(mic.releases(), 1);
    }

    #[tokio::test]
    async fn test_permission_denied_reverts_to_idle() {
        let clock = ManualClock::new();
        let mic = FakeMic::new();
        mic.fail_next(RecorderError::PermissionDenied("user refused".to_string()));
        let (mut controller, _graph) = controller(mic.clone(), &clock, FakeContextFactory::new());

        let err = controller.start().await.unwrap_err();
        assert!(matches!(err, RecorderError::PermissionDenied(_)));
        assert_eq!(controller.status(), RecordingStatus::Idle);
        assert!(!controller.timer_armed());
        assert_eq!(mic.acquisitions(), 0);
    }

    #[tokio::test]
    async fn test_graph_failure_releases_microphone() {
        let clock = ManualClock::new();
        let mic = FakeMic::new();
        let (mut controller, _graph) = controller(mic.clone(), &clock, FakeContextFactory::failing());

        let err = controller.start().await.unwrap_err();
        assert!(matches!(err, RecorderError::GraphUnavailable(_)));
        assert_eq!(controller.status(), RecordingStatus::Idle);
        assert!(!controller.holds_device());
        assert_eq!(mic.live(), 0);
    }

    #[tokio::test]
    async fn test_empty_recording_fails_encoding() {
        let clock = ManualClock::new();
        let (mut controller, _graph) = controller(FakeMic::new(), &clock, FakeContextFactory::new());
        controller.start().await.unwrap();
        run_for(&mut controller, &clock, Duration::from_millis(500));

        assert_eq!(controller.stop().unwrap_err(), RecorderError::EncodingFailed);
        assert_eq!(controller.status(), RecordingStatus::Stopped);
    }

    #[tokio::test]
    async fn test_track_end_stops_recording() {
        let clock = ManualClock::new();
        let mic = FakeMic::new();
        let (mut controller, _graph) = controller(mic.clone(), &clock, FakeContextFactory::new());
        controller.start().await.unwrap();

        mic.speak(&[0.1; 3200]);
        mic.end_track();
        let clip = run_for(&mut controller, &clock, Duration::from_millis(100)).expect("clip on track end");
        assert_eq!(clip.decode_pcm().unwrap().len(), 3200);
        assert_eq!(controller.status(), RecordingStatus::Stopped);
        assert_eq!(mic.live(), 0);
    }

    #[tokio::test]
    async fn test_stop_keeps_samples_since_last_poll() {
        let clock = ManualClock::new();
        let mic = FakeMic::clocked(clock.clone());
        let (mut controller, _graph) = controller(mic, &clock, FakeContextFactory::new());
        controller.start().await.unwrap();

        run_for(&mut controller, &clock, Duration::from_millis(1000));
        clock.advance(Duration::from_millis(50));
        let clip = controller.stop().unwrap().expect("clip");

        assert!((clip.duration_seconds() - 1.05).abs() < 1e-9);
        assert_eq!(clip.decode_pcm().unwrap().len(), 16800);
        assert_eq!(clip.mime_type(), "audio/wav");
    }

    #[tokio::test]
    async fn test_reset_releases_device_but_keeps_graph() {
        let clock = ManualClock::new();
        let factory = FakeContextFactory::new();
        let mic = FakeMic::clocked(clock.clone());
        let (mut controller, graph) = controller(mic.clone(), &clock, factory.clone());
        controller.start().await.unwrap();

        controller.reset();
        assert_eq!(mic.live(), 0);
        assert!(!controller.timer_armed());
        assert!(graph.lock().is_built());
        assert!(!graph.lock().has_source());
        assert_eq!(factory.closes(), 0);
    }
}
