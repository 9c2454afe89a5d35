//! Scripted collaborators for unit tests.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::audio::{CaptureDevice, Clip, InputStream, PlaybackDevice, PlaybackHandle, SourceTap, StreamConstraints, TapWriter};
use crate::error::{RecorderError, Result};
use crate::graph::{AudioContext, ContextFactory, ContextState};
use crate::recorder::{Clock, ManualClock};

// ---------------------------------------------------------------------------
// Processing context
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct ContextScript {
    state: ContextState,
    created: usize,
    closes: usize,
    fail: bool,
}

/// Context factory whose contexts share one scripted state.
#[derive(Debug, Clone)]
pub struct FakeContextFactory {
    script: Arc<Mutex<ContextScript>>,
}

impl FakeContextFactory {
    pub fn new() -> Self {
        Self { script: Arc::new(Mutex::new(ContextScript { state: ContextState::Running, created: 0, closes: 0, fail: false })) }
    }

    /// A factory that refuses to build contexts.
    pub fn failing() -> Self {
        let factory = Self::new();
        factory.set_failing(true);
        factory
    }

    pub fn set_failing(&self, fail: bool) {
        self.script.lock().fail = fail;
    }

    pub fn created(&self) -> usize {
        self.script.lock().created
    }

    pub fn closes(&self) -> usize {
        self.script.lock().closes
    }

    pub fn state(&self) -> ContextState {
        self.script.lock().state
    }

    pub fn set_state(&self, state: ContextState) {
        self.script.lock().state = state;
    }
}

impl ContextFactory for FakeContextFactory {
    fn create(&self) -> Result<Box<dyn AudioContext>> {
        let mut script = self.script.lock();
        if script.fail {
            return Err(RecorderError::GraphUnavailable("no audio backend".to_string()));
        }
        script.created += 1;
        script.state = ContextState::Running;
        Ok(Box::new(FakeContext { script: self.script.clone() }))
    }
}

struct FakeContext {
    script: Arc<Mutex<ContextScript>>,
}

impl AudioContext for FakeContext {
    fn state(&self) -> ContextState {
        self.script.lock().state
    }

    fn resume(&mut self) -> Result<()> {
        self.script.lock().state = ContextState::Running;
        Ok(())
    }

    fn close(&mut self) {
        let mut script = self.script.lock();
        script.state = ContextState::Closed;
        script.closes += 1;
    }

    fn sample_rate(&self) -> u32 {
        48000
    }
}

// ---------------------------------------------------------------------------
// Microphone
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MicScript {
    pending: Vec<f32>,
    tap: Option<TapWriter>,
    ended: bool,
    acquisitions: usize,
    releases: usize,
    fail_next: Option<RecorderError>,
    no_tap: bool,
}

/// Microphone that captures what tests `speak()`, or a steady tone when
/// driven by a clock.
#[derive(Clone)]
pub struct FakeMic {
    script: Arc<Mutex<MicScript>>,
    clock: Option<ManualClock>,
}

impl FakeMic {
    /// Silent microphone: only `speak()` produces samples.
    pub fn new() -> Self {
        Self { script: Arc::new(Mutex::new(MicScript::default())), clock: None }
    }

    /// Microphone producing a tone in step with `clock`.
    pub fn clocked(clock: ManualClock) -> Self {
        Self { script: Arc::new(Mutex::new(MicScript::default())), clock: Some(clock) }
    }

    /// Capture `samples` on the live stream.
    pub fn speak(&self, samples: &[f32]) {
        let mut script = self.script.lock();
        script.pending.extend_from_slice(samples);
        if let Some(tap) = script.tap.as_mut() {
            tap.push(samples);
        }
    }

    /// Make the next acquisition fail with `err`.
    pub fn fail_next(&self, err: RecorderError) {
        self.script.lock().fail_next = Some(err);
    }

    /// Streams opened from now on have no analysis tap.
    pub fn without_tap(&self) {
        self.script.lock().no_tap = true;
    }

    /// Unplug the device mid-capture.
    pub fn end_track(&self) {
        self.script.lock().ended = true;
    }

    pub fn acquisitions(&self) -> usize {
        self.script.lock().acquisitions
    }

    pub fn releases(&self) -> usize {
        self.script.lock().releases
    }

    /// Streams acquired and not yet stopped.
    pub fn live(&self) -> usize {
        let script = self.script.lock();
        script.acquisitions - script.releases
    }
}

impl CaptureDevice for FakeMic {
    type Stream = FakeInputStream;

    async fn request_input_stream(&self, constraints: &StreamConstraints) -> Result<FakeInputStream> {
        let mut script = self.script.lock();
        if let Some(err) = script.fail_next.take() {
            return Err(err);
        }
        script.acquisitions += 1;
        script.pending.clear();
        script.ended = false;

        let last_read = self.clock.as_ref().map(|clock| clock.now());
        Ok(FakeInputStream { script: self.script.clone(), clock: self.clock.clone(), last_read, sample_rate: constraints.sample_rate, stopped: false })
    }
}

pub struct FakeInputStream {
    script: Arc<Mutex<MicScript>>,
    clock: Option<ManualClock>,
    last_read: Option<Instant>,
    sample_rate: u32,
    stopped: bool,
}

impl FakeInputStream {
    /// Tone samples for the clock time since the previous read.
    fn generate(&mut self) {
        if self.stopped {
            return;
        }
        let (Some(clock), Some(last)) = (self.clock.as_ref(), self.last_read) else {
            return;
        };
        let now = clock.now();
        let frames = (now.duration_since(last).as_secs_f64() * self.sample_rate as f64).round() as usize;
        self.last_read = Some(now);

        let samples: Vec<f32> = (0..frames).map(|n| (n as f32 * 0.35).sin() * 0.3).collect();
        let mut script = self.script.lock();
        script.pending.extend_from_slice(&samples);
        if let Some(tap) = script.tap.as_mut() {
            tap.push(&samples);
        }
    }
}

impl InputStream for FakeInputStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read_into(&mut self, out: &mut Vec<f32>) -> usize {
        self.generate();
        let mut script = self.script.lock();
        let read = script.pending.len();
        out.append(&mut script.pending);
        read
    }

    fn open_tap(&mut self) -> Option<SourceTap> {
        let mut script = self.script.lock();
        if script.no_tap {
            return None;
        }
        let (writer, tap) = SourceTap::channel(4096);
        script.tap = Some(writer);
        Some(tap)
    }

    fn has_ended(&self) -> bool {
        self.script.lock().ended
    }

    fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.generate();
        self.stopped = true;
        let mut script = self.script.lock();
        script.releases += 1;
        script.tap = None;
    }
}

impl Drop for FakeInputStream {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Speaker
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SpeakerScript {
    opened: usize,
    dropped: usize,
    fail_next: bool,
    with_tap: bool,
}

/// Speaker whose play head follows a manual clock.
#[derive(Clone)]
pub struct FakeSpeaker {
    script: Arc<Mutex<SpeakerScript>>,
    clock: ManualClock,
}

impl FakeSpeaker {
    pub fn new(clock: ManualClock) -> Self {
        Self { script: Arc::new(Mutex::new(SpeakerScript::default())), clock }
    }

    /// Handles opened from now on expose a tap of played samples.
    pub fn with_tap(self) -> Self {
        self.script.lock().with_tap = true;
        self
    }

    pub fn fail_next(&self) {
        self.script.lock().fail_next = true;
    }

    pub fn opened(&self) -> usize {
        self.script.lock().opened
    }

    /// Handles opened and not yet dropped.
    pub fn live(&self) -> usize {
        let script = self.script.lock();
        script.opened - script.dropped
    }
}

impl PlaybackDevice for FakeSpeaker {
    type Handle = FakePlaybackHandle;

    fn open(&self, clip: &Clip) -> Result<FakePlaybackHandle> {
        let mut script = self.script.lock();
        if std::mem::take(&mut script.fail_next) {
            return Err(RecorderError::DeviceUnavailable("no output device".to_string()));
        }
        script.opened += 1;
        Ok(FakePlaybackHandle {
            script: self.script.clone(),
            clock: self.clock.clone(),
            duration: clip.duration_seconds(),
            offset: 0.0,
            playing_since: None,
            with_tap: script.with_tap,
            tap: None,
        })
    }
}

pub struct FakePlaybackHandle {
    script: Arc<Mutex<SpeakerScript>>,
    clock: ManualClock,
    duration: f64,
    offset: f64,                   // Position when playback last (re)started
    playing_since: Option<Instant>,
    with_tap: bool,
    tap: Option<TapWriter>,
}

impl FakePlaybackHandle {
    fn raw_position(&self) -> f64 {
        let running = self.playing_since.map_or(0.0, |since| self.clock.now().duration_since(since).as_secs_f64());
        self.offset + running
    }
}

impl PlaybackHandle for FakePlaybackHandle {
    fn play(&mut self) -> Result<()> {
        if self.raw_position() >= self.duration {
            self.offset = 0.0;
        }
        self.playing_since = Some(self.clock.now());
        if let Some(tap) = self.tap.as_mut() {
            tap.push(&[0.25; 64]);
        }
        Ok(())
    }

    fn pause(&mut self) {
        self.offset = self.position();
        self.playing_since = None;
    }

    fn seek(&mut self, seconds: f64) {
        self.offset = seconds.clamp(0.0, self.duration);
        if self.playing_since.is_some() {
            self.playing_since = Some(self.clock.now());
        }
    }

    fn position(&self) -> f64 {
        // Reports overshoot the way a coarse device clock would; callers clamp.
        self.raw_position().min(self.duration + 0.05)
    }

    fn duration(&self) -> f64 {
        self.duration
    }

    fn has_ended(&self) -> bool {
        self.raw_position() >= self.duration
    }

    fn open_tap(&mut self) -> Option<SourceTap> {
        if !self.with_tap {
            return None;
        }
        let (mut writer, tap) = SourceTap::channel(4096);
        writer.push(&[0.25; 64]);
        self.tap = Some(writer);
        Some(tap)
    }
}

impl Drop for FakePlaybackHandle {
    fn drop(&mut self) {
        self.script.lock().dropped += 1;
    }
}
